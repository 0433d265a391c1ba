//! Pre-flight accessibility checks.
//!
//! Callers about to queue a download can ask whether the target looks
//! reachable at all. The probe runs the external tool in metadata-only mode
//! and never downloads media; like the orchestrator it reports failures as
//! values, not errors.

use serde::Deserialize;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::orchestrator::{WaitResult, wait_with_timeout};

/// What the probe found out about a URL.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub accessible: bool,
    /// The video title when accessible, otherwise a short reason.
    pub detail: String,
}

/// Probe configuration. The defaults suit interactive pre-flight checks;
/// tests point `tool` at a stub.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub tool: String,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tool: "yt-dlp".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Subset of the tool's `--dump-single-json` payload the probe cares about.
#[derive(Deserialize)]
struct ProbeInfo {
    title: Option<String>,
    fulltitle: Option<String>,
}

/// Checks whether `url` is accessible without downloading anything.
///
/// Exit code zero plus parseable metadata means accessible, with the title
/// as detail. Everything else maps to a short reason string; the probe never
/// panics or propagates process errors.
pub fn probe(url: &str, config: &ProbeConfig) -> ProbeReport {
    let child = Command::new(&config.tool)
        .arg("--dump-single-json")
        .arg("--skip-download")
        .arg("--no-warnings")
        .arg("--no-progress")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) => {
            return ProbeReport {
                accessible: false,
                detail: format!("not accessible: {}", err),
            };
        }
    };

    // Pipes are drained while waiting, so a metadata dump larger than the
    // pipe buffer cannot wedge the child into a false timeout.
    let output = match wait_with_timeout(child, config.timeout) {
        WaitResult::Finished(output) => output,
        WaitResult::TimedOut => {
            return ProbeReport {
                accessible: false,
                detail: "timed out".into(),
            };
        }
        WaitResult::WaitFailed(err) => {
            return ProbeReport {
                accessible: false,
                detail: format!("not accessible: {}", err),
            };
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.trim().chars().take(120).collect::<String>();
        return ProbeReport {
            accessible: false,
            detail: if reason.is_empty() {
                "not accessible".into()
            } else {
                reason
            },
        };
    }

    match serde_json::from_slice::<ProbeInfo>(&output.stdout) {
        Ok(info) => {
            let title = info
                .fulltitle
                .or(info.title)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "(untitled)".into());
            ProbeReport {
                accessible: true,
                detail: title,
            }
        }
        Err(_) => ProbeReport {
            accessible: false,
            detail: "not accessible".into(),
        },
    }
}

/// Runs `<tool> --version` to fail loudly when the external dependency is
/// missing, before any real work starts.
pub fn ensure_tool_available(tool: &str) -> anyhow::Result<()> {
    let status = Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => anyhow::bail!("{} is installed but returned a failure status", tool),
        Err(err) => anyhow::bail!("{} is not installed or not in PATH: {}", tool, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn install_stub(dir: &Path, body: &str) -> ProbeConfig {
        let script_path = dir.join("yt-dlp-stub");
        fs::write(&script_path, format!("#!/usr/bin/env bash\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        ProbeConfig {
            tool: script_path.to_string_lossy().into_owned(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn accessible_video_reports_its_title() {
        let dir = tempdir().unwrap();
        let config = install_stub(
            dir.path(),
            r#"echo '{"id":"alpha","fulltitle":"Alpha Title","title":"Alpha"}'"#,
        );
        let report = probe("https://example.test/alpha", &config);
        assert!(report.accessible);
        assert_eq!(report.detail, "Alpha Title");
    }

    #[test]
    fn nonzero_exit_reports_truncated_stderr() {
        let dir = tempdir().unwrap();
        let config = install_stub(dir.path(), "echo 'ERROR: Private video' >&2\nexit 1");
        let report = probe("https://example.test/private", &config);
        assert!(!report.accessible);
        assert!(report.detail.contains("Private video"));
    }

    #[test]
    fn silent_failure_reports_not_accessible() {
        let dir = tempdir().unwrap();
        let config = install_stub(dir.path(), "exit 1");
        let report = probe("https://example.test/gone", &config);
        assert!(!report.accessible);
        assert_eq!(report.detail, "not accessible");
    }

    #[test]
    fn oversized_metadata_dump_does_not_wedge_the_probe() {
        let dir = tempdir().unwrap();
        // A dump-single-json payload routinely exceeds the pipe buffer; pad
        // the JSON past 1 MB and make sure the probe still reads it all.
        let config = install_stub(
            dir.path(),
            "padding=$(head -c 1048576 /dev/zero | tr '\\0' 'x')\n\
             echo \"{\\\"id\\\":\\\"alpha\\\",\\\"fulltitle\\\":\\\"Alpha Title\\\",\\\"description\\\":\\\"$padding\\\"}\"",
        );
        let report = probe("https://example.test/alpha", &config);
        assert!(report.accessible);
        assert_eq!(report.detail, "Alpha Title");
    }

    #[test]
    fn hung_probe_times_out() {
        let dir = tempdir().unwrap();
        let mut config = install_stub(dir.path(), "sleep 30");
        config.timeout = Duration::from_millis(500);
        let report = probe("https://example.test/slow", &config);
        assert!(!report.accessible);
        assert_eq!(report.detail, "timed out");
    }

    #[test]
    fn missing_tool_reports_not_accessible() {
        let config = ProbeConfig {
            tool: "/nonexistent/yt-dlp".into(),
            timeout: Duration::from_secs(1),
        };
        let report = probe("https://example.test/alpha", &config);
        assert!(!report.accessible);
        assert!(report.detail.starts_with("not accessible"));
    }

    #[test]
    fn garbage_metadata_is_not_accessible() {
        let dir = tempdir().unwrap();
        let config = install_stub(dir.path(), "echo 'not json at all'");
        let report = probe("https://example.test/alpha", &config);
        assert!(!report.accessible);
    }
}
