//! Runtime environment detection for the download tooling.
//!
//! The orchestrator never reads the environment on its own; everything it
//! needs to know about where it runs is resolved here, up front, into an
//! [`EnvProfile`] value. The profile only influences default parameters
//! (per-attempt timeouts, failure-message wording), never control flow.

use anyhow::{Context, Result};
use std::{
    env, fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_PROFILE_CONFIG_PATH: &str = "/etc/tubegrab-env";

/// Per-attempt wall-clock limit for a standard run.
pub const STANDARD_ATTEMPT_TIMEOUT_SECS: u64 = 300;
/// Deployments get a larger per-attempt budget; hosted egress is slower and
/// a second cold start costs more than the extra wait.
pub const DEPLOYMENT_ATTEMPT_TIMEOUT_SECS: u64 = 600;

/// Operating system family the tooling runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        match env::consts::OS {
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::MacOs,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Other,
        }
    }
}

/// Hosting platforms we know how to recognize. Only used to pick wording and
/// defaults; an unrecognized platform behaves like a plain server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostingPlatform {
    Render,
    Railway,
    Heroku,
    None,
}

/// Read-only description of the runtime context, passed into the
/// orchestrator at construction.
#[derive(Debug, Clone)]
pub struct EnvProfile {
    pub deployment: bool,
    pub os: OsFamily,
    pub platform: HostingPlatform,
}

impl EnvProfile {
    /// A local, non-deployment profile for the current OS.
    pub fn local() -> Self {
        Self {
            deployment: false,
            os: OsFamily::current(),
            platform: HostingPlatform::None,
        }
    }

    /// Resolves the profile from the default config path plus well-known
    /// platform environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_from(Path::new(DEFAULT_PROFILE_CONFIG_PATH))
    }

    /// Like [`EnvProfile::resolve`] but reading an explicit config file,
    /// which may be absent. Platform env vars still apply; an explicit
    /// `DEPLOYMENT`/`PLATFORM` entry in the file wins over detection.
    pub fn resolve_from(path: &Path) -> Result<Self> {
        let cfg = read_profile_config(path)?.unwrap_or_default();
        let platform = cfg.platform.unwrap_or_else(detect_platform);
        let deployment = cfg
            .deployment
            .unwrap_or(platform != HostingPlatform::None);
        Ok(Self {
            deployment,
            os: OsFamily::current(),
            platform,
        })
    }

    /// Default wall-clock limit for one external-tool attempt.
    pub fn attempt_timeout(&self) -> Duration {
        if self.deployment {
            Duration::from_secs(DEPLOYMENT_ATTEMPT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(STANDARD_ATTEMPT_TIMEOUT_SECS)
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ProfileConfig {
    deployment: Option<bool>,
    platform: Option<HostingPlatform>,
}

/// Parses the `/etc/tubegrab-env` style `KEY=VALUE` file. Returns `None`
/// when the file does not exist so callers can fall back to detection.
fn read_profile_config(path: &Path) -> Result<Option<ProfileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = ProfileConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key {
                "DEPLOYMENT" => {
                    cfg.deployment = Some(matches!(value, "1" | "true" | "yes"));
                }
                "PLATFORM" => {
                    cfg.platform = Some(parse_platform(value));
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

fn parse_platform(value: &str) -> HostingPlatform {
    match value.to_ascii_lowercase().as_str() {
        "render" => HostingPlatform::Render,
        "railway" => HostingPlatform::Railway,
        "heroku" => HostingPlatform::Heroku,
        _ => HostingPlatform::None,
    }
}

/// Checks the environment variables each hosting platform injects into its
/// containers. The first match wins; local machines match none of them.
fn detect_platform() -> HostingPlatform {
    if env::var_os("RENDER").is_some() {
        HostingPlatform::Render
    } else if env::var_os("RAILWAY_ENVIRONMENT").is_some() {
        HostingPlatform::Railway
    } else if env::var_os("DYNO").is_some() {
        HostingPlatform::Heroku
    } else {
        HostingPlatform::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn missing_config_falls_back_to_detection() {
        let profile = EnvProfile::resolve_from(Path::new("/nonexistent/tubegrab-env")).unwrap();
        assert_eq!(profile.os, OsFamily::current());
    }

    #[test]
    fn config_deployment_flag_wins() {
        let cfg = make_config("DEPLOYMENT=\"1\"\n");
        let profile = EnvProfile::resolve_from(cfg.path()).unwrap();
        assert!(profile.deployment);
        assert_eq!(
            profile.attempt_timeout(),
            Duration::from_secs(DEPLOYMENT_ATTEMPT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn config_platform_implies_deployment() {
        let cfg = make_config("PLATFORM=render\n");
        let profile = EnvProfile::resolve_from(cfg.path()).unwrap();
        assert_eq!(profile.platform, HostingPlatform::Render);
        assert!(profile.deployment);
    }

    #[test]
    fn comments_and_unknown_keys_are_ignored() {
        let cfg = make_config("# comment\nUNRELATED=1\nDEPLOYMENT=no\n");
        let profile = EnvProfile::resolve_from(cfg.path()).unwrap();
        assert!(!profile.deployment);
        assert_eq!(
            profile.attempt_timeout(),
            Duration::from_secs(STANDARD_ATTEMPT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn local_profile_uses_standard_timeout() {
        let profile = EnvProfile::local();
        assert!(!profile.deployment);
        assert_eq!(profile.platform, HostingPlatform::None);
        assert_eq!(
            profile.attempt_timeout(),
            Duration::from_secs(STANDARD_ATTEMPT_TIMEOUT_SECS)
        );
    }
}
