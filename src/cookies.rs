//! Ephemeral cookie-jar handling.
//!
//! Strategies that emulate a web client attach a short-lived Netscape-format
//! cookie file to lower bot-detection friction. The jar lives in a temp file
//! owned by [`EphemeralCookieJar`]; it is written once per orchestration run
//! and removed when the guard drops, no matter how the run ends.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// One line of a Netscape cookie jar.
#[derive(Debug, Clone)]
pub struct CookieRecord {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure_only: bool,
    pub expiry_epoch: i64,
    pub name: String,
    pub value: String,
}

impl CookieRecord {
    /// Renders the record as a tab-separated jar line, the layout both
    /// yt-dlp and curl understand.
    pub fn render(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.include_subdomains),
            self.path,
            flag(self.secure_only),
            self.expiry_epoch,
            self.name,
            self.value,
        )
    }
}

fn flag(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

/// Temp-file backed cookie jar. Dropping the guard deletes the file, so the
/// credential material never outlives the run that created it. Deletion
/// failures are best-effort and swallowed by the temp-file implementation.
#[derive(Debug)]
pub struct EphemeralCookieJar {
    file: NamedTempFile,
}

impl EphemeralCookieJar {
    /// Writes `records` into a fresh temp file, header included.
    pub fn create(records: &[CookieRecord]) -> Result<Self> {
        let file = NamedTempFile::new().context("creating temporary cookie jar")?;
        Self::fill(file, records)
    }

    /// Like [`EphemeralCookieJar::create`] but placing the jar in `dir`
    /// instead of the system temp directory, so callers (and tests) can
    /// observe the jar's lifetime.
    pub fn create_in(dir: &Path, records: &[CookieRecord]) -> Result<Self> {
        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating cookie jar in {}", dir.display()))?;
        Self::fill(file, records)
    }

    fn fill(mut file: NamedTempFile, records: &[CookieRecord]) -> Result<Self> {
        writeln!(file, "# Netscape HTTP Cookie File").context("writing cookie jar header")?;
        for record in records {
            writeln!(file, "{}", record.render())
                .with_context(|| format!("writing cookie {}", record.name))?;
        }
        file.flush().context("flushing cookie jar")?;
        Ok(Self { file })
    }

    /// Jar with the stock consent payload.
    pub fn with_default_consent() -> Result<Self> {
        Self::create(&default_consent_records())
    }

    /// Location of the jar on disk, valid for the lifetime of the guard.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// The generic consent/preference cookies a first-time browser session would
/// carry. Nothing account-specific; just enough to skip the consent
/// interstitial that breaks anonymous extraction.
pub fn default_consent_records() -> Vec<CookieRecord> {
    let expiry = (Utc::now() + ChronoDuration::days(180)).timestamp();
    vec![
        CookieRecord {
            domain: ".youtube.com".into(),
            include_subdomains: true,
            path: "/".into(),
            secure_only: false,
            expiry_epoch: expiry,
            name: "CONSENT".into(),
            value: "YES+cb.20210328-17-p0.en+FX+999".into(),
        },
        CookieRecord {
            domain: ".youtube.com".into(),
            include_subdomains: true,
            path: "/".into(),
            secure_only: false,
            expiry_epoch: expiry,
            name: "SOCS".into(),
            value: "CAISEwgDEgk0ODE3Nzk3MjQaAmVuIAEaBgiA_LyaBg".into(),
        },
        CookieRecord {
            domain: ".youtube.com".into(),
            include_subdomains: true,
            path: "/".into(),
            secure_only: false,
            expiry_epoch: expiry,
            name: "PREF".into(),
            value: "hl=en&tz=UTC".into(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn render_produces_tab_separated_line() {
        let record = CookieRecord {
            domain: ".example.com".into(),
            include_subdomains: true,
            path: "/".into(),
            secure_only: false,
            expiry_epoch: 1_700_000_000,
            name: "CONSENT".into(),
            value: "YES".into(),
        };
        assert_eq!(
            record.render(),
            ".example.com\tTRUE\t/\tFALSE\t1700000000\tCONSENT\tYES"
        );
    }

    #[test]
    fn jar_writes_header_and_records() {
        let jar = EphemeralCookieJar::with_default_consent().unwrap();
        let content = fs::read_to_string(jar.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("# Netscape HTTP Cookie File"));
        assert!(content.contains("CONSENT"));
        assert!(content.contains("SOCS"));
        assert_eq!(content.lines().count(), 1 + default_consent_records().len());
    }

    #[test]
    fn jar_file_is_removed_on_drop() {
        let path = {
            let jar = EphemeralCookieJar::with_default_consent().unwrap();
            jar.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn create_in_places_the_jar_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let jar = EphemeralCookieJar::create_in(dir.path(), &default_consent_records()).unwrap();
        assert_eq!(jar.path().parent(), Some(dir.path()));
        drop(jar);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn default_records_expire_in_the_future() {
        let now = Utc::now().timestamp();
        for record in default_consent_records() {
            assert!(record.expiry_epoch > now);
        }
    }
}
