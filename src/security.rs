#![forbid(unsafe_code)]

//! Shared security helpers used by the tubegrab binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. Download helpers shell out
/// to third-party tooling against untrusted remote content; running them
/// with full privileges turns any extractor bug into a system-wide problem.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; use an unprivileged account");
    }
    Ok(())
}
