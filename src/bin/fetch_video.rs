#![forbid(unsafe_code)]

//! Command-line front-end for the multi-strategy download engine.
//!
//! Takes a video URL and a destination path, resolves the runtime profile,
//! and walks the fallback ladder until a strategy produces a playable file.
//! `--probe-only` answers the cheaper question "is this video reachable at
//! all" without downloading anything.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tubegrab_tools::env_profile::EnvProfile;
use tubegrab_tools::orchestrator::{Orchestrator, OrchestratorConfig};
use tubegrab_tools::probe::{ProbeConfig, ensure_tool_available, probe};
use tubegrab_tools::security::ensure_not_root;

const EXTERNAL_TOOL: &str = "yt-dlp";

#[derive(Parser, Debug)]
#[command(author, version, about = "Download a video, falling back across client emulations.")]
struct Cli {
    /// Video URL to fetch.
    url: String,
    /// Destination file path. Required unless --probe-only is given.
    destination: Option<PathBuf>,
    #[arg(
        long = "probe-only",
        help = "Only check whether the video is accessible"
    )]
    probe_only: bool,
    #[arg(long = "json", help = "Emit the outcome as JSON on stdout")]
    json: bool,
    #[arg(
        long = "config",
        value_name = "PATH",
        help = "Environment profile config file for downloads, unused with --probe-only (default /etc/tubegrab-env)"
    )]
    config: Option<PathBuf>,
    #[arg(
        long = "attempt-timeout",
        value_name = "SECONDS",
        help = "Override the per-attempt (or probe) wall-clock limit"
    )]
    attempt_timeout: Option<u64>,
    #[arg(short = 'q', long = "quiet", help = "Suppress per-attempt progress lines")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ensure_not_root("fetch_video")?;
    ensure_tool_available(EXTERNAL_TOOL)?;

    if cli.probe_only {
        return run_probe(&cli);
    }

    let destination = cli
        .destination
        .clone()
        .context("a destination path is required unless --probe-only is given")?;

    let profile = match &cli.config {
        Some(path) => EnvProfile::resolve_from(path)
            .with_context(|| format!("resolving profile from {}", path.display()))?,
        None => EnvProfile::resolve().context("resolving environment profile")?,
    };

    let mut config = OrchestratorConfig::new(profile);
    config.tool = EXTERNAL_TOOL.into();
    if let Some(secs) = cli.attempt_timeout {
        config.attempt_timeout = Some(Duration::from_secs(secs));
    }

    let mut progress = |line: &str| {
        if !cli.quiet {
            println!("{line}");
        }
    };

    let outcome =
        Orchestrator::new(config).run(&cli.url, &destination, Some(&mut progress));

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.success {
        println!(
            "Downloaded via {} -> {}",
            outcome.strategy.as_deref().unwrap_or("unknown"),
            destination.display()
        );
    } else {
        eprintln!(
            "{}",
            outcome
                .failure_message
                .as_deref()
                .unwrap_or("Download failed")
        );
        for attempt in &outcome.attempts {
            eprintln!(
                "  {} failed ({}): {}",
                attempt.strategy,
                attempt
                    .exit_code
                    .map(|c| format!("exit {c}"))
                    .unwrap_or_else(|| "no exit code".into()),
                attempt.diagnostic
            );
        }
    }

    if outcome.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn probe_config_from(cli: &Cli) -> ProbeConfig {
    let mut config = ProbeConfig::default();
    if let Some(secs) = cli.attempt_timeout {
        config.timeout = Duration::from_secs(secs);
    }
    config
}

fn run_probe(cli: &Cli) -> Result<()> {
    let report = probe(&cli.url, &probe_config_from(cli));
    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "accessible": report.accessible,
                "detail": report.detail,
            })
        );
    } else if report.accessible {
        println!("Accessible: {}", report.detail);
    } else {
        println!("Not accessible: {}", report.detail);
    }

    if report.accessible {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
