//! Multi-strategy download orchestration.
//!
//! The orchestrator walks the strategy ladder built by
//! [`crate::strategy::build_strategy_table`], running each configuration as
//! an isolated external-process invocation with a wall-clock timeout. The
//! first strategy that produces a viable file wins; every failure mode short
//! of that is an expected, enumerable outcome recorded in an
//! [`AttemptResult`] and recovered by moving on. `run` always returns a
//! [`DownloadOutcome`]; it never errors out of an attempt.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::cookies::EphemeralCookieJar;
use crate::env_profile::EnvProfile;
use crate::strategy::{Strategy, build_strategy_table};

/// An output file must exceed this many bytes to count as a download; files
/// at or under it are stub pages or aborted transfers, never playable video.
pub const MIN_VIABLE_FILE_SIZE: u64 = 1024;

/// Captured stderr is truncated to roughly this many characters before being
/// stored on the attempt record.
const DIAGNOSTIC_LIMIT: usize = 200;

/// How a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    NonZeroExit,
    UndersizedOutput,
    Timeout,
    LaunchFailed,
}

/// Outcome of executing one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub strategy: String,
    pub succeeded: bool,
    pub file_size: Option<u64>,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    /// Truncated stderr (or launch error text) for diagnostics.
    pub diagnostic: String,
    pub elapsed_secs: f64,
}

/// Terminal result of an orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub success: bool,
    /// Name of the strategy that succeeded, when one did.
    pub strategy: Option<String>,
    pub file: Option<PathBuf>,
    /// Every attempt, in order, for diagnostics.
    pub attempts: Vec<AttemptResult>,
    /// Human-readable explanation when all strategies failed.
    pub failure_message: Option<String>,
}

/// Explicit configuration for an [`Orchestrator`]. Everything the run needs
/// to know arrives here; the orchestrator itself performs no environment
/// lookups.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub profile: EnvProfile,
    /// Invocation name or path of the external tool.
    pub tool: String,
    /// Overrides the profile's default per-attempt wall-clock limit.
    pub attempt_timeout: Option<Duration>,
    /// Base of the jittered inter-attempt backoff window. Zero disables
    /// backoff entirely (used by tests).
    pub backoff_base_secs: u64,
    pub min_viable_size: u64,
    /// Seed for the jitter/user-agent RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Directory for the ephemeral cookie jar; `None` uses the system temp
    /// directory. Tests point this at a private dir to observe cleanup.
    pub cookie_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    pub fn new(profile: EnvProfile) -> Self {
        Self {
            profile,
            tool: "yt-dlp".into(),
            attempt_timeout: None,
            backoff_base_secs: 2,
            min_viable_size: MIN_VIABLE_FILE_SIZE,
            rng_seed: None,
            cookie_dir: None,
        }
    }
}

/// Sequential, single-threaded download engine. One instance per logical
/// download source; each [`Orchestrator::run`] call owns its destination
/// path exclusively for the duration of the run.
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// Runs the full strategy ladder against `url`, writing the artifact to
    /// `destination`. Strategies are tried strictly one at a time; the first
    /// viable file stops the loop. Returns an outcome in every case,
    /// including when the external tool is missing entirely.
    pub fn run(
        &self,
        url: &str,
        destination: &Path,
        mut on_progress: Option<&mut dyn FnMut(&str)>,
    ) -> DownloadOutcome {
        let mut rng = match self.config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        // The jar guard lives for the whole run; drop removes the file on
        // every exit path, success and exhaustion alike. A jar that cannot
        // be created just means the web strategies run cookie-less.
        let jar = match &self.config.cookie_dir {
            Some(dir) => EphemeralCookieJar::create_in(dir, &crate::cookies::default_consent_records()),
            None => EphemeralCookieJar::with_default_consent(),
        };
        let jar = match jar {
            Ok(jar) => Some(jar),
            Err(err) => {
                eprintln!("  Warning: could not create cookie jar: {err:#}");
                None
            }
        };

        let strategies = build_strategy_table(
            &self.config.profile,
            jar.as_ref().map(|j| j.path()),
            &mut rng,
        );
        let total = strategies.len();
        let timeout = self
            .config
            .attempt_timeout
            .unwrap_or_else(|| self.config.profile.attempt_timeout());

        let mut attempts = Vec::with_capacity(total);

        for (index, strategy) in strategies.iter().enumerate() {
            if let Some(progress) = on_progress.as_deref_mut() {
                progress(&format!(
                    "Attempt {}/{}: {}",
                    index + 1,
                    total,
                    strategy.name
                ));
            }

            // A stale or partial file from a previous attempt must never be
            // mistaken for this attempt's output.
            remove_stale_file(destination);

            let attempt = self.run_attempt(strategy, url, destination, timeout);
            let succeeded = attempt.succeeded;
            attempts.push(attempt);

            if succeeded {
                return DownloadOutcome {
                    success: true,
                    strategy: Some(strategy.name.to_string()),
                    file: Some(destination.to_path_buf()),
                    attempts,
                    failure_message: None,
                };
            }

            if index + 1 < total {
                let delay = backoff_delay(self.config.backoff_base_secs, index, &mut rng);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        DownloadOutcome {
            success: false,
            strategy: None,
            file: None,
            attempts,
            failure_message: Some(aggregate_failure_message(&self.config.profile)),
        }
    }

    /// Executes one strategy and classifies the result. Never returns an
    /// error: launch failures, timeouts, and bad exits all become failed
    /// attempt records.
    fn run_attempt(
        &self,
        strategy: &Strategy,
        url: &str,
        destination: &Path,
        timeout: Duration,
    ) -> AttemptResult {
        let started = Instant::now();
        let args = strategy.to_args(url, destination);

        let child = Command::new(&self.config.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(err) => {
                return AttemptResult {
                    strategy: strategy.name.to_string(),
                    succeeded: false,
                    file_size: None,
                    exit_code: None,
                    failure: Some(FailureKind::LaunchFailed),
                    diagnostic: truncate(&format!(
                        "failed to start {}: {}",
                        self.config.tool, err
                    )),
                    elapsed_secs: started.elapsed().as_secs_f64(),
                };
            }
        };

        let output = match wait_with_timeout(child, timeout) {
            WaitResult::Finished(output) => output,
            WaitResult::TimedOut => {
                return AttemptResult {
                    strategy: strategy.name.to_string(),
                    succeeded: false,
                    file_size: None,
                    exit_code: None,
                    failure: Some(FailureKind::Timeout),
                    diagnostic: format!("timed out after {}s", timeout.as_secs()),
                    elapsed_secs: started.elapsed().as_secs_f64(),
                };
            }
            WaitResult::WaitFailed(err) => {
                return AttemptResult {
                    strategy: strategy.name.to_string(),
                    succeeded: false,
                    file_size: None,
                    exit_code: None,
                    failure: Some(FailureKind::LaunchFailed),
                    diagnostic: truncate(&format!("waiting on {}: {}", self.config.tool, err)),
                    elapsed_secs: started.elapsed().as_secs_f64(),
                };
            }
        };

        let elapsed_secs = started.elapsed().as_secs_f64();
        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            remove_stale_file(destination);
            return AttemptResult {
                strategy: strategy.name.to_string(),
                succeeded: false,
                file_size: None,
                exit_code,
                failure: Some(FailureKind::NonZeroExit),
                diagnostic: truncate(stderr.trim()),
                elapsed_secs,
            };
        }

        // Exit code zero alone proves nothing; the tool sometimes exits
        // cleanly after writing an empty or truncated file.
        let file_size = fs::metadata(destination).map(|m| m.len()).ok();
        match file_size {
            Some(size) if size > self.config.min_viable_size => AttemptResult {
                strategy: strategy.name.to_string(),
                succeeded: true,
                file_size: Some(size),
                exit_code,
                failure: None,
                diagnostic: String::new(),
                elapsed_secs,
            },
            Some(size) => {
                remove_stale_file(destination);
                AttemptResult {
                    strategy: strategy.name.to_string(),
                    succeeded: false,
                    file_size: Some(size),
                    exit_code,
                    failure: Some(FailureKind::UndersizedOutput),
                    diagnostic: format!("output file too small ({} bytes)", size),
                    elapsed_secs,
                }
            }
            None => AttemptResult {
                strategy: strategy.name.to_string(),
                succeeded: false,
                file_size: None,
                exit_code,
                failure: Some(FailureKind::UndersizedOutput),
                diagnostic: "tool exited cleanly but produced no file".into(),
                elapsed_secs,
            },
        }
    }
}

pub(crate) enum WaitResult {
    Finished(Output),
    TimedOut,
    WaitFailed(std::io::Error),
}

/// Waits for a child process with a wall-clock deadline, polling `try_wait`.
/// Both pipes are drained on reader threads for the whole wait: a child
/// whose stderr exceeds the pipe buffer would otherwise block on write and
/// never reach its exit, turning a finished download into a bogus timeout.
/// On expiry the child is killed and reaped; cancellation happens only at
/// this process boundary.
pub(crate) fn wait_with_timeout(mut child: Child, timeout: Duration) -> WaitResult {
    let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
    let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return WaitResult::Finished(Output {
                    status,
                    stdout: collect_pipe(stdout_reader),
                    stderr: collect_pipe(stderr_reader),
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Reader threads see EOF once the child is reaped and
                    // its pipe ends close; dropping the handles detaches
                    // them.
                    return WaitResult::TimedOut;
                }
                thread::sleep(Duration::from_millis(100));
            }
            Err(err) => return WaitResult::WaitFailed(err),
        }
    }
}

fn spawn_pipe_reader<R>(mut pipe: R) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect_pipe(reader: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Uniform random delay whose window widens with the attempt index, so
/// consecutive failures look less like a hammering bot. Base of zero
/// disables backoff.
fn backoff_delay(base_secs: u64, attempt_index: usize, rng: &mut SmallRng) -> Duration {
    if base_secs == 0 {
        return Duration::ZERO;
    }
    let low = base_secs;
    let high = base_secs * (attempt_index as u64 + 2);
    Duration::from_millis(rng.gen_range(low * 1000..=high * 1000))
}

/// Best-effort removal of a leftover artifact. Failure to delete is logged
/// at most and never escalated.
fn remove_stale_file(path: &Path) {
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        eprintln!("  Warning: could not remove stale file {}: {}", path.display(), err);
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= DIAGNOSTIC_LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(DIAGNOSTIC_LIMIT).collect();
        format!("{cut}...")
    }
}

/// Exhaustion message. Deployments enumerate the infrastructure causes worth
/// checking; locally the video itself is the likelier problem.
fn aggregate_failure_message(profile: &EnvProfile) -> String {
    if profile.deployment {
        "All download strategies failed. Likely causes: outbound network policy \
         blocking media CDNs, TLS interception mismatch, datacenter IP routing \
         flagged by the remote service, or a missing yt-dlp/ffmpeg dependency \
         in the deployment image."
            .to_string()
    } else {
        "All download strategies failed. The video may be restricted or \
         unavailable; try a different video."
            .to_string()
    }
}
