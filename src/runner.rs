/// A single run of the simulation: spawn under a PTY, echo output live, and
/// classify the run from the markers it prints (or fails to print in time).
use crate::config::RunnerConfig;
use crate::matcher::{MarkerScanner, ScanError};
use crate::pty::{PtyError, PtySession};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The success marker was seen first.
    Success,
    /// The failure marker was seen first.
    Failure,
    /// Neither marker was seen before the deadline or the end of output.
    Timeout,
}

impl Outcome {
    /// Map a matched marker index to an outcome.
    ///
    /// The scanner only reports indices of the markers it was built from, so
    /// anything else is a bug in the runner.
    fn from_marker(index: usize) -> Self {
        match index {
            0 => Outcome::Success,
            1 => Outcome::Failure,
            other => unreachable!("marker index {other} out of range"),
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
            Outcome::Timeout => 2,
        }
    }

    /// Message reported to the user, if any.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Outcome::Success => None,
            Outcome::Failure => Some("test reported failure"),
            Outcome::Timeout => Some("test timed out"),
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunResult {
    pub outcome: Outcome,
    /// Wall-clock time from spawn until the outcome was decided.
    pub duration: Duration,
    /// Total bytes of child output echoed.
    pub output_bytes: u64,
    /// Child PID (for logging/diagnostics).
    pub pid: u32,
    pub directory: PathBuf,
}

/// Errors that prevent a run from producing an outcome.
#[derive(Debug)]
pub enum RunError {
    /// The marker list could not be turned into a scanner.
    Markers { source: ScanError },
    /// The executable could not be started under a PTY.
    Launch { source: PtyError },
    /// Failed to echo child output.
    Echo { source: std::io::Error },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Markers { source } => write!(f, "invalid markers: {}", source),
            RunError::Launch { source } => write!(f, "{}", source),
            RunError::Echo { source } => write!(f, "failed to echo output: {}", source),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Markers { source } => Some(source),
            RunError::Launch { source } => Some(source),
            RunError::Echo { source } => Some(source),
        }
    }
}

pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run `<directory>/<executable>` with `directory` as its working
    /// directory, echoing everything it prints to `echo`.
    ///
    /// Returns once a marker is seen, the output closes, or the timeout
    /// (measured from spawn) elapses. The child is left running in the
    /// latter two cases.
    pub async fn run<W: Write>(
        &self,
        directory: &Path,
        echo: &mut W,
    ) -> Result<RunResult, RunError> {
        let mut scanner = MarkerScanner::new(&self.config.markers())
            .map_err(|e| RunError::Markers { source: e })?;

        let program = directory.join(&self.config.executable);
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let mut session = PtySession::spawn(&program, directory)
            .map_err(|e| RunError::Launch { source: e })?;
        let pid = session.pid();

        let mut output_bytes = 0u64;
        let outcome = loop {
            let chunk = match timeout_at(deadline, session.recv()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    tracing::warn!(output_bytes, "output closed before any marker");
                    break Outcome::Timeout;
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.config.timeout.as_secs_f64(),
                        "no marker before deadline"
                    );
                    break Outcome::Timeout;
                }
            };

            echo.write_all(&chunk)
                .and_then(|()| echo.flush())
                .map_err(|e| RunError::Echo { source: e })?;
            output_bytes += chunk.len() as u64;

            if let Some(index) = scanner.feed(&chunk) {
                break Outcome::from_marker(index);
            }
        };

        let duration = start.elapsed();
        tracing::debug!(
            ?outcome,
            pid,
            output_bytes,
            duration_secs = duration.as_secs(),
            "run finished"
        );

        Ok(RunResult {
            outcome,
            duration,
            output_bytes,
            pid,
            directory: directory.to_path_buf(),
        })
    }
}
