mod config;
mod matcher;
mod pty;
mod runner;

use clap::Parser;
use config::RunnerConfig;
use runner::Runner;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for runs that never produced an outcome (e.g. spawn failures).
const EXIT_ERROR: u8 = 3;

/// Run a simulated test harness under a pseudo-terminal, echo its output,
/// and exit according to the marker it prints: success, failure, or timeout.
#[derive(Parser, Debug)]
#[command(name = "simulate-runner", version, about)]
pub struct Cli {
    /// Directory containing the `simulate` executable; also its working directory
    #[arg(value_name = "DIR")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the child's output, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let runner = Runner::new(RunnerConfig::default());
    let mut stdout = std::io::stdout();

    let result = match runner.run(&cli.dir, &mut stdout).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, dir = %cli.dir.display(), "run failed");
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    tracing::info!(
        outcome = ?result.outcome,
        pid = result.pid,
        output_bytes = result.output_bytes,
        duration_secs = result.duration.as_secs_f64(),
        dir = %result.directory.display(),
        "simulation finished"
    );

    // Child output rarely ends on a fresh line.
    let _ = writeln!(stdout);
    let _ = stdout.flush();

    if let Some(message) = result.outcome.message() {
        eprintln!("> {message}");
    }
    ExitCode::from(result.outcome.exit_code())
}
