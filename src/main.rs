//! snapshot-bisect - find the browser snapshot where a behavior changed
//!
//! Bisects prebuilt Chromium snapshots between a known-good and a
//! known-bad revision, either asking after each launch or running a test
//! script against every candidate.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use snapshot_bisect::bisect::{BisectObserver, Bisector, Step, StopReason};
use snapshot_bisect::config::Config;
use snapshot_bisect::crrev::CommitResolver;
use snapshot_bisect::evaluate::{
    Evaluator, InteractiveEvaluator, Outcome, ScriptCommand, ScriptedEvaluator,
};
use snapshot_bisect::lifecycle::{ExitGuard, LaunchOptions};
use snapshot_bisect::logging;
use snapshot_bisect::revision::{Revision, SearchInterval};
use snapshot_bisect::store::{Progress, SnapshotStore};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

/// Oldest revision assumed good when `--good` is not given.
const DEFAULT_GOOD_REVISION: u64 = 577361;

#[derive(Parser, Debug)]
#[command(
    name = "snapshot-bisect",
    about = "Bisect prebuilt Chromium snapshots",
    long_about = "Binary search over prebuilt Chromium snapshots.\n\n\
                  Each candidate is judged by hand (--manual), by a shell\n\
                  command (--shell) or by a script. Commands and scripts see\n\
                  the snapshot's executable in PUPPETEER_EXECUTABLE_PATH and\n\
                  CHROME_PATH; exit code 0 means good.",
    version
)]
struct Args {
    /// Launch each snapshot and ask whether it is good or bad
    #[arg(long)]
    manual: bool,

    /// Known good revision
    #[arg(long, value_name = "REV", default_value_t = Revision(DEFAULT_GOOD_REVISION))]
    good: Revision,

    /// Known bad revision (defaults to the latest snapshot)
    #[arg(long, value_name = "REV")]
    bad: Option<Revision>,

    /// Shell command judging each snapshot
    #[arg(long, value_name = "CMD")]
    shell: Option<String>,

    /// Script judging each snapshot (.js, .py, .sh or an executable)
    script: Option<PathBuf>,

    /// Forward the launched browser's stdout/stderr in manual mode
    #[arg(long)]
    dumpio: bool,

    /// Log what the search is doing to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn evaluator(&self) -> Result<Box<dyn Evaluator>> {
        let sources = [self.manual, self.shell.is_some(), self.script.is_some()];
        if sources.iter().filter(|set| **set).count() != 1 {
            anyhow::bail!("Specify exactly one of --manual, --shell <CMD> or a script path");
        }

        if self.manual {
            let options = LaunchOptions {
                dump_output: self.dumpio,
                ..LaunchOptions::default()
            };
            return Ok(Box::new(InteractiveEvaluator::stdio(options)));
        }
        let command = match (&self.shell, &self.script) {
            (Some(cmd), _) => ScriptCommand::Shell(cmd.clone()),
            (None, Some(path)) => ScriptCommand::Script(path.clone()),
            (None, None) => anyhow::bail!("No evaluation command given"),
        };
        Ok(Box::new(ScriptedEvaluator::new(command)))
    }
}

/// Prints step lines on stdout and download progress on stderr.
struct TerminalReporter {
    color: bool,
    last_progress: Mutex<Option<(Revision, u8)>>,
}

impl TerminalReporter {
    fn new() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
            last_progress: Mutex::new(None),
        }
    }
}

impl BisectObserver for TerminalReporter {
    fn on_step(&self, step: &Step) {
        let line = step.to_string();
        if !self.color {
            println!("{}", line);
            return;
        }
        match step.outcome {
            Outcome::Good => println!("{}", line.green()),
            Outcome::Bad => println!("{}", line.red()),
        }
    }

    fn on_download(&self, revision: Revision, progress: Progress) {
        let Some(percent) = progress.percent() else {
            return;
        };
        let mut last = self
            .last_progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last == Some((revision, percent)) {
            return;
        }
        *last = Some((revision, percent));
        eprint!("\r  Downloading r{}... {:>3}%", revision, percent);
        if percent == 100 {
            eprintln!();
        }
    }
}

#[cfg(unix)]
fn spawn_shutdown_listener() -> Result<()> {
    use snapshot_bisect::lifecycle::{run_exit_hooks, INTERRUPTED_EXIT_CODE};
    use tokio::signal::unix::{signal, SignalKind};

    // Once a launch has hooked these signals their default action is gone
    // for the rest of the run, so the host has to exit on its own.
    let mut int = signal(SignalKind::interrupt()).context("Failed to listen for SIGINT")?;
    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    let mut hup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    tokio::spawn(async move {
        let code = tokio::select! {
            _ = int.recv() => INTERRUPTED_EXIT_CODE,
            _ = term.recv() => 128 + libc::SIGTERM,
            _ = hup.recv() => 128 + libc::SIGHUP,
        };
        run_exit_hooks();
        std::process::exit(code);
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_shutdown_listener() -> Result<()> {
    Ok(())
}

async fn report_range(interval: &SearchInterval) {
    let changelog = match CommitResolver::new() {
        Ok(resolver) => resolver.changelog(interval).await,
        Err(err) => Err(err),
    };
    match changelog {
        Ok(url) => println!("RANGE: {}", url),
        Err(err) => {
            tracing::warn!(error = %err, "could not resolve commits for the final range");
            eprintln!("  Warning: could not resolve commits ({})", err);
            println!("RANGE: r{}..r{}", interval.low(), interval.high());
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut evaluator = args.evaluator()?;

    let config = Config::load();
    let platform = config.platform()?;
    let store = SnapshotStore::new(config.base_url(), platform, config.cache_dir())?;
    tracing::debug!(
        %platform,
        cache = %store.cache_dir().display(),
        config = %Config::config_location(),
        "snapshot store ready"
    );

    let good = args.good;
    let bad = match args.bad {
        Some(bad) => bad,
        None => store
            .latest_revision()
            .await
            .context("Failed to look up the latest snapshot; pass --bad explicitly")?,
    };
    if good == bad {
        anyhow::bail!("--good and --bad are both r{}", good);
    }

    let initial = SearchInterval::new(good, bad);
    println!(
        "Bisecting {} - {} revisions and ~{} iterations",
        initial,
        initial.span(),
        initial.estimated_iterations()
    );

    let reporter = TerminalReporter::new();
    let result = Bisector::new(&store)
        .with_observer(&reporter)
        .run(good, bad, evaluator.as_mut())
        .await?;

    if result.stop == StopReason::NoCandidate {
        tracing::debug!(steps = result.steps.len(), "no snapshot left between the bounds");
    }
    report_range(&result.interval).await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);
    let _exit_guard = ExitGuard::install();

    let outcome = match spawn_shutdown_listener() {
        Ok(()) => run(args).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
