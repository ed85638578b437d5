//! Evaluators
//!
//! An evaluator reduces one snapshot to a good/bad verdict, either by
//! asking a person or by running an external script against it.

use crate::error::{BisectError, Result};
use crate::lifecycle::{self, LaunchOptions};
use crate::store::Artifact;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Variables carrying the executable under test to scripted evaluators.
pub const EXECUTABLE_PATH_ENV_VARS: [&str; 2] = ["PUPPETEER_EXECUTABLE_PATH", "CHROME_PATH"];

/// Flags that keep a launched browser from stopping on first-run UI.
const BROWSER_LAUNCH_ARGS: [&str; 2] = ["--no-first-run", "--no-default-browser-check"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Good,
    Bad,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Good => "GOOD",
            Outcome::Bad => "BAD",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Evaluator: Send {
    async fn evaluate(&mut self, artifact: &Artifact) -> Result<Outcome>;
}

/// Map a free-text answer to an outcome. Case and surrounding whitespace
/// are ignored; anything unrecognized is `None`.
pub fn parse_answer(answer: &str) -> Option<Outcome> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "good" | "g" | "yes" | "y" => Some(Outcome::Good),
        "bad" | "b" | "no" | "n" => Some(Outcome::Bad),
        _ => None,
    }
}

/// Asks on `output` and reads the verdict from `input`.
///
/// With `launch` set, the snapshot is started first and closed once the
/// answer is in.
pub struct InteractiveEvaluator<R, W> {
    input: R,
    output: W,
    launch: Option<LaunchOptions>,
}

impl InteractiveEvaluator<tokio::io::BufReader<tokio::io::Stdin>, std::io::Stdout> {
    /// Prompt on the terminal and launch every snapshot.
    pub fn stdio(options: LaunchOptions) -> Self {
        Self::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            std::io::stdout(),
        )
        .with_launch(options)
    }
}

impl<R, W> InteractiveEvaluator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            launch: None,
        }
    }

    pub fn with_launch(mut self, options: LaunchOptions) -> Self {
        self.launch = Some(options);
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    async fn ask(&mut self) -> Result<Outcome> {
        let mut line = String::new();
        loop {
            write!(self.output, "Is this revision good or bad? (g/b) ").map_err(BisectError::Prompt)?;
            self.output.flush().map_err(BisectError::Prompt)?;

            line.clear();
            let read = self
                .input
                .read_line(&mut line)
                .await
                .map_err(BisectError::Prompt)?;
            if read == 0 {
                return Err(BisectError::Prompt(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "input closed before an answer was given",
                )));
            }
            if let Some(outcome) = parse_answer(&line) {
                return Ok(outcome);
            }
            writeln!(self.output, "Please answer good or bad.").map_err(BisectError::Prompt)?;
        }
    }
}

#[async_trait]
impl<R, W> Evaluator for InteractiveEvaluator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn evaluate(&mut self, artifact: &Artifact) -> Result<Outcome> {
        writeln!(self.output, "{}", artifact.executable_path.display()).map_err(BisectError::Prompt)?;

        let mut handle = match &self.launch {
            Some(options) => {
                let args: Vec<String> = BROWSER_LAUNCH_ARGS.iter().map(|a| a.to_string()).collect();
                Some(lifecycle::launch(&artifact.executable_path, &args, options).await?)
            }
            None => None,
        };

        let outcome = self.ask().await;
        if let Some(handle) = handle.as_mut() {
            handle.close().await;
        }
        outcome
    }
}

/// What a scripted evaluation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// A script file, run through the interpreter its extension implies.
    Script(PathBuf),
    /// A command line run by the platform shell.
    Shell(String),
}

impl ScriptCommand {
    fn program_and_args(&self) -> (String, Vec<String>) {
        match self {
            ScriptCommand::Script(path) => {
                // A bare `check` means the file here, not a lookup on PATH.
                let resolved = std::path::absolute(path).unwrap_or_else(|_| path.clone());
                let path_arg = resolved.display().to_string();
                match interpreter_for(path) {
                    Some(interpreter) => (interpreter.to_string(), vec![path_arg]),
                    None => (path_arg, Vec::new()),
                }
            }
            ScriptCommand::Shell(cmd) => shell_invocation(cmd),
        }
    }

    fn describe(&self) -> String {
        match self {
            ScriptCommand::Script(path) => path.display().to_string(),
            ScriptCommand::Shell(cmd) => cmd.clone(),
        }
    }
}

fn interpreter_for(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "js" | "mjs" | "cjs" => Some("node"),
        "py" => Some("python3"),
        "sh" => Some("sh"),
        _ => None,
    }
}

#[cfg(windows)]
fn shell_invocation(cmd: &str) -> (String, Vec<String>) {
    ("cmd".to_string(), vec!["/C".to_string(), cmd.to_string()])
}

#[cfg(not(windows))]
fn shell_invocation(cmd: &str) -> (String, Vec<String>) {
    ("sh".to_string(), vec!["-c".to_string(), cmd.to_string()])
}

/// Runs an external command per snapshot; exit status 0 is good, anything
/// else is bad.
#[derive(Debug, Clone)]
pub struct ScriptedEvaluator {
    command: ScriptCommand,
}

impl ScriptedEvaluator {
    pub fn new(command: ScriptCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&mut self, artifact: &Artifact) -> Result<Outcome> {
        let (program, args) = self.command.program_and_args();
        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for var in EXECUTABLE_PATH_ENV_VARS {
            command.env(var, &artifact.executable_path);
        }

        tracing::debug!(revision = %artifact.revision, %program, ?args, "running evaluator");
        let status = command
            .status()
            .await
            .map_err(|source| BisectError::EvaluationSpawn {
                command: self.command.describe(),
                source,
            })?;
        tracing::debug!(revision = %artifact.revision, %status, "evaluator finished");

        Ok(if status.success() {
            Outcome::Good
        } else {
            Outcome::Bad
        })
    }
}
