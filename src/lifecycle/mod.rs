//! Process lifecycle manager
//!
//! Launches an untrusted snapshot binary in its own process group with a
//! throwaway working directory, and guarantees both are reclaimed: by an
//! explicit [`ProcessHandle::close`], by `Drop`, or by a host-level hook
//! when the host is interrupted, terminated, hung up or exits.
//!
//! Cleanup comes in two flavors that are idempotent with each other:
//! - a non-suspending path (`Inner::close_sync`) usable from exit and
//!   signal hooks: kill the group, remove the directory, never wait on the
//!   child;
//! - the async graceful close, which runs the same steps and then waits for
//!   the process to report exit.
//!
//! Concurrent closes are serialized per handle: a second caller returns
//! only after the first has finished, so a host that exits right after
//! `run_exit_hooks` never leaves a half-removed directory behind.

mod hooks;
mod kill;

pub use hooks::{run_exit_hooks, ExitGuard, INTERRUPTED_EXIT_CODE};
pub use kill::process_exists;

use crate::error::{BisectError, CleanupWarning, Result};
use hooks::SignalHooks;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};

const WORKING_DIR_PREFIX: &str = "snapshot-bisect-profile-";

/// How often [`ProcessHandle::wait`] checks for exit. The child stays
/// inside the handle while waiting so hooks can still kill it.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Flag browsers take to pick their profile directory.
pub const USER_DATA_DIR_FLAG: &str = "--user-data-dir";

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Forward the process's stdout/stderr instead of discarding them.
    pub dump_output: bool,
    pub handle_sigint: bool,
    pub handle_sigterm: bool,
    pub handle_sighup: bool,
    /// Close the process when the host runs its exit hooks.
    pub handle_exit: bool,
    /// Flag used to hand the process its working directory. When the
    /// arguments already carry it, no directory is created.
    pub working_dir_flag: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            dump_output: false,
            handle_sigint: true,
            handle_sigterm: true,
            handle_sighup: true,
            handle_exit: true,
            working_dir_flag: Some(USER_DATA_DIR_FLAG.to_string()),
        }
    }
}

/// Lock that survives poisoning; cleanup must run even after a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the owning handle and its hooks.
pub(crate) struct Inner {
    pid: u32,
    child: Mutex<Child>,
    working_dir: Mutex<Option<TempDir>>,
    hooks: Mutex<Option<SignalHooks>>,
    /// Held for the whole of `close_sync`.
    closing: Mutex<()>,
    closed: AtomicBool,
    kill_sent: AtomicBool,
    kills: AtomicU32,
}

impl Inner {
    fn is_running(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    fn kill_if_running(&self) {
        if !self.is_running() || self.kill_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        self.kills.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pid = self.pid, "killing launched process group");
        if let Err(source) = kill::kill_process_tree(self.pid) {
            CleanupWarning::Kill {
                pid: self.pid,
                source,
            }
            .log();
        }
    }

    fn remove_working_dir(&self) {
        let dir = lock(&self.working_dir).take();
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "removed working directory"),
                Err(source) => CleanupWarning::RemoveDir { path, source }.log(),
            }
        }
    }

    /// Non-suspending close. Every step is best-effort and idempotent.
    ///
    /// Signal listeners stop first; the exit registry entry goes last, after
    /// the kill and the directory removal.
    pub(crate) fn close_sync(&self) {
        let _closing = lock(&self.closing);
        self.closed.store(true, Ordering::SeqCst);

        let mut hooks = lock(&self.hooks).take();
        if let Some(hooks) = hooks.as_mut() {
            hooks.stop_listening();
        }
        self.kill_if_running();
        self.remove_working_dir();
        if let Some(hooks) = hooks {
            hooks.deregister();
        }
    }
}

/// A launched process and its working directory. Dropping the handle
/// without closing it still kills the process and removes the directory.
pub struct ProcessHandle {
    inner: Arc<Inner>,
    working_dir_path: Option<PathBuf>,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("working_dir", &self.working_dir_path)
            .finish()
    }
}

/// Start `executable` with `args`.
///
/// A fresh working directory is created and passed via
/// `options.working_dir_flag` unless `args` already set that flag.
pub async fn launch(executable: &Path, args: &[String], options: &LaunchOptions) -> Result<ProcessHandle> {
    let launch_error = |source: std::io::Error| BisectError::Launch {
        path: executable.to_path_buf(),
        source,
    };

    if !executable.is_file() {
        return Err(launch_error(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "executable not found",
        )));
    }

    let mut args = args.to_vec();
    let working_dir = match options.working_dir_flag.as_deref() {
        Some(flag) if !has_flag(&args, flag) => {
            let dir = tempfile::Builder::new()
                .prefix(WORKING_DIR_PREFIX)
                .tempdir()
                .map_err(launch_error)?;
            args.push(format!("{}={}", flag, dir.path().display()));
            Some(dir)
        }
        _ => None,
    };
    let working_dir_path = working_dir.as_ref().map(|d| d.path().to_path_buf());

    let mut command = Command::new(executable);
    command
        .args(&args)
        .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .kill_on_drop(false);
    if options.dump_output {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    #[cfg(unix)]
    command.process_group(0);

    // On failure the working directory is dropped, and with it removed.
    let child = command.spawn().map_err(launch_error)?;
    let pid = child.id().unwrap_or_default();
    tracing::debug!(
        pid,
        executable = %executable.display(),
        working_dir = ?working_dir_path,
        "launched process"
    );

    let inner = Arc::new(Inner {
        pid,
        child: Mutex::new(child),
        working_dir: Mutex::new(working_dir),
        hooks: Mutex::new(None),
        closing: Mutex::new(()),
        closed: AtomicBool::new(false),
        kill_sent: AtomicBool::new(false),
        kills: AtomicU32::new(0),
    });
    let hooks = SignalHooks::register(&inner, options);
    *lock(&inner.hooks) = Some(hooks);

    Ok(ProcessHandle {
        inner,
        working_dir_path,
        exit_status: None,
    })
}

/// True when `args` already contain `flag`, as `flag=value` or as a bare
/// `flag` followed by its value.
fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| {
        arg == flag
            || arg
                .strip_prefix(flag)
                .is_some_and(|rest| rest.starts_with('='))
    })
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Ephemeral working directory created for this launch, if any.
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir_path.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether the process has exited, on its own or by close.
    pub fn has_exited(&self) -> bool {
        !self.inner.is_running()
    }

    /// Number of kill attempts made for this process.
    pub fn kill_count(&self) -> u32 {
        self.inner.kills.load(Ordering::SeqCst)
    }

    /// Wait for the process to exit, without killing it. Hooks firing
    /// meanwhile still close the process.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        loop {
            let polled = lock(&self.inner.child).try_wait();
            match polled {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    return self.exit_status;
                }
                Ok(None) => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
                Err(err) => {
                    tracing::debug!(pid = self.inner.pid, error = %err, "wait failed");
                    return None;
                }
            }
        }
    }

    /// Deregister hooks, kill the process group if still running, remove
    /// the working directory, then wait for the process to report exit.
    ///
    /// Safe to call any number of times; later calls return the status
    /// observed by the first.
    pub async fn close(&mut self) -> Option<ExitStatus> {
        self.inner.close_sync();
        self.wait().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.inner.close_sync();
    }
}
