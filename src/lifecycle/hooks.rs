//! Host-level cleanup hooks
//!
//! A launched process must not outlive the host. Each handle registers
//! listeners for interrupt, terminate and hangup plus an entry in the
//! process-wide exit registry. All of them are collected in one
//! [`SignalHooks`] value owned by the handle. Close stops the signal
//! listeners first and leaves the exit registry last, once the process is
//! killed and its directory removed.

use super::{lock, Inner, LaunchOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tokio::task::JoinHandle;

/// Conventional status of a process terminated by SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

static EXIT_REGISTRY: OnceLock<Mutex<HashMap<u64, Weak<Inner>>>> = OnceLock::new();
static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

fn exit_registry() -> &'static Mutex<HashMap<u64, Weak<Inner>>> {
    EXIT_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl HookSignal {
    fn name(self) -> &'static str {
        match self {
            HookSignal::Interrupt => "SIGINT",
            HookSignal::Terminate => "SIGTERM",
            HookSignal::Hangup => "SIGHUP",
        }
    }
}

/// Everything registered on behalf of one launched process.
pub(crate) struct SignalHooks {
    tasks: Vec<JoinHandle<()>>,
    exit_id: Option<u64>,
}

impl SignalHooks {
    pub(crate) fn register(inner: &Arc<Inner>, options: &LaunchOptions) -> SignalHooks {
        let wanted = [
            (options.handle_sigint, HookSignal::Interrupt),
            (options.handle_sigterm, HookSignal::Terminate),
            (options.handle_sighup, HookSignal::Hangup),
        ];

        let mut tasks = Vec::new();
        for (enabled, kind) in wanted {
            if !enabled {
                continue;
            }
            match spawn_signal_hook(kind, Arc::downgrade(inner)) {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(signal = kind.name(), error = %err, "could not install signal hook");
                }
            }
        }

        let exit_id = options.handle_exit.then(|| {
            let id = NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed);
            lock(exit_registry()).insert(id, Arc::downgrade(inner));
            id
        });

        SignalHooks { tasks, exit_id }
    }

    /// Stop the signal listeners. The exit entry stays until
    /// [`SignalHooks::deregister`], so a concurrent `run_exit_hooks` still
    /// finds the handle and waits for its close to finish.
    pub(crate) fn stop_listening(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub(crate) fn deregister(mut self) {
        self.stop_listening();
        if let Some(id) = self.exit_id.take() {
            lock(exit_registry()).remove(&id);
        }
    }
}

/// Close every launched process that registered an exit hook and has not
/// been closed yet. Blocks until closes already running on other threads
/// are done, so it is safe to call right before `std::process::exit`.
pub fn run_exit_hooks() {
    let pending: Vec<Weak<Inner>> = lock(exit_registry()).drain().map(|(_, hook)| hook).collect();
    for hook in pending {
        if let Some(inner) = hook.upgrade() {
            tracing::debug!(pid = inner.pid, "host exiting, closing launched process");
            inner.close_sync();
        }
    }
}

/// Runs the exit hooks when the host leaves `main`, including by panic.
///
/// Install once, at the top of `main`, and keep it alive for the whole run.
pub struct ExitGuard {
    _private: (),
}

impl ExitGuard {
    pub fn install() -> Self {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            run_exit_hooks();
            previous(info);
        }));
        ExitGuard { _private: () }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        run_exit_hooks();
    }
}

fn on_host_signal(kind: HookSignal, inner: &Weak<Inner>) {
    if let Some(inner) = inner.upgrade() {
        tracing::debug!(signal = kind.name(), pid = inner.pid, "host signal, closing launched process");
        inner.close_sync();
    }
    if kind == HookSignal::Interrupt {
        run_exit_hooks();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}

#[cfg(unix)]
fn spawn_signal_hook(kind: HookSignal, inner: Weak<Inner>) -> std::io::Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let signal_kind = match kind {
        HookSignal::Interrupt => SignalKind::interrupt(),
        HookSignal::Terminate => SignalKind::terminate(),
        HookSignal::Hangup => SignalKind::hangup(),
    };
    // Registered before returning so a signal delivered right after launch
    // is not missed.
    let mut stream = signal(signal_kind)?;
    Ok(Some(tokio::spawn(async move {
        if stream.recv().await.is_some() {
            on_host_signal(kind, &inner);
        }
    })))
}

#[cfg(windows)]
fn spawn_signal_hook(kind: HookSignal, inner: Weak<Inner>) -> std::io::Result<Option<JoinHandle<()>>> {
    if kind != HookSignal::Interrupt {
        return Ok(None);
    }
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
    Ok(Some(tokio::spawn(async move {
        if ctrl_c.recv().await.is_some() {
            on_host_signal(kind, &inner);
        }
    })))
}

#[cfg(not(any(unix, windows)))]
fn spawn_signal_hook(kind: HookSignal, inner: Weak<Inner>) -> std::io::Result<Option<JoinHandle<()>>> {
    let _ = (kind, inner);
    Ok(None)
}
