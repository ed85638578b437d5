//! Host exit hooks close every launched process that is still open.
#![cfg(unix)]

use snapshot_bisect::lifecycle::{launch, run_exit_hooks, ExitGuard, LaunchOptions, ProcessHandle};
use std::path::Path;
use std::time::Duration;

fn options() -> LaunchOptions {
    LaunchOptions {
        handle_sigint: false,
        handle_sigterm: false,
        handle_sighup: false,
        ..LaunchOptions::default()
    }
}

async fn launch_sleeper() -> ProcessHandle {
    let args = vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()];
    launch(Path::new("/bin/sh"), &args, &options()).await.unwrap()
}

async fn wait_for_exit(handle: &ProcessHandle) -> bool {
    for _ in 0..250 {
        if handle.has_exited() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_exit_hooks_close_open_handles() {
    let first = launch_sleeper().await;
    let second = launch_sleeper().await;
    let dirs = [
        first.working_dir().unwrap().to_path_buf(),
        second.working_dir().unwrap().to_path_buf(),
    ];

    {
        let _guard = ExitGuard::install();
    }

    for dir in &dirs {
        assert!(!dir.exists());
    }
    assert!(first.is_closed() && second.is_closed());
    assert!(wait_for_exit(&first).await);
    assert!(wait_for_exit(&second).await);
    assert_eq!(first.kill_count(), 1);
}

#[tokio::test]
async fn test_closed_handle_is_not_killed_again() {
    let mut handle = launch_sleeper().await;
    handle.close().await;
    let kills = handle.kill_count();

    run_exit_hooks();
    run_exit_hooks();
    assert_eq!(handle.kill_count(), kills);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exit_hooks_during_wait_kill_process() {
    let mut handle = launch_sleeper().await;
    let dir = handle.working_dir().unwrap().to_path_buf();

    let waiter = tokio::spawn(async move {
        let status = handle.wait().await;
        (handle, status)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    run_exit_hooks();
    assert!(!dir.exists());

    let (handle, status) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(status.is_some_and(|s| !s.success()));
    assert!(handle.is_closed());
}
