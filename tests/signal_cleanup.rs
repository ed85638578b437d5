//! Terminate and hangup delivered to the host close launched processes.
#![cfg(unix)]

use snapshot_bisect::lifecycle::{launch, run_exit_hooks, LaunchOptions, ProcessHandle};
use std::path::Path;
use std::time::Duration;

fn options() -> LaunchOptions {
    LaunchOptions {
        // SIGINT would end the test binary itself.
        handle_sigint: false,
        handle_exit: false,
        ..LaunchOptions::default()
    }
}

async fn launch_sleeper() -> ProcessHandle {
    let args = vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()];
    launch(Path::new("/bin/sh"), &args, &options()).await.unwrap()
}

async fn wait_until_cleaned(handle: &ProcessHandle, dir: &Path) -> bool {
    for _ in 0..250 {
        if handle.is_closed() && !dir.exists() && handle.has_exited() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_sigterm_closes_launched_process() {
    let handle = launch_sleeper().await;
    let dir = handle.working_dir().unwrap().to_path_buf();
    assert!(dir.is_dir());

    unsafe {
        libc::raise(libc::SIGTERM);
    }

    assert!(wait_until_cleaned(&handle, &dir).await);
    assert!(handle.kill_count() <= 1);
}

#[tokio::test]
async fn test_sighup_closes_launched_process() {
    let handle = launch_sleeper().await;
    let dir = handle.working_dir().unwrap().to_path_buf();

    unsafe {
        libc::raise(libc::SIGHUP);
    }

    assert!(wait_until_cleaned(&handle, &dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_listener_waits_for_hook_cleanup() {
    use tokio::signal::unix::{signal, SignalKind};

    for _ in 0..3 {
        let args = vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()];
        let options = LaunchOptions {
            handle_exit: true,
            ..options()
        };
        let handle = launch(Path::new("/bin/sh"), &args, &options).await.unwrap();
        let dir = handle.working_dir().unwrap().to_path_buf();
        for i in 0..2000 {
            std::fs::write(dir.join(format!("entry-{}", i)), b"x").unwrap();
        }

        // Same shape as the binary's shutdown listener: run the exit hooks,
        // then report what would be left at exit.
        let mut term = signal(SignalKind::terminate()).unwrap();
        let listener_dir = dir.clone();
        let listener = tokio::spawn(async move {
            term.recv().await;
            run_exit_hooks();
            listener_dir.exists()
        });

        unsafe {
            libc::raise(libc::SIGTERM);
        }

        let left_behind = tokio::time::timeout(Duration::from_secs(10), listener)
            .await
            .unwrap()
            .unwrap();
        assert!(!left_behind);
        assert!(wait_until_cleaned(&handle, &dir).await);
        assert_eq!(handle.kill_count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sighup_during_wait_kills_process() {
    let mut handle = launch_sleeper().await;
    let dir = handle.working_dir().unwrap().to_path_buf();

    let waiter = tokio::spawn(async move {
        let status = handle.wait().await;
        (handle, status)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    unsafe {
        libc::raise(libc::SIGHUP);
    }

    let (handle, status) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(status.is_some_and(|s| !s.success()));
    assert!(handle.has_exited());
    assert!(!dir.exists());
}
