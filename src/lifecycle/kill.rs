//! Forceful termination of a launched process tree
//!
//! Launched processes lead their own process group, so one signal to the
//! negated pid reaches every child the binary spawned. None of these calls
//! suspend; they are safe from exit and signal hooks.

use std::io;

#[cfg(unix)]
pub(crate) fn kill_process_tree(pid: u32) -> io::Result<()> {
    let pid = checked_pid(pid)?;
    unsafe {
        if libc::kill(-pid, libc::SIGKILL) == 0 {
            return Ok(());
        }
        let group_err = io::Error::last_os_error();
        // Group is gone or was never created; fall back to the leader.
        if libc::kill(pid, libc::SIGKILL) == 0 {
            return Ok(());
        }
        Err(group_err)
    }
}

#[cfg(windows)]
pub(crate) fn kill_process_tree(pid: u32) -> io::Result<()> {
    use std::process::{Command, Stdio};

    let status = Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {}", status)))
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn kill_process_tree(pid: u32) -> io::Result<()> {
    let _ = pid;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process tree termination is not supported on this platform",
    ))
}

/// Whether a process with this pid (or an unreaped zombie of it) exists.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = checked_pid(pid) else {
        return false;
    };
    unsafe {
        match libc::kill(pid, 0) {
            0 => true,
            _ => io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH),
        }
    }
}

#[cfg(not(unix))]
pub fn process_exists(pid: u32) -> bool {
    let _ = pid;
    false
}

/// Pid 0 and -1 address the caller's own group and every process it may
/// signal, so they are never valid targets.
#[cfg(unix)]
fn checked_pid(pid: u32) -> io::Result<i32> {
    match i32::try_from(pid) {
        Ok(pid) if pid > 1 => Ok(pid),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {}", pid),
        )),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_special_pids() {
        assert!(kill_process_tree(0).is_err());
        assert!(kill_process_tree(1).is_err());
        assert!(kill_process_tree(u32::MAX).is_err());
        assert!(!process_exists(0));
    }

    #[test]
    fn test_kills_process_group() {
        use std::os::unix::process::CommandExt;

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(process_exists(pid));

        kill_process_tree(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!process_exists(pid));
    }
}
