//! Process liveness probe used by the gate to detect stale lock owners.

/// Returns true if a process with this PID currently exists on the host.
///
/// PID 0 and values that do not fit a `pid_t` are never alive: `kill(0, 0)`
/// would probe our own process group and negative values address groups.
/// EPERM means the process exists under another user, so it counts as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };

    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs an existence check only; no signal is
        // delivered and no memory is touched.
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        errno == libc::EPERM
    }
    #[cfg(not(unix))]
    {
        use sysinfo::{Pid, ProcessRefreshKind, System};

        let mut sys = System::new();
        let sys_pid = Pid::from(pid_i32 as usize);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        sys.process(sys_pid).is_some()
    }
}

/// PID of the calling process, as written into lock markers.
pub fn current_pid() -> u32 {
    std::process::id()
}
