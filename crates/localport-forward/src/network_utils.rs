use std::net::TcpListener;

/// Returns true when the local TCP port can still be bound on loopback.
/// Bind-and-drop: success means nothing else is listening there.
pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Signal-0 process liveness: succeeds iff the process exists and the
/// caller has permission to signal it.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}
