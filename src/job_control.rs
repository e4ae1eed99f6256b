use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::status::{self, WaitStatus};

/// One status change reported by `waitpid` for a child of the shell.
pub struct WaitEvent {
    pub pid: libc::pid_t,
    pub status: WaitStatus,
}

/// Put `pid` into the process group `pgid` (`pgid == pid` creates a group
/// with `pid` as leader).
///
/// Both the shell and the freshly forked child make this call, so whichever
/// side loses the race gets EACCES (child already exec'd) or ESRCH (child
/// already gone); both are benign and reported as success.
pub fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// The shell's own process group id.
pub fn shell_pgid() -> libc::pid_t {
    unsafe { libc::getpgrp() }
}

/// Send `signal` to every process in the group `pgid`.
pub fn send_signal_to_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Wait for the next status change in the process group `pgid`.
///
/// Covers termination, signal death, stops, and continues. Blocking mode
/// is the foreground wait; non-blocking mode (`WNOHANG`) is the background
/// sweep, where `Ok(None)` means nothing is pending. ECHILD is returned to
/// the caller, which treats it as end-of-job.
pub fn wait_for_group_event(pgid: libc::pid_t, block: bool) -> io::Result<Option<WaitEvent>> {
    let mut flags = libc::WUNTRACED | libc::WCONTINUED;
    if !block {
        flags |= libc::WNOHANG;
    }

    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-pgid, &mut raw_status, flags) };

        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if pid == 0 {
            return Ok(None);
        }

        if let Some(status) = status::decode_wait_status(raw_status) {
            return Ok(Some(WaitEvent { pid, status }));
        }
    }
}

/// Block until the child `pid` exits or dies to a signal (`pid == -1`
/// waits for any child). Stops and continues are not reported; this is the
/// `wait` builtin's primitive, which deliberately waits on a pid, never a
/// process group.
pub fn wait_for_exit(pid: libc::pid_t) -> io::Result<WaitEvent> {
    loop {
        let mut raw_status: libc::c_int = 0;
        let waited = unsafe { libc::waitpid(pid, &mut raw_status, 0) };

        if waited < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if let Some(status) = status::decode_wait_status(raw_status) {
            return Ok(WaitEvent {
                pid: waited,
                status,
            });
        }
    }
}

// ── Signal router ──
//
// The interrupt and suspend handlers may only (a) read the foreground-pgid
// slot, (b) send a signal to that group, or (c) re-emit the prompt. All
// Job/Process mutation happens synchronously in the supervisor, which
// re-enters its wait after EINTR.

/// Pgid of the current foreground job; 0 while the slot is empty.
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);

const PROMPT_REEMIT: &[u8] = b"\nxssh>> ";

/// Publish the foreground job's pgid for the signal handlers.
pub fn set_router_foreground(pgid: libc::pid_t) {
    FOREGROUND_PGID.store(pgid, Ordering::SeqCst);
}

/// Empty the router's foreground slot.
pub fn clear_router_foreground() {
    FOREGROUND_PGID.store(0, Ordering::SeqCst);
}

/// Forward SIGINT to the foreground job's group. Returns false when the
/// slot is empty (the caller re-emits the prompt instead).
pub fn interrupt_foreground_group() -> bool {
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid <= 0 {
        return false;
    }
    unsafe {
        libc::kill(-pgid, libc::SIGINT);
    }
    true
}

extern "C" fn forward_suspend(_signal: libc::c_int) {
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        unsafe {
            libc::kill(-pgid, libc::SIGTSTP);
        }
    } else if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
        // No foreground job to suspend; put the prompt back. write(2) is
        // async-signal-safe, the stdio machinery is not.
        unsafe {
            libc::write(
                libc::STDOUT_FILENO,
                PROMPT_REEMIT.as_ptr().cast(),
                PROMPT_REEMIT.len(),
            );
        }
    }
}

/// Install the suspend (Ctrl-Z) leg of the signal router. The SIGINT leg
/// is installed by `main` through the ctrlc crate. Called once at startup;
/// the handler also keeps SIGTSTP from ever stopping the shell itself.
pub fn install_suspend_handler() -> io::Result<()> {
    let handler: extern "C" fn(libc::c_int) = forward_suspend;
    let previous = unsafe { libc::signal(libc::SIGTSTP, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ── Controlling terminal ──

/// Restores a signal's previous disposition on drop. Used to ignore
/// SIGTTOU around `tcsetpgrp`, which a background caller would otherwise
/// be stopped by.
struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

/// Make `pgid` the terminal's foreground process group.
///
/// No-op when standard input is not a terminal.
pub fn set_terminal_foreground(pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
        return Ok(());
    }

    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Hands the controlling terminal to a job's process group and gives it
/// back to the shell on drop, so exactly one group owns the terminal at
/// every instant of a foreground session.
pub struct ForegroundTerminalGuard {
    shell_pgid: libc::pid_t,
}

impl ForegroundTerminalGuard {
    pub fn new(target_pgid: libc::pid_t) -> io::Result<Self> {
        let guard = Self {
            shell_pgid: shell_pgid(),
        };
        set_terminal_foreground(target_pgid)?;
        Ok(guard)
    }
}

impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        let _ = set_terminal_foreground(self.shell_pgid);
    }
}
