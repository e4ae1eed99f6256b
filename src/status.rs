/// A decoded `waitpid` status change for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Normal exit with the given exit code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// Stopped by the given signal (SIGTSTP, SIGSTOP, SIGTTIN, SIGTTOU).
    Stopped(i32),
    /// Resumed by SIGCONT.
    Continued,
}

/// Decode a raw status word filled in by `waitpid`.
///
/// Returns `None` for status words that report none of the four tracked
/// transitions (should not happen with the flags this shell passes).
pub fn decode_wait_status(raw: libc::c_int) -> Option<WaitStatus> {
    if libc::WIFEXITED(raw) {
        return Some(WaitStatus::Exited(libc::WEXITSTATUS(raw)));
    }

    if libc::WIFSIGNALED(raw) {
        return Some(WaitStatus::Signaled(libc::WTERMSIG(raw)));
    }

    if libc::WIFSTOPPED(raw) {
        return Some(WaitStatus::Stopped(libc::WSTOPSIG(raw)));
    }

    if libc::WIFCONTINUED(raw) {
        return Some(WaitStatus::Continued);
    }

    None
}
