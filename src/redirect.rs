use std::ffi::CString;
use std::io;

/// What a file descriptor should be rewired to.
///
/// The variant fixes both the redirection mode and the kind of target it
/// carries: the three file modes carry a path, the two dup modes carry a
/// descriptor number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// `> file`: write to file, truncating it first.
    WriteTrunc(String),
    /// `>> file`: write to file in append mode.
    WriteAppend(String),
    /// `< file`: read from file.
    ReadFile(String),
    /// `>&N`: duplicate output descriptor N (e.g. `2>&1`).
    DupOut(i32),
    /// `<&N`: duplicate input descriptor N.
    DupIn(i32),
}

/// A single I/O redirection instruction.
///
/// `fd` is the descriptor being rewired: the digit run written immediately
/// before the operator, or 1 for output modes and 0 for input modes when
/// none was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub fd: i32,
    pub target: RedirectTarget,
}

/// One fd rewiring, flattened to raw-syscall form.
enum RedirectOp {
    /// Open `path` with `flags`, dup the result onto `fd`, close it.
    OpenPath {
        fd: libc::c_int,
        path: CString,
        flags: libc::c_int,
    },
    /// Dup `target` onto `fd`.
    DupFd { fd: libc::c_int, target: libc::c_int },
}

/// The child-side application plan for a process's redirection list.
///
/// Built in the parent before the fork so the post-fork path allocates
/// nothing: paths are already `CString`s and every operation reduces to
/// `open`/`dup2`/`close`.
pub struct RedirectPlan {
    ops: Vec<RedirectOp>,
}

impl RedirectPlan {
    /// Flatten a redirection list, preserving declared order.
    pub fn new(redirections: &[Redirection]) -> io::Result<Self> {
        let mut ops = Vec::with_capacity(redirections.len());

        for redirect in redirections {
            let op = match &redirect.target {
                RedirectTarget::WriteTrunc(path) => RedirectOp::OpenPath {
                    fd: redirect.fd,
                    path: path_to_cstring(path)?,
                    flags: libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                },
                RedirectTarget::WriteAppend(path) => RedirectOp::OpenPath {
                    fd: redirect.fd,
                    path: path_to_cstring(path)?,
                    flags: libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
                },
                RedirectTarget::ReadFile(path) => RedirectOp::OpenPath {
                    fd: redirect.fd,
                    path: path_to_cstring(path)?,
                    flags: libc::O_RDONLY,
                },
                RedirectTarget::DupOut(target) | RedirectTarget::DupIn(target) => {
                    RedirectOp::DupFd {
                        fd: redirect.fd,
                        target: *target,
                    }
                }
            };
            ops.push(op);
        }

        Ok(Self { ops })
    }

    /// Apply every rewiring in order.
    ///
    /// Runs between fork and exec (from a `pre_exec` closure), after the
    /// pipeline's own stdin/stdout wiring. Only async-signal-safe calls.
    ///
    /// # Safety
    ///
    /// Must only be called in a freshly forked child.
    pub unsafe fn apply(&self) -> io::Result<()> {
        for op in &self.ops {
            match op {
                RedirectOp::OpenPath { fd, path, flags } => {
                    let opened = unsafe { libc::open(path.as_ptr(), *flags, 0o777) };
                    if opened < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if unsafe { libc::dup2(opened, *fd) } < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if unsafe { libc::close(opened) } < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                RedirectOp::DupFd { fd, target } => {
                    if unsafe { libc::dup2(*target, *fd) } < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
            }
        }

        Ok(())
    }
}

fn path_to_cstring(path: &str) -> io::Result<CString> {
    CString::new(path).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "redirect path contains NUL")
    })
}
