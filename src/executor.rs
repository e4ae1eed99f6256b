use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use os_pipe::PipeReader;

use crate::job_control::{self, ForegroundTerminalGuard};
use crate::jobs::{Job, JobState, JobTable};
use crate::redirect::RedirectPlan;
use crate::status::WaitStatus;
use crate::vars::VarTable;

/// Launch a parsed job and register it for supervision.
///
/// Foreground jobs go into the foreground slot; background jobs get a
/// fresh job-spec and a `[spec] cmd &` announcement. A launch failure
/// aborts the remaining pipeline stages but the already-spawned ones stay
/// registered so the supervisor reaps them.
pub fn launch_job(mut job: Job, table: &mut JobTable, vars: &mut VarTable) {
    let foreground = !job.background;

    if let Err(code) = spawn_pipeline(&mut job, foreground) {
        vars.set_status(code);
        job.procs.retain(|p| p.pid != 0);
        if job.procs.is_empty() {
            return;
        }
    }

    if job.background {
        vars.set_last_bg_pgid(job.pgid);
        let cmd = job.cmd.clone();
        let spec = table.push_background(job);
        println!("[{spec}] {cmd} &");
    } else {
        table.set_foreground(job);
    }
}

/// Block on the foreground job (if any), then sweep the background table.
/// Runs once per command line.
pub fn supervise(table: &mut JobTable, vars: &mut VarTable) {
    wait_foreground(table, vars);
    table.reap(false);
}

/// Spawn every stage of the pipeline, wiring pipes and process groups.
///
/// Stage `i` reads the pipe written by stage `i-1`; the first stage
/// becomes the group leader, and for foreground jobs also takes the
/// controlling terminal before exec. `Err` carries the exit code to
/// record; diagnostics are printed at the failure site.
fn spawn_pipeline(job: &mut Job, foreground: bool) -> Result<(), i32> {
    let nprocs = job.procs.len();
    let mut prev_reader: Option<PipeReader> = None;

    for i in 0..nprocs {
        let is_first = i == 0;
        let is_last = i + 1 == nprocs;

        let (next_reader, writer) = if is_last {
            (None, None)
        } else {
            match os_pipe::pipe() {
                Ok((reader, writer)) => (Some(reader), Some(writer)),
                Err(err) => {
                    eprintln!("-xssh: failed to create pipe: {err}");
                    return Err(1);
                }
            }
        };

        let process = &job.procs[i];
        let program = process.argv[0].clone();

        let mut command = Command::new(&program);
        command.args(&process.argv[1..]);

        if let Some(reader) = prev_reader.take() {
            command.stdin(Stdio::from(reader));
        }
        if let Some(writer) = writer {
            command.stdout(Stdio::from(writer));
        }

        // Everything the child needs between fork and exec is prepared
        // here, in the parent: the post-fork closure must not allocate.
        let plan = match RedirectPlan::new(&process.redirections) {
            Ok(plan) => plan,
            Err(err) => {
                eprintln!("-xssh: {program}: {err}");
                return Err(1);
            }
        };
        let pgid = job.pgid; // 0 until the first stage has spawned
        let take_terminal = is_first && foreground;

        // SAFETY: the closure runs in the forked child and only makes
        // async-signal-safe calls (signal, setpgid, tcsetpgrp, open,
        // dup2, close).
        unsafe {
            command.pre_exec(move || {
                reset_child_signals()?;
                // First stage: setpgid(0, 0) creates the job's group with
                // this child as leader. Later stages join that group.
                if libc::setpgid(0, pgid) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if take_terminal {
                    claim_terminal()?;
                }
                plan.apply()
            });
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return Err(command_error(&program, &err)),
        };
        let pid = child.id() as libc::pid_t;
        // The Child handle is not used for reaping; status changes arrive
        // through waitpid on the job's process group.
        drop(child);

        // Parent-side half of the setpgid race. Whichever side wins, the
        // group is correct; the loser's EACCES/ESRCH is swallowed.
        let target = if is_first { pid } else { job.pgid };
        if let Err(err) = job_control::set_process_group(pid, target) {
            eprintln!("-xssh: {program}: failed to set process group: {err}");
        }

        job.note_spawned(i, pid);
        prev_reader = next_reader;
    }

    Ok(())
}

/// Reset dispositions the shell changed back to the default before exec.
/// SIG_IGN and handler installations would otherwise leak into children.
fn reset_child_signals() -> io::Result<()> {
    let signals = [libc::SIGINT, libc::SIGTSTP, libc::SIGQUIT, libc::SIGPIPE];
    for &signal in &signals {
        if unsafe { libc::signal(signal, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Child-side half of the terminal handover: the first process of a
/// foreground pipeline puts its own (fresh) group at the terminal
/// foreground so no stage reads stdin before the group owns it. SIGTTOU
/// is ignored around the call; a non-terminal stdin is left alone.
fn claim_terminal() -> io::Result<()> {
    unsafe {
        if libc::isatty(libc::STDIN_FILENO) != 1 {
            return Ok(());
        }
        libc::signal(libc::SIGTTIN, libc::SIG_IGN);
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        let rc = libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
        let err = io::Error::last_os_error();
        libc::signal(libc::SIGTTIN, libc::SIG_DFL);
        libc::signal(libc::SIGTTOU, libc::SIG_DFL);
        if rc != 0 {
            return Err(err);
        }
    }
    Ok(())
}

/// Map a spawn failure to shell exit-code conventions.
fn command_error(program: &str, err: &io::Error) -> i32 {
    if err.kind() == io::ErrorKind::NotFound {
        eprintln!("-xssh: {program}: command not found");
        127
    } else {
        eprintln!("-xssh: {program}: {err}");
        126
    }
}

/// Blocking wait on the foreground job's process group.
///
/// Applies every reported transition in kernel order and re-evaluates the
/// job after each one, leaving the loop when the job stops or ends. The
/// terminal is held by the job's group for the duration and handed back
/// to the shell on the way out.
fn wait_foreground(table: &mut JobTable, vars: &mut VarTable) {
    let Some(pgid) = table.foreground().map(|job| job.pgid) else {
        return;
    };

    job_control::set_router_foreground(pgid);
    let terminal = match ForegroundTerminalGuard::new(pgid) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("-xssh: failed to hand terminal to job group {pgid}: {err}");
            None
        }
    };

    while let Some(job) = table.foreground_mut() {
        match job_control::wait_for_group_event(job.pgid, true) {
            Ok(Some(event)) => {
                let interrupted =
                    matches!(event.status, WaitStatus::Signaled(libc::SIGINT));
                job.apply(event.pid, event.status);

                match job.state {
                    JobState::Running => continue,
                    JobState::Stopped => {
                        foreground_stopped(table, vars);
                        break;
                    }
                    JobState::Done | JobState::Killed => {
                        if job.state == JobState::Killed && interrupted {
                            println!("-xssh: Exit pid {}", job.pgid);
                        }
                        foreground_terminated(table, vars);
                        break;
                    }
                }
            }
            Ok(None) => continue,
            Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                // All status changes were consumed elsewhere; the job is
                // over even though we never saw its last event.
                job.finalize();
                foreground_terminated(table, vars);
                break;
            }
            Err(err) => {
                eprintln!("-xssh: failed waiting for foreground job: {err}");
                foreground_terminated(table, vars);
                break;
            }
        }
    }

    drop(terminal);
    job_control::clear_router_foreground();
}

/// A suspended foreground job moves to the background table (gaining a
/// job-spec if it never had one) and the shell takes the prompt back.
fn foreground_stopped(table: &mut JobTable, vars: &mut VarTable) {
    let Some(job) = table.take_foreground() else {
        return;
    };
    vars.set_last_bg_pgid(job.pgid);
    let cmd = job.cmd.clone();
    let spec = table.push_background(job);
    println!("[{spec}] STOPPED {cmd}");
}

/// A finished foreground job records its status in `?` and is destroyed.
fn foreground_terminated(table: &mut JobTable, vars: &mut VarTable) {
    if let Some(job) = table.take_foreground() {
        vars.set_status(job.status);
    }
}
