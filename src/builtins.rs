use crate::job_control;
use crate::jobs::JobTable;
use crate::status::WaitStatus;
use crate::vars::VarTable;

/// The list of all builtin command names, dispatched before the parser.
const BUILTINS: &[&str] = &[
    "show", "set", "export", "unexport", "exit", "wait", "help", "bg", "fg", "jobs", "pwd", "cd",
];

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// What the main loop should do after a builtin ran.
pub enum BuiltinAction {
    Continue,
    Exit(i32),
}

/// Execute a builtin command. `rest` is the remainder of the line after
/// the command word, with variables already substituted.
pub fn execute(
    name: &str,
    rest: &str,
    table: &mut JobTable,
    vars: &mut VarTable,
) -> BuiltinAction {
    match name {
        "show" => builtin_show(rest, vars),
        "set" => builtin_set(rest, vars),
        "export" => builtin_export(rest, vars),
        "unexport" => builtin_unexport(rest, vars),
        "exit" => return builtin_exit(rest),
        "wait" => builtin_wait(rest, table, vars),
        "help" => builtin_help(),
        "bg" => builtin_bg(rest, table, vars),
        "fg" => builtin_fg(rest, table, vars),
        "jobs" => table.reap(true),
        "pwd" => builtin_pwd(vars),
        "cd" => builtin_cd(rest, vars),
        _ => {
            eprintln!("-xssh: unknown builtin: {name}");
            vars.set_status(1);
        }
    }
    BuiltinAction::Continue
}

/// `show W`: print the rest of the line verbatim.
fn builtin_show(rest: &str, vars: &mut VarTable) {
    println!("{rest}");
    vars.set_status(0);
}

/// `set W1 W2`: assign an existing variable.
fn builtin_set(rest: &str, vars: &mut VarTable) {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(name), Some(value)) => {
            if vars.set(name, value) {
                println!("-xssh: Set existing variable {name} to {value}.");
                vars.set_status(0);
            } else {
                println!("-xssh: Variable {name} does not exist.");
                vars.set_status(2);
            }
        }
        _ => {
            println!("No value to set!");
            vars.set_status(libc::EINVAL);
        }
    }
}

/// `export W`: declare a new variable name.
fn builtin_export(rest: &str, vars: &mut VarTable) {
    match rest.split_whitespace().next() {
        Some(name) => {
            if let Some(value) = vars.get(name) {
                let value = value.to_string();
                println!("-xssh: Existing variable {name} is {value}.");
                vars.set_status(libc::EEXIST);
            } else {
                vars.export(name);
                println!("-xssh: Export variable {name}.");
                vars.set_status(0);
            }
        }
        None => {
            eprintln!("-xssh: export: missing variable name");
            vars.set_status(libc::EINVAL);
        }
    }
}

/// `unexport W`: remove a variable name.
fn builtin_unexport(rest: &str, vars: &mut VarTable) {
    match rest.split_whitespace().next() {
        Some(name) => {
            if vars.unexport(name) {
                println!("-xssh: Variable {name} is unexported.");
                vars.set_status(0);
            } else {
                println!("-xssh: Variable {name} does not exist.");
                vars.set_status(libc::ENOENT);
            }
        }
        None => {
            eprintln!("-xssh: unexport: missing variable name");
            vars.set_status(libc::EINVAL);
        }
    }
}

/// `exit [I]`: 0 with no argument, I when it parses, -1 otherwise.
fn builtin_exit(rest: &str) -> BuiltinAction {
    let arg = rest.trim();
    if arg.is_empty() {
        return BuiltinAction::Exit(0);
    }
    match arg.parse::<i32>() {
        Ok(code) => BuiltinAction::Exit(code),
        Err(_) => BuiltinAction::Exit(-1),
    }
}

/// `wait P`: reap the child with pid P, or every child when P is -1.
///
/// Waits on a pid, never a process group, and reconciles the background
/// table for whatever it reaps.
fn builtin_wait(rest: &str, table: &mut JobTable, vars: &mut VarTable) {
    let Some(pid) = rest
        .split_whitespace()
        .next()
        .and_then(|arg| arg.parse::<libc::pid_t>().ok())
    else {
        println!("-xssh: wait: Invalid pid");
        vars.set_status(255);
        return;
    };

    eprintln!("Waiting for child {pid}");

    let mut reaped = 0usize;
    loop {
        match job_control::wait_for_exit(pid) {
            Ok(event) => {
                match event.status {
                    WaitStatus::Exited(code) => println!(
                        "-xssh: child process {} is terminated with status={}",
                        event.pid, code
                    ),
                    WaitStatus::Signaled(signal) => println!(
                        "-xssh: child process {} is killed by signal={}",
                        event.pid, signal
                    ),
                    WaitStatus::Stopped(_) | WaitStatus::Continued => {}
                }
                reaped += 1;
                table.note_reaped(event.pid, event.status);
                if pid > 0 {
                    break;
                }
            }
            Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                if reaped > 0 {
                    println!("-xssh: all child processes are terminated");
                } else {
                    println!("-xssh: no child process exist");
                }
                vars.set_status(0);
                break;
            }
            Err(err) => {
                if pid < 0 {
                    println!("-xssh: failed to wait for all child processes: {err}");
                } else {
                    println!("-xssh: failed to wait for child process {pid}: {err}");
                }
                vars.set_status(err.raw_os_error().unwrap_or(1));
                break;
            }
        }
    }
}

fn builtin_help() {
    println!("The following commands are supported.");
    println!("  exit I     - Exit the shell and return status I.");
    println!("  show W     - Display whatever W is.");
    println!("  export W   - Declare W as a variable name.");
    println!("  unexport W - Remove the existing variable name W.");
    println!("  set W1 W2  - Set the value of the existing variable W1 to W2.");
    println!("  wait P     - Wait for the child with pid P (-1 waits for all children).");
    println!("  jobs       - List background jobs with their state and job number.");
    println!("  fg [N]     - Resume job N (default: the last background job) in the foreground.");
    println!("  bg [N]     - Resume the stopped job N (default: the last background job) in the background.");
    println!("  cd DIR     - Change the current working directory.");
    println!("  pwd        - Print the current working directory.");
    println!("  cmd &      - Run cmd in the background.");
    println!("  # comment  - Text after # is ignored; blank lines are ignored.");
    println!("  show $$    - Print the pid of the shell.");
    println!("  show $!    - Print the process group of the last background job.");
    println!("  show $?    - Print the status of the last command.");
}

/// `bg [spec]`: resume a job in the background.
fn builtin_bg(rest: &str, table: &mut JobTable, vars: &mut VarTable) {
    let arg = rest.split_whitespace().next();
    let spec = match arg {
        Some(arg) => arg.parse::<usize>().unwrap_or(0),
        None => table.last_bg_job_index(),
    };

    let Some(job) = table.take_background(spec) else {
        match arg {
            Some(arg) => eprintln!("-xssh: bg: {arg}: no such job"),
            None => eprintln!("-xssh: bg: current: no such job"),
        }
        vars.set_status(1);
        return;
    };

    let pgid = job.pgid;
    let cmd = job.cmd.clone();
    vars.set_last_bg_pgid(pgid);
    let spec = table.push_background(job);

    if let Err(err) = job_control::send_signal_to_group(pgid, libc::SIGCONT) {
        eprintln!("-xssh: bg: failed to resume job [{spec}]: {err}");
        vars.set_status(1);
        return;
    }

    println!("[{spec}] {cmd} &");
    vars.set_status(0);
}

/// `fg [spec]`: move a background job to the foreground and resume it.
///
/// The job's group gets the terminal back before SIGCONT so a resumed
/// reader is not stopped again by SIGTTIN. The caller's supervision loop
/// picks the job up from the foreground slot.
fn builtin_fg(rest: &str, table: &mut JobTable, vars: &mut VarTable) {
    let arg = rest.split_whitespace().next();
    let spec = match arg {
        Some(arg) => arg.parse::<usize>().unwrap_or(0),
        None => table.last_bg_job_index(),
    };

    let Some(mut job) = table.take_background(spec) else {
        match arg {
            Some(arg) => eprintln!("-xssh: fg: {arg}: no such job"),
            None => eprintln!("-xssh: fg: current: no such job"),
        }
        vars.set_status(1);
        return;
    };

    println!("{}", job.cmd);
    job.background = false;

    if let Err(err) = job_control::set_terminal_foreground(job.pgid) {
        eprintln!(
            "-xssh: fg: failed to hand terminal to job group {}: {err}",
            job.pgid
        );
    }
    if let Err(err) = job_control::send_signal_to_group(job.pgid, libc::SIGCONT) {
        eprintln!("-xssh: fg: failed to resume job [{spec}]: {err}");
    }

    table.set_foreground(job);
    vars.set_status(0);
}

fn builtin_pwd(vars: &mut VarTable) {
    match std::env::current_dir() {
        Ok(path) => {
            println!("{}", path.display());
            vars.set_status(0);
        }
        Err(err) => {
            eprintln!("-xssh: pwd: {err}");
            vars.set_status(1);
        }
    }
}

fn builtin_cd(rest: &str, vars: &mut VarTable) {
    let target = match rest.split_whitespace().next() {
        Some(dir) => dir.to_string(),
        None => std::env::var("HOME").unwrap_or_else(|_| ".".to_string()),
    };

    if let Err(err) = std::env::set_current_dir(&target) {
        eprintln!("-xssh: cd: {target}: {err}");
        vars.set_status(1);
    } else {
        vars.set_status(0);
    }
}
