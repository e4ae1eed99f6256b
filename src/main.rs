mod builtins;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod redirect;
mod status;
mod vars;

use std::io::{self, Write};

use crossterm::tty::IsTty;

use builtins::BuiltinAction;
use jobs::JobTable;
use vars::VarTable;

const PROMPT: &str = "xssh>> ";

/// Longest useful command line in bytes (a 128-byte buffer including the
/// terminator). Input past the limit is dropped.
const LINE_BUDGET: usize = 127;

fn main() {
    // SIGINT leg of the signal router: forward Ctrl-C to the foreground
    // job's group, or put the prompt back when there is none.
    ctrlc::set_handler(|| {
        if !job_control::interrupt_foreground_group() {
            print!("\n{PROMPT}");
            let _ = io::stdout().flush();
        }
    })
    .expect("Failed to set Ctrl-C handler");

    if let Err(err) = job_control::install_suspend_handler() {
        eprintln!("-xssh: failed to install suspend handler: {err}");
    }

    let interactive = io::stdin().is_tty();
    let mut table = JobTable::new();
    let mut vars = VarTable::new(std::process::id() as libc::pid_t);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if interactive {
            print!("{PROMPT}");
            if stdout.flush().is_err() {
                break;
            }
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => run_line(&input, &mut table, &mut vars),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                eprintln!("-xssh: error reading input: {err}");
                break;
            }
        }

        executor::supervise(&mut table, &mut vars);
    }

    std::process::exit(vars.status());
}

/// Process one raw input line: substitute variables, strip the comment,
/// dispatch a builtin or parse and launch a job.
fn run_line(raw: &str, table: &mut JobTable, vars: &mut VarTable) {
    let line = truncate_to_budget(raw.trim_end_matches('\n'));
    let substituted = vars.substitute(line);

    let without_comment = match substituted.find('#') {
        Some(pos) => &substituted[..pos],
        None => substituted.as_str(),
    };
    let line = without_comment.trim();
    if line.is_empty() {
        return;
    }

    let (name, rest) = split_first_word(line);
    if builtins::is_builtin(name) {
        match builtins::execute(name, rest, table, vars) {
            BuiltinAction::Exit(code) => std::process::exit(code),
            BuiltinAction::Continue => {}
        }
        return;
    }

    match parser::parse_job(line) {
        Ok(job) => executor::launch_job(job, table, vars),
        Err(err) => {
            eprintln!("-xssh: {err}");
            vars.set_status(2);
        }
    }
}

fn truncate_to_budget(line: &str) -> &str {
    if line.len() <= LINE_BUDGET {
        return line;
    }
    let mut end = LINE_BUDGET;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

fn split_first_word(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim_start()),
        None => (line, ""),
    }
}
