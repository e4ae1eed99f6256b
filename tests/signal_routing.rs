use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn spawn_shell() -> Child {
    Command::new(env!("CARGO_BIN_EXE_xssh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn xssh")
}

fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = spawn_shell();
    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }
    child.wait_with_output().expect("wait output")
}

#[test]
fn interrupt_is_forwarded_to_the_foreground_job() {
    let mut child = spawn_shell();
    let mut stdin = child.stdin.take().expect("stdin");

    writeln!(stdin, "sleep 5").expect("write line");
    stdin.flush().expect("flush");

    // Let the shell block in its foreground wait, then interrupt it the
    // way a terminal would.
    std::thread::sleep(Duration::from_millis(500));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }

    writeln!(stdin, "show AFTER:$?").expect("write line");
    writeln!(stdin, "exit").expect("write exit");
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-xssh: Exit pid "), "stdout was: {stdout}");
    // SIGINT is 2; a signal death records the signal number.
    assert!(stdout.contains("AFTER:2"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn suspend_is_forwarded_and_the_job_can_be_resumed() {
    let mut child = spawn_shell();
    let mut stdin = child.stdin.take().expect("stdin");

    writeln!(stdin, "sleep 1").expect("write line");
    stdin.flush().expect("flush");

    std::thread::sleep(Duration::from_millis(300));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTSTP);
    }

    writeln!(stdin, "jobs").expect("write line");
    writeln!(stdin, "bg 1").expect("write line");
    writeln!(stdin, "wait -1").expect("write line");
    writeln!(stdin, "exit").expect("write exit");
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[1] STOPPED sleep 1"), "stdout was: {stdout}");
    // bg re-announces the resumed job in the launch format.
    assert!(stdout.contains("[1] sleep 1 &"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn shell_survives_sigtstp_with_no_foreground_job() {
    let mut child = spawn_shell();
    let mut stdin = child.stdin.take().expect("stdin");

    std::thread::sleep(Duration::from_millis(200));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTSTP);
    }
    std::thread::sleep(Duration::from_millis(200));

    writeln!(stdin, "show ALIVE").expect("write line");
    writeln!(stdin, "exit").expect("write exit");
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn shell_reprompts_on_sigint_with_no_foreground_job() {
    let mut child = spawn_shell();
    let mut stdin = child.stdin.take().expect("stdin");

    std::thread::sleep(Duration::from_millis(200));
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
    std::thread::sleep(Duration::from_millis(200));

    writeln!(stdin, "show ALIVE").expect("write line");
    writeln!(stdin, "exit").expect("write exit");
    drop(stdin);

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[test]
fn pipeline_sigpipe_does_not_abort_the_shell() {
    // yes writes until head closes the pipe and dies to SIGPIPE; the
    // shell must survive the event and keep serving commands.
    let output = run_shell(&["yes | head -1", "show ALIVE:$?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE:"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}
