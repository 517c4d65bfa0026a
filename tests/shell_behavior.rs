//! End-to-end scenarios run against the built binary over a piped stdin,
//! the way the teacher's `tests/sandbox.rs` drives the shell as a
//! subprocess. No controlling terminal is attached, so scenarios that need
//! real job control (`Ctrl-Z`, `fg`/`bg` against a live pgid) are covered
//! by unit tests instead; this file covers what a piped, non-interactive
//! run can exercise: pipelines, redirections, and short-circuit sequencing.

use std::io::Write;
use std::process::{Command, Stdio};

fn run_shell(script: &str) -> std::process::Output {
    run_shell_with_args(script, &[])
}

fn run_shell_with_args(script: &str, args: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_rshell");
    let mut child = Command::new(exe)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn shell");
    {
        let stdin = child.stdin.as_mut().expect("stdin");
        stdin.write_all(script.as_bytes()).expect("write script");
    }
    child.wait_with_output().expect("wait for shell")
}

#[test]
fn pipeline_counts_bytes() {
    let output = run_shell("echo hi | wc -c\nexit\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('3'), "expected byte count in stdout, got: {stdout}");
}

#[test]
fn short_circuit_sequence_runs_the_right_branch() {
    let output = run_shell("false && echo X ; echo Y\nexit\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains('X'));
    assert!(stdout.contains('Y'));
}

#[test]
fn redirect_from_missing_file_reports_and_skips() {
    let output = run_shell("cat < /no/such/file/at/all\nexit\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no/such/file/at/all"));
}

#[test]
fn output_redirection_creates_and_truncates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out.txt");
    let script = format!(
        "echo one > {path}\necho two > {path}\nexit\n",
        path = path.display()
    );
    run_shell(&script);
    let contents = std::fs::read_to_string(&path).expect("read output file");
    assert_eq!(contents.trim(), "two");
}

#[test]
fn command_not_found_reports_and_continues() {
    let output = run_shell("this_is_not_a_real_command_xyz\necho still-alive\nexit\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stderr.contains("not found"));
    assert!(stdout.contains("still-alive"));
}

#[test]
fn empty_lines_are_ignored() {
    let output = run_shell("\n\n  \necho done\nexit\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("done"), "expected marker in stdout, got: {stdout}");
}

#[test]
fn trailing_pipe_is_rejected_as_a_syntax_error() {
    let output = run_shell("echo hi |\necho still-alive\nexit\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stderr.contains("syntax error"));
    assert!(stdout.contains("still-alive"));
}

#[test]
fn trace_flag_prints_fork_lines_to_stderr() {
    let output = run_shell_with_args("echo hi\nexit\n", &["-x"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fork"), "expected a trace line, got: {stderr}");
}
