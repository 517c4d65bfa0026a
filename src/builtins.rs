//! Built-in commands: `cd`, `jobs`, `bg`, `fg`, `exit`.
//!
//! Grounded in `execute_cmd.c`'s `execute_shell_*` family: a built-in is
//! still forked like any other command, and runs twice — once in the
//! child, which prints whatever the user needs to see and then exits, and
//! once in the parent, which performs the actual state change. Only the
//! parent's job table is real; the child's is a fork-time snapshot.

use std::env;
use std::io::Write;

use crate::command::Command;
use crate::job::{JobState, JobStatus, JobTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Jobs,
    Bg,
    Fg,
    Exit,
}

impl Builtin {
    pub fn recognize(program: &str) -> Option<Builtin> {
        match program {
            "cd" => Some(Builtin::Cd),
            "jobs" => Some(Builtin::Jobs),
            "bg" => Some(Builtin::Bg),
            "fg" => Some(Builtin::Fg),
            "exit" => Some(Builtin::Exit),
            _ => None,
        }
    }
}

fn cd_target(args: &[String]) -> Option<String> {
    args.get(1).cloned().or_else(|| env::var("HOME").ok())
}

/// A job number named on the command line: `Some(n)` if it parsed as a
/// whole decimal number in range, `None` ("no such job") otherwise.
fn parse_jobno(text: &str, table_len: usize) -> Option<usize> {
    let n: usize = text.parse().ok()?;
    if n == 0 || n > table_len {
        None
    } else {
        Some(n)
    }
}

/// `bg`/`fg`'s targets: the explicit job numbers named on the command
/// line, or `[current]` if none were given.
fn targets(args: &[String], jobs: &JobTable) -> Vec<(String, Option<usize>)> {
    if args.len() <= 1 {
        let current = jobs.current_jobno();
        return vec![("current".to_string(), current)];
    }
    args[1..]
        .iter()
        .map(|a| (a.clone(), parse_jobno(a, jobs.len())))
        .collect()
}

/// `bg`/`fg` need the controlling terminal; a pipelined or backgrounded
/// invocation of either is refused outright.
fn needs_job_control(cmd: &Command) -> bool {
    cmd.flags.background || cmd.flags.pipe_out || cmd.flags.pipe_in
}

/// Runs in the forked child: prints to stdout/stderr, already redirected by
/// this point, and returns the process exit status.
pub fn run_in_child(builtin: Builtin, cmd: &Command, jobs: &JobTable) -> i32 {
    match builtin {
        Builtin::Cd => match cd_target(&cmd.args) {
            Some(dir) => match nix::unistd::chdir(dir.as_str()) {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("cd: {dir}: {err}");
                    1
                }
            },
            None => 0,
        },
        Builtin::Jobs => {
            let mut out = std::io::stdout();
            for (idx, job) in jobs.iter().enumerate() {
                if job.state != JobState::Valid {
                    continue;
                }
                let _ = writeln!(out, "{}", job.format_with_status(idx + 1));
            }
            0
        }
        Builtin::Bg => {
            if needs_job_control(cmd) {
                eprintln!("bg: no job control");
                return 1;
            }
            for (label, jobno) in targets(&cmd.args, jobs) {
                match jobno.and_then(|n| jobs.get(n).map(|j| (n, j))) {
                    None => eprintln!("bg: {label}: no such job"),
                    Some((n, job)) => match job.status() {
                        JobStatus::Running => eprintln!("bg: job {n} already in background"),
                        JobStatus::Terminated => eprintln!("bg: job has terminated"),
                        JobStatus::Stopped => {
                            let _ = nix::sys::signal::kill(
                                nix::unistd::Pid::from_raw(-job.pgid.as_raw()),
                                nix::sys::signal::Signal::SIGCONT,
                            );
                            println!("[{n}]\t{}", job.display_line());
                        }
                    },
                }
            }
            0
        }
        Builtin::Fg => {
            if needs_job_control(cmd) {
                eprintln!("fg: no job control");
                return 1;
            }
            let (label, jobno) = targets(&cmd.args, jobs).into_iter().next().unwrap();
            match jobno.and_then(|n| jobs.get(n)) {
                None => {
                    eprintln!("fg: {label}: no such job");
                    1
                }
                Some(job) if job.status() == JobStatus::Terminated => {
                    eprintln!("fg: job has terminated");
                    1
                }
                Some(_) => 0,
            }
        }
        Builtin::Exit => 0,
    }
}

/// What the parent must still do once the forked built-in has exited.
pub enum ParentOutcome {
    None,
    /// Hand the terminal to this job (1-based index) and wait for it.
    ForegroundJob(usize),
    RequestExit,
    /// A severe error (fork/pipe failure) that the caller must treat the
    /// same as `exit`: tear down rather than continue to the next command.
    FatalError,
}

/// Runs in the parent: applies the state change the child only announced.
pub fn run_in_parent(builtin: Builtin, cmd: &Command, jobs: &mut JobTable) -> ParentOutcome {
    match builtin {
        Builtin::Cd => {
            if let Some(dir) = cd_target(&cmd.args) {
                let _ = nix::unistd::chdir(dir.as_str());
            }
            ParentOutcome::None
        }
        Builtin::Jobs => {
            for job in jobs.iter_mut_valid() {
                job.notify_status = false;
            }
            ParentOutcome::None
        }
        Builtin::Bg => {
            if needs_job_control(cmd) {
                return ParentOutcome::None;
            }
            for (_, jobno) in targets(&cmd.args, jobs) {
                if let Some(n) = jobno {
                    if let Some(job) = jobs.get_mut(n) {
                        if job.status() == JobStatus::Stopped {
                            job.forced_running = true;
                        }
                    }
                }
            }
            ParentOutcome::None
        }
        Builtin::Fg => {
            if needs_job_control(cmd) {
                return ParentOutcome::None;
            }
            let (_, jobno) = targets(&cmd.args, jobs).into_iter().next().unwrap();
            match jobno.and_then(|n| jobs.get(n).map(|j| (n, j.status()))) {
                Some((n, status)) if status != JobStatus::Terminated => {
                    ParentOutcome::ForegroundJob(n)
                }
                _ => ParentOutcome::None,
            }
        }
        Builtin::Exit => ParentOutcome::RequestExit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_builtin_names() {
        assert_eq!(Builtin::recognize("cd"), Some(Builtin::Cd));
        assert_eq!(Builtin::recognize("jobs"), Some(Builtin::Jobs));
        assert_eq!(Builtin::recognize("bg"), Some(Builtin::Bg));
        assert_eq!(Builtin::recognize("fg"), Some(Builtin::Fg));
        assert_eq!(Builtin::recognize("exit"), Some(Builtin::Exit));
        assert_eq!(Builtin::recognize("ls"), None);
    }

    #[test]
    fn cd_falls_back_to_home() {
        std::env::set_var("HOME", "/test/home");
        assert_eq!(cd_target(&["cd".into()]), Some("/test/home".into()));
        assert_eq!(
            cd_target(&["cd".into(), "/tmp".into()]),
            Some("/tmp".into())
        );
    }

    #[test]
    fn parse_jobno_rejects_out_of_range() {
        assert_eq!(parse_jobno("3", 2), None);
        assert_eq!(parse_jobno("0", 2), None);
        assert_eq!(parse_jobno("2", 2), Some(2));
        assert_eq!(parse_jobno("x", 2), None);
    }
}
