//! The execution engine: forks commands into job-controlled process
//! groups, wires up pipes and redirections, dispatches built-ins, and runs
//! the foreground/background protocol.
//!
//! Grounded in the original `execute_cmd.c`'s `execute_cmd`/`move_cmd_to_job`
//! family, restructured around raw `fork`/`execvp` in the style the pack's
//! `ShipShell` pipeline stage uses, with the teacher's guard/logging
//! conventions layered on top.

use std::ffi::CString;
use std::os::fd::{BorrowedFd, IntoRawFd, RawFd};
use std::rc::Rc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{tcgetattr, Termios};
use nix::unistd::{close, dup2, execvp, fork, getpid, pipe, setpgid, ForkResult, Pid};

use crate::builtins::{self, Builtin, ParentOutcome};
use crate::command::{ChildState, Command};
use crate::job::{self, JobState, JobStatus, JobTable, TerminalDisplay};
use crate::redirection::Redirection;
use crate::signals::{self, ChildBlockGuard, SignalChannels};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipStrategy {
    None,
    OnFail,
    OnSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastResult {
    Success,
    Fail,
}

/// What the top-level loop should do after a line has run to completion.
pub enum LineOutcome {
    Continue,
    RequestExit,
}

/// Owns the job table and the persistent short-circuit/pipe state that
/// spans every command of an input line.
pub struct Engine {
    pub jobs: JobTable,
    channels: SignalChannels,
    shell_pgid: Pid,
    shell_termios: Termios,
    tty_fd: RawFd,
    trace: bool,
    pending_input: Option<RawFd>,
    skip_strategy: SkipStrategy,
    last_result: LastResult,
    stopped_warning_given: bool,
}

impl Engine {
    pub fn new(
        channels: SignalChannels,
        shell_pgid: Pid,
        shell_termios: Termios,
        tty_fd: RawFd,
        trace: bool,
    ) -> Self {
        Self {
            jobs: JobTable::new(),
            channels,
            shell_pgid,
            shell_termios,
            tty_fd,
            trace,
            pending_input: None,
            skip_strategy: SkipStrategy::None,
            last_result: LastResult::Success,
            stopped_warning_given: false,
        }
    }

    /// Runs every command of a parsed line in order.
    pub fn execute_line(&mut self, commands: Vec<Command>, line: Rc<String>) -> LineOutcome {
        self.pending_input = None;
        for cmd in commands {
            match self.execute_command(cmd, &line) {
                Some(ParentOutcome::ForegroundJob(jobno)) => self.run_foreground(jobno),
                Some(ParentOutcome::RequestExit) => return LineOutcome::RequestExit,
                Some(ParentOutcome::FatalError) => return LineOutcome::RequestExit,
                Some(ParentOutcome::None) | None => {}
            }
        }
        LineOutcome::Continue
    }

    /// End-of-line bookkeeping: absorb any queued background notifications,
    /// print status changes, and drop released jobs. Grounded in
    /// `shell.c::process_jobs`.
    pub fn reconcile(&mut self) {
        let _guard = ChildBlockGuard::block().ok();
        self.apply_pending_notifications();
        self.jobs.reconcile(|job, idx| {
            println!("{}", job.format_with_status(idx));
        });
    }

    /// `exit`'s teardown retry: `false` means a warning was printed and the
    /// shell should keep running; `true` means it is safe to terminate.
    pub fn end_execution(&mut self) -> bool {
        let _guard = ChildBlockGuard::block().ok();
        if self.jobs.has_stopped_jobs() && !self.stopped_warning_given {
            eprintln!("There are stopped jobs");
            self.stopped_warning_given = true;
            return false;
        }
        self.jobs.force_terminate_stopped();
        signals::reap_all_nonblocking();
        true
    }

    fn should_skip(&mut self, cmd: &Command) -> bool {
        let skip = match self.skip_strategy {
            SkipStrategy::OnFail => self.last_result == LastResult::Fail,
            SkipStrategy::OnSuccess => self.last_result == LastResult::Success,
            SkipStrategy::None => false,
        };
        if !cmd.flags.pipe_out {
            self.skip_strategy = if cmd.flags.skip_next_on_fail {
                SkipStrategy::OnFail
            } else if cmd.flags.skip_next_on_success {
                SkipStrategy::OnSuccess
            } else {
                SkipStrategy::None
            };
        }
        skip
    }

    /// Executes one [`Command`]: the core of §4.3. Returns what the parent
    /// half of a forked built-in still needs done, if this command was one.
    fn execute_command(&mut self, mut cmd: Command, line: &Rc<String>) -> Option<ParentOutcome> {
        let _guard = ChildBlockGuard::block().ok()?;

        if self.should_skip(&cmd) {
            log::trace!("execute event=skip program={}", cmd.program());
            if let Some(fd) = self.pending_input.take() {
                let _ = close(fd);
            }
            return None;
        }

        let builtin = Builtin::recognize(cmd.program());
        if builtin != Some(Builtin::Exit) {
            self.stopped_warning_given = false;
        }
        let pipe_out = cmd.flags.pipe_out;
        let background = cmd.flags.background;

        let output_pipe = if pipe_out {
            match pipe() {
                Ok((read, write)) => Some((read.into_raw_fd(), write.into_raw_fd())),
                Err(err) => {
                    log::warn!("execute event=pipe error={err}");
                    eprintln!("rshell: pipe: {err}");
                    return Some(ParentOutcome::FatalError);
                }
            }
        } else {
            None
        };

        let pending_input = self.pending_input.take();

        let (is_first, existing_pgid) = {
            let job = self.jobs.current_job_for_build(line);
            (job.state == JobState::Invalid, job.pgid)
        };

        let cmd_for_parent = builtin.map(|_| cmd.clone());

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let _ = signals::reset_child_signals(&self.channels);
                let my_pgid = if is_first { getpid() } else { existing_pgid };
                let _ = setpgid(Pid::from_raw(0), my_pgid);
                apply_redirections(&cmd, pending_input, output_pipe);
                if let Some(builtin) = builtin {
                    let code = builtins::run_in_child(builtin, &cmd, &self.jobs);
                    std::process::exit(code);
                }
                exec_program(&cmd);
            }
            Ok(ForkResult::Parent { child }) => {
                let pgid = if is_first { child } else { existing_pgid };
                let _ = setpgid(child, pgid);

                if let Some((_read, write)) = output_pipe {
                    let _ = close(write);
                }
                if let Some(fd) = pending_input {
                    let _ = close(fd);
                }
                self.pending_input = output_pipe.map(|(read, _)| read);

                cmd.pid = Some(child);
                cmd.child_state = ChildState::Continued;

                let jobno = {
                    let job = self.jobs.current_job_for_build(line);
                    if is_first {
                        job.pgid = pgid;
                        job.state = JobState::Constructing;
                    }
                    job.pid = child;
                    job.pipeline.push(cmd);
                    if !pipe_out {
                        job.state = JobState::Valid;
                    }
                    self.jobs.len()
                };

                log::debug!(
                    "execute event=fork pid={} pgid={} jobno={jobno}",
                    child.as_raw(),
                    pgid.as_raw()
                );
                if self.trace {
                    eprintln!(
                        "+ fork pid={} pgid={} jobno={jobno}",
                        child.as_raw(),
                        pgid.as_raw()
                    );
                }

                if pipe_out {
                    return None;
                }

                if background {
                    println!("[{jobno}]\t{}", child.as_raw());
                } else {
                    self.run_foreground(jobno);
                }

                if let (Some(b), Some(c)) = (builtin, cmd_for_parent) {
                    return Some(builtins::run_in_parent(b, &c, &mut self.jobs));
                }
            }
            Err(err) => {
                log::warn!("execute event=fork error={err}");
                eprintln!("rshell: fork: {err}");
                return Some(ParentOutcome::FatalError);
            }
        }

        None
    }

    /// §4.4: hand the terminal to `jobno`'s process group, resume it, wait
    /// for every still-live command in its pipeline, then reclaim the
    /// terminal.
    fn run_foreground(&mut self, jobno: usize) {
        let pgid = match self.jobs.get(jobno) {
            Some(job) => job.pgid,
            None => return,
        };
        let new_attrs = self
            .jobs
            .get(jobno)
            .and_then(|job| job.saved_termios.clone())
            .unwrap_or_else(|| self.shell_termios.clone());

        let old_attrs = match signals::give_terminal_to(self.tty_fd, pgid, &new_attrs) {
            Ok(old) => old,
            Err(err) => {
                log::warn!("execute event=give_terminal error={err}");
                return;
            }
        };

        let _ = kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGCONT);
        if let Some(job) = self.jobs.get_mut(jobno) {
            for cmd in &mut job.pipeline {
                cmd.child_state = ChildState::Continued;
            }
        }

        self.wait_for_pipeline(jobno);

        let fd = unsafe { BorrowedFd::borrow_raw(self.tty_fd) };
        if let Ok(current) = tcgetattr(fd) {
            if let Some(job) = self.jobs.get_mut(jobno) {
                job.saved_termios = Some(current);
            }
        }

        if let Err(err) = signals::get_terminal_back(self.tty_fd, self.shell_pgid, &old_attrs) {
            log::warn!("execute event=get_terminal_back error={err}");
        }
    }

    fn wait_for_pipeline(&mut self, jobno: usize) {
        self.apply_pending_notifications();
        let pids: Vec<Pid> = self
            .jobs
            .get(jobno)
            .map(|job| job.pipeline.iter().filter_map(|cmd| cmd.pid).collect())
            .unwrap_or_default();

        for pid in pids {
            self.apply_pending_notifications();
            let already_done = self
                .jobs
                .get(jobno)
                .and_then(|job| job.pipeline.iter().find(|cmd| cmd.pid == Some(pid)))
                .map(|cmd| !matches!(cmd.child_state, ChildState::Running | ChildState::Continued))
                .unwrap_or(true);
            if already_done {
                continue;
            }
            match signals::wait_for_handshake(self.channels.handshake_read, pid) {
                Ok(raw_status) => self.apply_status(jobno, pid, raw_status),
                Err(err) => log::warn!("execute event=wait pid={} error={err}", pid.as_raw()),
            }
        }
        self.finalize_job_status(jobno);
    }

    fn apply_status(&mut self, jobno: usize, pid: Pid, raw_status: i32) {
        let state = classify_status(raw_status);
        if let Some(job) = self.jobs.get_mut(jobno) {
            if job.pid == pid {
                job.raw_status = Some(raw_status);
            }
            if let Some(cmd) = job.find_command_mut(pid) {
                cmd.child_state = state;
            }
        }
    }

    fn finalize_job_status(&mut self, jobno: usize) {
        if let Some(job) = self.jobs.get_mut(jobno) {
            job.forced_running = false;
            match job.status() {
                JobStatus::Stopped => job.notify_status = true,
                JobStatus::Terminated => {
                    self.last_result = if job.terminal_display() == TerminalDisplay::Done {
                        LastResult::Success
                    } else {
                        LastResult::Fail
                    };
                }
                JobStatus::Running => {}
            }
        }
    }

    /// Drains whatever the async handler has queued for pids the shell was
    /// not synchronously waiting on, applying each to the job table.
    fn apply_pending_notifications(&mut self) {
        for note in signals::drain_notifications(self.channels.notify_read) {
            let state = classify_status(note.raw_status);
            if let Some((job, _idx)) = self.jobs.find_command_mut(note.pid) {
                if job.pid == note.pid {
                    job.raw_status = Some(note.raw_status);
                }
                if let Some(cmd) = job.find_command_mut(note.pid) {
                    cmd.child_state = state;
                }
                job.forced_running = false;
                if job.status() != JobStatus::Running {
                    job.notify_status = true;
                }
            }
        }
    }
}

fn classify_status(raw_status: i32) -> ChildState {
    if let Some(code) = job::exited_code(raw_status) {
        ChildState::Exited(code)
    } else if let Some(sig) = job::signaled_signal(raw_status) {
        if job::core_dumped(raw_status) {
            ChildState::Dumped
        } else {
            ChildState::Signaled(sig)
        }
    } else if job::stopped_signal(raw_status).is_some() {
        ChildState::Stopped
    } else {
        ChildState::Running
    }
}

/// §4.2: install a command's redirections, then wire the pipeline's
/// input/output pipes onto fd 0/1 unless explicitly overridden.
fn apply_redirections(cmd: &Command, pending_input: Option<RawFd>, output_pipe: Option<(RawFd, RawFd)>) {
    let mut stdin_redirected = false;
    let mut stdout_redirected = false;

    for (&fd, redir) in cmd.redirections.iter() {
        if fd == 0 {
            stdin_redirected = true;
        }
        if fd == 1 {
            stdout_redirected = true;
        }
        if let Err(err) = install_redirection(redir, fd) {
            eprintln!("{}: {err}", cmd.program());
            std::process::exit(1);
        }
    }

    if let Some(fd) = pending_input {
        if cmd.flags.pipe_in && !stdin_redirected {
            let _ = dup2(fd, 0);
        }
        let _ = close(fd);
    }

    if let Some((read, write)) = output_pipe {
        if cmd.flags.pipe_out && !stdout_redirected {
            let _ = dup2(write, 1);
        }
        let _ = close(read);
        let _ = close(write);
    }
}

fn install_redirection(redir: &Redirection, fd: RawFd) -> nix::Result<()> {
    match redir {
        Redirection::OpenName { path, flags, mode, .. } => {
            let opened = nix::fcntl::open(path.as_str(), *flags, *mode)?;
            dup2(opened, fd)?;
            close(opened)?;
            Ok(())
        }
        Redirection::DupFd { source_fd, .. } => {
            dup2(*source_fd, fd)?;
            Ok(())
        }
    }
}

/// Resolves and executes `cmd.args[0]` via the host's `PATH`, distinguishing
/// not-found/permission/directory failures the way the original's
/// `execute_shell_cmd` and the teacher's `spawn_error_message` both do.
fn exec_program(cmd: &Command) -> ! {
    let program = CString::new(cmd.program()).unwrap_or_default();
    let args: Vec<CString> = cmd
        .args
        .iter()
        .map(|arg| CString::new(arg.as_str()).unwrap_or_default())
        .collect();

    let err = match execvp(&program, &args) {
        Ok(infallible) => match infallible {},
        Err(err) => err,
    };
    match err {
        Errno::ENOENT => {
            eprintln!("{}: command not found", cmd.program());
            std::process::exit(127);
        }
        Errno::EACCES => {
            eprintln!("{}: permission denied", cmd.program());
            std::process::exit(126);
        }
        Errno::EISDIR => {
            eprintln!("{}: is a directory", cmd.program());
            std::process::exit(126);
        }
        other => {
            eprintln!("{}: {other}", cmd.program());
            std::process::exit(126);
        }
    }
}
