//! Jobs and the job table.
//!
//! Grounded in the original `jobs.c`/`jobs.h`: a job is a pipeline run as one
//! process group, tracked from `Invalid` (reserved slot) through
//! `Constructing` (first fork landed, so the SIGCHLD handler can find it by
//! pid) to `Valid` (whole pipeline forked). Status is derived from the
//! pipeline's commands the same way `get_job_status_internal` does, with
//! `forced_running` overriding the derived state right after `bg`/`fg` sends
//! `SIGCONT`.

use std::rc::Rc;

use nix::sys::termios::Termios;
use nix::unistd::Pid;

use crate::command::{ChildState, Command};

const STATUS_COLUMN_WIDTH: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Invalid,
    Constructing,
    Valid,
}

/// The coarse three-way partition the SIGCHLD handler watches for to decide
/// whether a job's status changed enough to need a `notify_status` print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Terminated,
}

/// Fine-grained terminal status, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalDisplay {
    Exited(i32),
    Done,
    Killed,
    Terminated,
}

pub struct Job {
    pub pgid: Pid,
    /// The pid whose return value the job's overall result is taken from —
    /// always the last process in the pipeline.
    pub pid: Pid,
    /// Raw wait-status of the last process, once known.
    pub raw_status: Option<i32>,
    pub pipeline: Vec<Command>,
    /// Shared handle to the command-line text this job came from, kept
    /// alive for `jobs`/`fg` display as long as any job still references it.
    pub line: Rc<String>,
    pub state: JobState,
    pub saved_termios: Option<Termios>,
    pub notify_status: bool,
    pub forced_running: bool,
}

impl Job {
    pub fn new_invalid(line: Rc<String>) -> Self {
        Self {
            pgid: Pid::from_raw(0),
            pid: Pid::from_raw(0),
            raw_status: None,
            pipeline: Vec::new(),
            line,
            state: JobState::Invalid,
            saved_termios: None,
            notify_status: false,
            forced_running: false,
        }
    }

    /// Three-way status used by the SIGCHLD handler/waiter to decide
    /// whether a notification is owed.
    pub fn status(&self) -> JobStatus {
        if self.state != JobState::Valid {
            return JobStatus::Terminated;
        }
        if self.forced_running {
            return JobStatus::Running;
        }
        let mut stopped = false;
        for cmd in &self.pipeline {
            match cmd.child_state {
                ChildState::Continued | ChildState::Running => return JobStatus::Running,
                ChildState::Stopped => stopped = true,
                _ => {}
            }
        }
        if stopped {
            JobStatus::Stopped
        } else {
            JobStatus::Terminated
        }
    }

    /// Display-only breakdown of a terminated job's exit.
    pub fn terminal_display(&self) -> TerminalDisplay {
        match self.raw_status {
            None => TerminalDisplay::Terminated,
            Some(status) => {
                if let Some(code) = exited_code(status) {
                    if code == 0 {
                        TerminalDisplay::Done
                    } else {
                        TerminalDisplay::Exited(code)
                    }
                } else if signaled_signal(status).is_some() {
                    TerminalDisplay::Killed
                } else {
                    TerminalDisplay::Terminated
                }
            }
        }
    }

    pub fn status_label(&self) -> String {
        match self.status() {
            JobStatus::Running => "Running".to_string(),
            JobStatus::Stopped => "Stopped".to_string(),
            JobStatus::Terminated => match self.terminal_display() {
                TerminalDisplay::Exited(code) => format!("Exit {code}"),
                TerminalDisplay::Done => "Done".to_string(),
                TerminalDisplay::Killed => "Killed".to_string(),
                TerminalDisplay::Terminated => "Terminated".to_string(),
            },
        }
    }

    /// Reconstructs the pipeline's source text for `jobs`/`fg` display,
    /// e.g. `sleep 5 &`.
    pub fn display_line(&self) -> String {
        let mut text = self.line.trim().to_string();
        if self.status() == JobStatus::Running
            && self.pipeline.last().is_some_and(|c| c.flags.background)
        {
            text.push_str(" &");
        }
        text
    }

    /// `[N]\t<status padded to 15 columns>\t<line>`
    pub fn format_with_status(&self, index: usize) -> String {
        format!(
            "[{}]\t{:<width$}\t{}",
            index,
            self.status_label(),
            self.display_line(),
            width = STATUS_COLUMN_WIDTH
        )
    }

    pub fn find_command_mut(&mut self, pid: Pid) -> Option<&mut Command> {
        self.pipeline.iter_mut().find(|cmd| cmd.pid == Some(pid))
    }
}

pub fn exited_code(raw_status: i32) -> Option<i32> {
    if libc_wifexited(raw_status) {
        Some(libc_wexitstatus(raw_status))
    } else {
        None
    }
}

pub fn signaled_signal(raw_status: i32) -> Option<i32> {
    if libc_wifsignaled(raw_status) {
        Some(libc_wtermsig(raw_status))
    } else {
        None
    }
}

pub fn stopped_signal(raw_status: i32) -> Option<i32> {
    if (raw_status & 0xff) == 0x7f {
        Some((raw_status >> 8) & 0xff)
    } else {
        None
    }
}

pub fn core_dumped(raw_status: i32) -> bool {
    raw_status & 0x80 != 0
}

fn libc_wifexited(status: i32) -> bool {
    (status & 0x7f) == 0
}

fn libc_wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}

fn libc_wifsignaled(status: i32) -> bool {
    ((status & 0x7f) + 1) as i8 >> 1 > 0
}

fn libc_wtermsig(status: i32) -> i32 {
    status & 0x7f
}

/// Ordered sequence of jobs. 1-based indices are what the user sees.
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn get(&self, jobno: usize) -> Option<&Job> {
        jobno.checked_sub(1).and_then(|i| self.jobs.get(i))
    }

    pub fn get_mut(&mut self, jobno: usize) -> Option<&mut Job> {
        jobno.checked_sub(1).and_then(|i| self.jobs.get_mut(i))
    }

    /// Mutable access to every non-`Invalid` job, for bulk state updates
    /// like clearing `notify_status` after `jobs` prints them.
    pub fn iter_mut_valid(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.iter_mut().filter(|job| job.state != JobState::Invalid)
    }

    /// Index (1-based) of the current job: the highest-numbered `Valid` job.
    pub fn current_jobno(&self) -> Option<usize> {
        self.jobs
            .iter()
            .enumerate()
            .rev()
            .find(|(_, job)| job.state == JobState::Valid)
            .map(|(i, _)| i + 1)
    }

    /// Acquire the job the engine should extend: the last job if it's not
    /// yet `Valid`, otherwise a freshly appended `Invalid` one.
    pub fn current_job_for_build(&mut self, line: &Rc<String>) -> &mut Job {
        let needs_new = self
            .jobs
            .last()
            .map(|job| job.state == JobState::Valid)
            .unwrap_or(true);
        if needs_new {
            self.jobs.push(Job::new_invalid(Rc::clone(line)));
        }
        self.jobs.last_mut().expect("job table is non-empty")
    }

    pub fn find_command_mut(&mut self, pid: Pid) -> Option<(&mut Job, usize)> {
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            if job.state != JobState::Invalid && job.find_command_mut(pid).is_some() {
                return Some((job, idx + 1));
            }
        }
        None
    }

    pub fn has_stopped_jobs(&self) -> bool {
        self.jobs.iter().any(|job| job.status() == JobStatus::Stopped)
    }

    /// Send `SIGTERM` then `SIGCONT` to every stopped job's process group,
    /// per the `exit`-with-stopped-jobs teardown.
    pub fn force_terminate_stopped(&self) {
        use nix::sys::signal::{kill, Signal};
        for job in &self.jobs {
            if job.status() == JobStatus::Stopped {
                let _ = kill(Pid::from_raw(-job.pgid.as_raw()), Signal::SIGTERM);
                let _ = kill(Pid::from_raw(-job.pgid.as_raw()), Signal::SIGCONT);
            }
        }
    }

    /// After each input line, emit notifications for jobs flagged
    /// `notify_status`, release terminated jobs, and truncate trailing
    /// released entries.
    pub fn reconcile<F: FnMut(&Job, usize)>(&mut self, mut notify: F) {
        let mut new_len = 0;
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            if job.state == JobState::Invalid {
                continue;
            }
            if job.notify_status {
                notify(job, idx + 1);
                job.notify_status = false;
            }
            if job.status() != JobStatus::Terminated {
                new_len = idx + 1;
            }
        }
        self.jobs.truncate(new_len);
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_job(state: JobState) -> Job {
        let mut job = Job::new_invalid(Rc::new(String::new()));
        job.state = state;
        job
    }

    #[test]
    fn current_jobno_picks_highest_valid() {
        let mut table = JobTable::new();
        table.jobs.push(dummy_job(JobState::Valid));
        table.jobs.push(dummy_job(JobState::Invalid));
        table.jobs.push(dummy_job(JobState::Valid));
        assert_eq!(table.current_jobno(), Some(3));
    }

    #[test]
    fn status_label_padding() {
        let mut job = dummy_job(JobState::Valid);
        job.pipeline.push(Command::new());
        job.pipeline[0].child_state = ChildState::Stopped;
        assert_eq!(job.status_label(), "Stopped");
    }

    #[test]
    fn forced_running_overrides_stopped_children() {
        let mut job = dummy_job(JobState::Valid);
        job.pipeline.push(Command::new());
        job.pipeline[0].child_state = ChildState::Stopped;
        job.forced_running = true;
        assert_eq!(job.status(), JobStatus::Running);
    }
}
