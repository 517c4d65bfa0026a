//! A parsed command: argv, redirections, execution flags, and the runtime
//! fields the engine fills in after forking.
//!
//! Grounded in the original `command.c`/`command.h`: `reset_cmd`/`release_cmd`
//! become `Command::new`/`Default`, and the bitfield flags become a plain
//! struct of bools.

use nix::unistd::Pid;

use crate::redirection::RedirectionMap;

/// Flags that customize how a command in a pipeline is executed.
///
/// At most one of `skip_next_on_success`/`skip_next_on_fail` is set per
/// command, and only the final command of a pipeline may carry
/// `background`, `skip_next_on_success`, or `skip_next_on_fail`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    pub background: bool,
    pub pipe_out: bool,
    pub pipe_in: bool,
    pub skip_next_on_success: bool,
    pub skip_next_on_fail: bool,
}

/// Last known state of a forked child, mirroring the original's
/// `CLD_*` si_code values recovered from `waitpid`/`waitid`-shaped status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Stopped,
    Exited(i32),
    Dumped,
    Signaled(i32),
    /// Not yet reaped since last start — the initial state of every command.
    Continued,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub args: Vec<String>,
    pub redirections: RedirectionMap,
    pub flags: CommandFlags,
    pub pid: Option<Pid>,
    pub child_state: ChildState,
}

impl Command {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            redirections: RedirectionMap::new(),
            flags: CommandFlags::default(),
            pid: None,
            child_state: ChildState::Continued,
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        !self.args.is_empty()
    }

    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Build the argv the `execvp`-style invocation needs: the parsed words
    /// plus the trailing sentinel the OS interface requires. Not part of the
    /// parsed form's own invariants.
    pub fn exec_argv(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(String::new());
        argv
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_command_is_not_dispatchable() {
        let cmd = Command::new();
        assert!(!cmd.is_dispatchable());
        assert_eq!(cmd.child_state, ChildState::Continued);
    }

    #[test]
    fn exec_argv_appends_sentinel() {
        let mut cmd = Command::new();
        cmd.args = vec!["echo".into(), "hi".into()];
        let argv = cmd.exec_argv();
        assert_eq!(argv, vec!["echo".to_string(), "hi".to_string(), String::new()]);
    }
}
