//! Error types and reporting for the shell.
//!
//! Functions that surface a shell-facing diagnostic return `ShellError`, which
//! carries an `ErrorKind`, a message, and optional context. Functions that
//! wrap a syscall directly (fork, pipe, setpgid, tcset*) instead return
//! `io::Result`, matching how `job.rs`/`execution.rs` use `io::Error::other`
//! around `nix::Errno`.

use std::fmt;

/// Categorized error types for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Syntax error during tokenization/parsing.
    Parse,
    /// Error with input/output redirections.
    Redirection,
    /// Error executing a command.
    Execution,
    /// Job-addressing error (`fg`/`bg` with an unknown job number).
    Job,
    /// Error from a signal or terminal syscall.
    Signal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "parse error"),
            ErrorKind::Redirection => write!(f, "redirection error"),
            ErrorKind::Execution => write!(f, "execution error"),
            ErrorKind::Job => write!(f, "job error"),
            ErrorKind::Signal => write!(f, "signal error"),
        }
    }
}

/// A shell-facing error with optional context.
#[derive(Debug, Clone)]
pub struct ShellError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<String>,
}

impl ShellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ShellError {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, "\n  hint: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShellError {}

pub type ShellResult<T> = Result<T, ShellError>;
