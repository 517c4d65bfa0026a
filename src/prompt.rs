//! Minimal prompt collaborator: renders `user@host:cwd` and reads one line.
//!
//! Prompt decoration beyond this, continuation joining, comment stripping,
//! and balance checking are out of scope (§1) — this crate hands the line
//! parser raw, single-line input and lets it reject what it can't handle.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub struct Prompt {
    editor: DefaultEditor,
}

/// Outcome of reading one line from the terminal.
pub enum PromptLine {
    Line(String),
    Eof,
    Interrupted,
}

impl Prompt {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    pub fn read_line(&mut self) -> PromptLine {
        match self.editor.readline(&render_prompt()) {
            Ok(line) => {
                let _ = self.editor.add_history_entry(line.as_str());
                PromptLine::Line(line)
            }
            Err(ReadlineError::Eof) => PromptLine::Eof,
            Err(ReadlineError::Interrupted) => PromptLine::Interrupted,
            Err(err) => {
                log::warn!("prompt event=read error={err}");
                PromptLine::Eof
            }
        }
    }
}

fn render_prompt() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .unwrap_or_else(|_| "host".to_string())
        .trim()
        .to_string();
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "?".to_string());
    format!("{user}@{host}:{cwd}$ ")
}
