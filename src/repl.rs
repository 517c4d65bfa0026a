//! Top-level loop: prompt, parse, execute, reap. Grounded in
//! `shell.c::start_shell`/`reset_parsing_line`/`process_jobs`.

use std::rc::Rc;

use crate::execution::{Engine, LineOutcome};
use crate::parse::parse_line;
use crate::prompt::{Prompt, PromptLine};

pub fn run(mut engine: Engine) {
    let mut prompt = match Prompt::new() {
        Ok(prompt) => prompt,
        Err(err) => {
            log::warn!("repl event=prompt-init error={err}");
            return;
        }
    };

    loop {
        let line = match prompt.read_line() {
            PromptLine::Line(text) => text,
            PromptLine::Interrupted => continue,
            PromptLine::Eof => {
                teardown(&mut engine);
                break;
            }
        };

        let line = Rc::new(line);
        if line.trim().is_empty() {
            continue;
        }

        let commands = match parse_line(&line) {
            Ok(commands) => commands,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        if commands.is_empty() {
            continue;
        }

        match engine.execute_line(commands, Rc::clone(&line)) {
            LineOutcome::Continue => {}
            LineOutcome::RequestExit => {
                if engine.end_execution() {
                    break;
                }
                continue;
            }
        }

        engine.reconcile();
    }
}

fn teardown(engine: &mut Engine) {
    loop {
        if engine.end_execution() {
            break;
        }
    }
}
