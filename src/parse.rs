//! The line parser: turns one input line into an ordered sequence of
//! [`Command`]s connected by pipe/sequence/background/short-circuit
//! operators, with redirections attached.
//!
//! Grounded in `parseline.c::parse_line`. The marker-based expansion/glob
//! machinery the original also threads through this file has no counterpart
//! here: words are taken verbatim, so the state machine only needs to track
//! tokens, operators, and redirections.

mod redirection_parser;

use nix::fcntl::OFlag;

use crate::command::Command;
use crate::error::{ErrorKind, ShellError, ShellResult};

fn is_metachar(c: char) -> bool {
    matches!(c, '|' | '&' | '<' | '>' | ';')
}

fn skip_whitespace(chars: &[char], i: &mut usize) {
    while *i < chars.len() && chars[*i].is_whitespace() {
        *i += 1;
    }
}

fn scan_word(chars: &[char], i: &mut usize) -> String {
    let start = *i;
    while *i < chars.len() && !chars[*i].is_whitespace() && !is_metachar(chars[*i]) {
        *i += 1;
    }
    chars[start..*i].iter().collect()
}

/// If the last pushed argument parses entirely as a decimal fd number, pop
/// and return it. Used only when no whitespace separated it from the
/// redirection operator that follows.
fn take_trailing_fd(cmd: &mut Command) -> Option<i32> {
    let last = cmd.args.last()?;
    if last.is_empty() {
        return None;
    }
    let fd: i32 = last.parse().ok()?;
    cmd.args.pop();
    Some(fd)
}

/// Pushes the command being built into the output and starts a fresh one,
/// propagating `pipe_out -> pipe_in` across the boundary.
fn flush(cmd: &mut Command, commands: &mut Vec<Command>) {
    let pipe_out = cmd.flags.pipe_out;
    let finished = std::mem::replace(cmd, Command::new());
    commands.push(finished);
    if pipe_out {
        cmd.flags.pipe_in = true;
    }
}

fn require_nonempty(cmd: &Command, op: &str) -> ShellResult<()> {
    if cmd.args.is_empty() {
        Err(ShellError::new(
            ErrorKind::Parse,
            format!("syntax error: no command before {op}"),
        ))
    } else {
        Ok(())
    }
}

pub fn parse_line(line: &str) -> ShellResult<Vec<Command>> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    let mut commands = Vec::new();
    let mut cmd = Command::new();
    let mut argument_just_pushed = false;

    while i < chars.len() {
        let before_skip = i;
        skip_whitespace(&chars, &mut i);
        if i >= chars.len() {
            break;
        }
        let skipped_ws = i > before_skip;
        let mut pushed_this_step = false;

        match chars[i] {
            '<' => {
                let fd = if argument_just_pushed && !skipped_ws {
                    take_trailing_fd(&mut cmd)
                } else {
                    None
                };
                i += 1;
                if i < chars.len() && chars[i] == '<' {
                    return Err(ShellError::new(
                        ErrorKind::Parse,
                        "here-documents are not supported",
                    ));
                }
                let downgraded = i < chars.len() && chars[i] == '>';
                if downgraded {
                    i += 1;
                }
                skip_whitespace(&chars, &mut i);
                let path = scan_word(&chars, &mut i);
                if path.is_empty() {
                    return Err(ShellError::new(
                        ErrorKind::Parse,
                        "syntax error: unspecified redirection",
                    ));
                }
                let target_fd = fd.unwrap_or(libc::STDIN_FILENO);
                let redir =
                    redirection_parser::validate_and_build(target_fd, &path, OFlag::O_RDONLY)?;
                cmd.redirections.insert_first_wins(redir);
                if downgraded {
                    log::warn!(
                        "redirection operator=<> supported=false path={path} fallback=input-only"
                    );
                }
            }
            '>' => {
                let fd = if argument_just_pushed && !skipped_ws {
                    take_trailing_fd(&mut cmd)
                } else {
                    None
                };
                i += 1;
                let append = i < chars.len() && chars[i] == '>';
                if append {
                    i += 1;
                }
                skip_whitespace(&chars, &mut i);
                let path = scan_word(&chars, &mut i);
                if path.is_empty() {
                    return Err(ShellError::new(
                        ErrorKind::Parse,
                        "syntax error: unspecified redirection",
                    ));
                }
                let target_fd = fd.unwrap_or(libc::STDOUT_FILENO);
                let flags = OFlag::O_CREAT
                    | OFlag::O_WRONLY
                    | if append { OFlag::O_APPEND } else { OFlag::O_TRUNC };
                let redir = redirection_parser::validate_and_build(target_fd, &path, flags)?;
                cmd.redirections.insert_last_wins(redir);
            }
            '|' => {
                i += 1;
                require_nonempty(&cmd, "|")?;
                if i < chars.len() && chars[i] == '|' {
                    i += 1;
                    cmd.flags.skip_next_on_success = true;
                } else {
                    cmd.flags.pipe_out = true;
                }
                flush(&mut cmd, &mut commands);
            }
            ';' => {
                i += 1;
                require_nonempty(&cmd, ";")?;
                flush(&mut cmd, &mut commands);
            }
            '&' => {
                i += 1;
                require_nonempty(&cmd, "&")?;
                if i < chars.len() && chars[i] == '&' {
                    i += 1;
                    cmd.flags.skip_next_on_fail = true;
                } else {
                    cmd.flags.background = true;
                }
                flush(&mut cmd, &mut commands);
            }
            _ => {
                let word = scan_word(&chars, &mut i);
                cmd.args.push(word);
                pushed_this_step = true;
            }
        }
        argument_just_pushed = pushed_this_step;
    }

    if cmd.args.is_empty() {
        let dangling = commands.last().is_some_and(|last| {
            last.flags.pipe_out || last.flags.skip_next_on_fail || last.flags.skip_next_on_success
        });
        if dangling {
            return Err(ShellError::new(
                ErrorKind::Parse,
                "syntax error: unexpected end of line",
            ));
        }
    } else {
        commands.push(cmd);
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_pipeline() {
        let cmds = parse_line("echo hi | wc -l").unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].args, vec!["echo", "hi"]);
        assert!(cmds[0].flags.pipe_out);
        assert!(cmds[1].flags.pipe_in);
        assert_eq!(cmds[1].args, vec!["wc", "-l"]);
    }

    #[test]
    fn background_sets_flag_on_last_command() {
        let cmds = parse_line("sleep 5 &").unwrap();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].flags.background);
    }

    #[test]
    fn short_circuit_operators_set_flags() {
        let cmds = parse_line("false && echo a ; true || echo b").unwrap();
        assert_eq!(cmds.len(), 4);
        assert!(cmds[0].flags.skip_next_on_fail);
        assert!(!cmds[1].flags.skip_next_on_fail);
        assert!(cmds[2].flags.skip_next_on_success);
    }

    #[test]
    fn fd_prefix_requires_no_whitespace() {
        let cmds = parse_line("cmd 2> /dev/null").unwrap();
        assert_eq!(cmds[0].args, vec!["cmd"]);
        assert_eq!(cmds[0].redirections.get(2).map(|r| r.fd()), Some(2));

        let cmds = parse_line("cmd 2 > /dev/null").unwrap();
        assert_eq!(cmds[0].args, vec!["cmd", "2"]);
        assert!(cmds[0].redirections.get(1).is_some());
    }

    #[test]
    fn redirect_to_nonexistent_file_for_read_fails() {
        let err = parse_line("cmd < /no/such/file/at/all").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redirection);
    }

    #[test]
    fn empty_line_yields_no_commands() {
        assert!(parse_line("").unwrap().is_empty());
        assert!(parse_line("   ").unwrap().is_empty());
    }

    #[test]
    fn pipe_with_nothing_before_it_is_an_error() {
        let err = parse_line("| echo hi").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn heredoc_operator_is_rejected() {
        let err = parse_line("cmd << EOF").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn trailing_pipe_is_a_syntax_error() {
        let err = parse_line("echo hi |").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn trailing_and_and_is_a_syntax_error() {
        let err = parse_line("false &&").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn trailing_background_is_not_an_error() {
        let cmds = parse_line("sleep 5 &").unwrap();
        assert_eq!(cmds.len(), 1);
    }
}
