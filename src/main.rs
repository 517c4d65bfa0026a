//! Process entry point: logging, session/signal init, then the REPL.
//! Grounded in the original `shell.c::start_shell` and the teacher's
//! `main.rs`.

use std::os::fd::BorrowedFd;

use nix::sys::termios::tcgetattr;
use nix::unistd::isatty;

use rshell::execution::Engine;
use rshell::signals;

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RSHELL_LOG", "warn"))
        .format_timestamp_millis()
        .init();
}

fn trace_requested() -> bool {
    std::env::args().any(|arg| arg == "-x" || arg == "--trace")
}

fn main() {
    init_logging();
    let trace = trace_requested();
    if trace {
        log::debug!("main event=start trace=true");
    }

    let interactive = isatty(unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }).unwrap_or(false);

    let channels = match signals::install_shell_signals() {
        Ok(channels) => channels,
        Err(err) => {
            eprintln!("rshell: failed to install signal handlers: {err}");
            std::process::exit(1);
        }
    };

    let tty_fd = match signals::open_shell_tty() {
        Ok(fd) => fd,
        Err(err) => {
            eprintln!("rshell: failed to open controlling terminal: {err}");
            std::process::exit(1);
        }
    };

    let shell_pgid = match signals::init_session(interactive, tty_fd) {
        Ok(pgid) => pgid,
        Err(err) => {
            eprintln!("rshell: failed to init session: {err}");
            std::process::exit(1);
        }
    };

    let tty = unsafe { BorrowedFd::borrow_raw(tty_fd) };
    let shell_termios = match tcgetattr(tty) {
        Ok(termios) => termios,
        Err(err) => {
            eprintln!("rshell: failed to read terminal attributes: {err}");
            std::process::exit(1);
        }
    };

    let engine = Engine::new(channels, shell_pgid, shell_termios, tty_fd, trace);
    rshell::repl::run(engine);
}
