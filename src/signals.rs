//! Signal handling: shell-side dispositions, the child reset, the async
//! SIGCHLD handler, and the terminal handoff protocol.
//!
//! Grounded in the original's `sig.c`/`sig.h`. The handler itself must stay
//! async-signal-safe, so it touches only atomics and raw `libc::write` —
//! job-table mutation happens later, in ordinary code, fed by the bytes it
//! wrote to the notification pipe. The one pid the foreground waiter is
//! blocked on instead gets its status relayed through a second, one-shot
//! pipe (`waiting_pipe` in the original); that is the "handshake".

use std::io;
use std::os::fd::{BorrowedFd, IntoRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::{close, dup, getpgrp, getpid, getsid, isatty, pipe, setpgid, setsid, tcsetpgrp, Pid};

use crate::job::{exited_code, signaled_signal};

static WAITED_PID: AtomicI32 = AtomicI32::new(0);
static HANDSHAKE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static NOTIFY_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

fn io_err(err: impl std::fmt::Display) -> io::Error {
    io::Error::other(err.to_string())
}

/// Read ends of the two pipes the handler feeds. Kept alive for the
/// process lifetime; both ends must be closed explicitly in forked children.
pub struct SignalChannels {
    pub handshake_read: RawFd,
    pub handshake_write: RawFd,
    pub notify_read: RawFd,
    pub notify_write: RawFd,
}

/// One status update for a pid the shell was not synchronously waiting on.
pub struct Notification {
    pub pid: Pid,
    pub raw_status: i32,
}

fn wifstopped(status: i32) -> bool {
    (status & 0xff) == 0x7f
}

fn wifcontinued(status: i32) -> bool {
    status == 0xffff
}

extern "C" fn sigchld_handler(_signum: libc::c_int) {
    let saved_errno = unsafe { *libc::__errno_location() };

    let mut waited_pid_met = false;
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if pid <= 0 {
            break;
        }

        let waited = WAITED_PID.load(Ordering::SeqCst);
        if !waited_pid_met && waited != 0 && pid == waited && !wifcontinued(status) {
            let write_fd = HANDSHAKE_WRITE_FD.load(Ordering::SeqCst);
            if write_fd >= 0 {
                let bytes = status.to_ne_bytes();
                unsafe {
                    libc::write(write_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
                }
            }
            waited_pid_met = true;
            continue;
        }

        if wifcontinued(status) {
            continue;
        }
        let interesting = wifstopped(status)
            || exited_code(status).is_some()
            || signaled_signal(status).is_some();
        if !interesting {
            continue;
        }

        let notify_fd = NOTIFY_WRITE_FD.load(Ordering::SeqCst);
        if notify_fd >= 0 {
            let mut buf = [0u8; 8];
            buf[0..4].copy_from_slice(&pid.to_ne_bytes());
            buf[4..8].copy_from_slice(&status.to_ne_bytes());
            unsafe {
                libc::write(notify_fd, buf.as_ptr() as *const libc::c_void, buf.len());
            }
        }
    }

    unsafe {
        *libc::__errno_location() = saved_errno;
    }
}

/// Installs the shell's own dispositions: SIGCHLD gets the async handler,
/// job-control signals that would otherwise stop or kill an interactive
/// shell are ignored. Returns the two pipes the handler feeds.
pub fn install_shell_signals() -> io::Result<SignalChannels> {
    let (handshake_read, handshake_write) = pipe().map_err(io_err)?;
    let (notify_read, notify_write) = pipe().map_err(io_err)?;
    let handshake_read = handshake_read.into_raw_fd();
    let handshake_write = handshake_write.into_raw_fd();
    let notify_read = notify_read.into_raw_fd();
    let notify_write = notify_write.into_raw_fd();
    HANDSHAKE_WRITE_FD.store(handshake_write, Ordering::SeqCst);
    NOTIFY_WRITE_FD.store(notify_write, Ordering::SeqCst);

    let chld_action = SigAction::new(
        SigHandler::Handler(sigchld_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &chld_action) }.map_err(io_err)?;

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTERM,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        unsafe { sigaction(sig, &ignore) }.map_err(io_err)?;
    }

    set_nonblocking(notify_read)?;

    log::debug!("signal event=install mode=shell");
    Ok(SignalChannels {
        handshake_read,
        handshake_write,
        notify_read,
        notify_write,
    })
}

/// Restores default dispositions in a freshly forked child, and closes both
/// pipes so the child doesn't keep their write ends open.
pub fn reset_child_signals(channels: &SignalChannels) -> io::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGCHLD,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTERM,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        unsafe { sigaction(sig, &default) }.map_err(io_err)?;
    }
    for fd in [
        channels.handshake_read,
        channels.handshake_write,
        channels.notify_read,
        channels.notify_write,
    ] {
        let _ = close(fd);
    }
    Ok(())
}

/// Opens a controlling-terminal fd the shell can rely on for job control even
/// when stdin is redirected: dups stderr if it's a tty, otherwise opens
/// `/dev/tty` directly. Mirrors the original's
/// `shell_tty = isatty(shell_outfd) ? dup(shell_outfd) : open("/dev/tty", ...)`.
pub fn open_shell_tty() -> io::Result<RawFd> {
    let stderr = unsafe { BorrowedFd::borrow_raw(libc::STDERR_FILENO) };
    if isatty(stderr).unwrap_or(false) {
        dup(libc::STDERR_FILENO).map_err(io_err)
    } else {
        use nix::fcntl::{open, OFlag};
        open("/dev/tty", OFlag::O_RDWR, nix::sys::stat::Mode::empty()).map_err(io_err)
    }
}

/// Initializes the shell's session/process-group/controlling-terminal state
/// on startup. Mirrors the original's `init_shell`.
pub fn init_session(interactive: bool, tty_fd: RawFd) -> io::Result<Pid> {
    let pid = getpid();
    if interactive {
        let sid = getsid(None).map_err(io_err)?;
        if sid != pid {
            if let Err(err) = setsid() {
                if err != Errno::EPERM {
                    return Err(io_err(err));
                }
            }
        }
        let pgid = getpgrp();
        if pgid != pid {
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io_err)?;
        }
    }
    let pgid = getpgrp();
    let fd = unsafe { BorrowedFd::borrow_raw(tty_fd) };
    if let Err(err) = tcsetpgrp(fd, pgid) {
        if err != Errno::ENOTTY {
            return Err(io_err(err));
        }
    }
    Ok(pgid)
}

/// `BLOCK_CHILD`/`UNBLOCK_CHILD`: the critical-section guard used around
/// every job-table access outside the handler itself.
pub struct ChildBlockGuard {
    old: SigSet,
}

impl ChildBlockGuard {
    pub fn block() -> io::Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        let mut old = SigSet::empty();
        sigprocmask_block(&set, &mut old)?;
        Ok(Self { old })
    }
}

impl Drop for ChildBlockGuard {
    fn drop(&mut self) {
        if let Err(err) = sigprocmask_restore(&self.old) {
            log::warn!("signal event=restore mask error={err}");
        }
    }
}

/// Mask used during terminal handoff: `SIGTTOU`, `SIGTTIN`, `SIGTSTP`,
/// `SIGCHLD`, per the foreground protocol.
pub struct TerminalHandoffGuard {
    old: SigSet,
}

impl TerminalHandoffGuard {
    pub fn block() -> io::Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGTTOU);
        set.add(Signal::SIGTTIN);
        set.add(Signal::SIGTSTP);
        set.add(Signal::SIGCHLD);
        let mut old = SigSet::empty();
        sigprocmask_block(&set, &mut old)?;
        Ok(Self { old })
    }
}

impl Drop for TerminalHandoffGuard {
    fn drop(&mut self) {
        if let Err(err) = sigprocmask_restore(&self.old) {
            log::warn!("signal event=restore mask error={err}");
        }
    }
}

fn sigprocmask_block(set: &SigSet, old: &mut SigSet) -> io::Result<()> {
    nix::sys::signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(set), Some(old)).map_err(io_err)
}

fn sigprocmask_restore(old: &SigSet) -> io::Result<()> {
    nix::sys::signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(old), None).map_err(io_err)
}

/// Gives the controlling terminal to `pgid` under `new_attrs`, returning the
/// shell's previous termios so it can be restored later.
pub fn give_terminal_to(tty_fd: RawFd, pgid: Pid, new_attrs: &Termios) -> io::Result<Termios> {
    let _mask = TerminalHandoffGuard::block()?;
    let fd = unsafe { BorrowedFd::borrow_raw(tty_fd) };
    let old = tcgetattr(fd).map_err(io_err)?;
    tcsetattr(fd, SetArg::TCSADRAIN, new_attrs).map_err(io_err)?;
    match tcsetpgrp(fd, pgid) {
        Ok(()) | Err(Errno::ENOTTY) => {}
        Err(err) => return Err(io_err(err)),
    }
    Ok(old)
}

/// Reverse of [`give_terminal_to`]: reclaims the terminal for the shell and
/// restores its own termios, flushing whatever the background job left
/// queued on stdin.
pub fn get_terminal_back(tty_fd: RawFd, shell_pgid: Pid, saved_attrs: &Termios) -> io::Result<()> {
    let _mask = TerminalHandoffGuard::block()?;
    let fd = unsafe { BorrowedFd::borrow_raw(tty_fd) };
    match tcsetpgrp(fd, shell_pgid) {
        Ok(()) | Err(Errno::ENOTTY) => {}
        Err(err) => return Err(io_err(err)),
    }
    tcsetattr(fd, SetArg::TCSADRAIN, saved_attrs).map_err(io_err)?;
    let _ = nix::sys::termios::tcflush(fd, nix::sys::termios::FlushArg::TCIOFLUSH);
    Ok(())
}

/// Records the pid the foreground waiter is about to block on, unblocks
/// SIGCHLD, and polls the handshake pipe for exactly one status. Re-blocks
/// SIGCHLD before returning, mirroring `BLOCK_CHILD`/`UNBLOCK_CHILD` pairing
/// in `wait_for_job`. Must be called with SIGCHLD already blocked (i.e.
/// inside a [`ChildBlockGuard`] scope).
pub fn wait_for_handshake(handshake_read: RawFd, pid: Pid) -> io::Result<i32> {
    WAITED_PID.store(pid.as_raw(), Ordering::SeqCst);

    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    nix::sys::signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None).map_err(io_err)?;

    let mut pollfd = [nix::poll::PollFd::new(
        unsafe { BorrowedFd::borrow_raw(handshake_read) },
        nix::poll::PollFlags::POLLIN,
    )];
    let result = loop {
        match nix::poll::poll(&mut pollfd, nix::poll::PollTimeout::NONE) {
            Ok(n) => break n,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(io_err(err)),
        }
    };
    if result != 1 {
        return Err(io::Error::other("poll wait for child failed"));
    }

    let mut buf = [0u8; 4];
    let n = nix::unistd::read(handshake_read, &mut buf).map_err(io_err)?;
    if n != 4 {
        return Err(io::Error::other("pipe transmission error"));
    }

    nix::sys::signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(io_err)?;
    WAITED_PID.store(0, Ordering::SeqCst);

    Ok(i32::from_ne_bytes(buf))
}

/// Non-blocking drain of every background status update queued since the
/// last call. `notify_read` must have been opened/marked `O_NONBLOCK`.
pub fn drain_notifications(notify_read: RawFd) -> Vec<Notification> {
    let mut out = Vec::new();
    loop {
        let mut buf = [0u8; 8];
        match nix::unistd::read(notify_read, &mut buf) {
            Ok(8) => {
                let pid = i32::from_ne_bytes(buf[0..4].try_into().unwrap());
                let raw_status = i32::from_ne_bytes(buf[4..8].try_into().unwrap());
                out.push(Notification {
                    pid: Pid::from_raw(pid),
                    raw_status,
                });
            }
            Ok(_) => break,
            Err(Errno::EAGAIN) | Err(Errno::EWOULDBLOCK) => break,
            Err(_) => break,
        }
    }
    out
}

/// Marks `fd` non-blocking, used on the notify pipe's read end right after
/// `install_shell_signals` so `drain_notifications` never stalls the loop.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io_err)?;
    Ok(())
}

/// Reaps any already-dead children left over after signals were blocked for
/// a teardown critical section, so no zombie outlives `exit`.
pub fn reap_all_nonblocking() {
    loop {
        match waitid(
            Id::All,
            WaitPidFlag::WNOHANG | WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED,
        ) {
            Ok(nix::sys::wait::WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifstopped_matches_glibc_encoding() {
        assert!(wifstopped(0x7f | (19 << 8)));
        assert!(!wifstopped(0));
    }

    #[test]
    fn wifcontinued_is_the_sentinel_value() {
        assert!(wifcontinued(0xffff));
        assert!(!wifcontinued(0));
    }
}
