//! Building and validating a single redirection once the parser has
//! recognized its operator, target fd, and file name.
//!
//! Grounded in `parseline.c`'s `try_open_file`/`add_redirection`: the path is
//! opened and closed immediately to surface permission/existence errors
//! before fork, and the target fd is checked against `RLIMIT_NOFILE`.

use std::os::fd::RawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::resource::{getrlimit, Resource};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::error::{ErrorKind, ShellError, ShellResult};
use crate::redirection::Redirection;

const FILE_OPEN_MODE: Mode = Mode::from_bits_truncate(0o664);

pub fn validate_and_build(fd: RawFd, path: &str, flags: OFlag) -> ShellResult<Redirection> {
    check_fd_within_limit(fd)?;
    try_open_close(path, flags)?;
    Ok(Redirection::OpenName {
        fd,
        path: path.to_string(),
        flags,
        mode: FILE_OPEN_MODE,
    })
}

fn try_open_close(path: &str, flags: OFlag) -> ShellResult<()> {
    match fcntl::open(path, flags, FILE_OPEN_MODE) {
        Ok(opened) => {
            let _ = unistd::close(opened);
            Ok(())
        }
        Err(errno) => Err(ShellError::new(
            ErrorKind::Redirection,
            format!("{path}: {errno}"),
        )),
    }
}

fn check_fd_within_limit(fd: RawFd) -> ShellResult<()> {
    let (soft, _) = getrlimit(Resource::RLIMIT_NOFILE)
        .map_err(|e| ShellError::new(ErrorKind::Redirection, format!("getrlimit: {e}")))?;
    if fd < 0 || fd as u64 >= soft {
        return Err(ShellError::new(
            ErrorKind::Redirection,
            format!("{fd}: bad file descriptor"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_fd() {
        let err = validate_and_build(-1, "/dev/null", OFlag::O_RDONLY).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redirection);
    }

    #[test]
    fn opens_and_closes_existing_file() {
        validate_and_build(0, "/dev/null", OFlag::O_RDONLY).unwrap();
    }

    #[test]
    fn reports_missing_file() {
        let err =
            validate_and_build(0, "/definitely/not/a/real/path/xyz", OFlag::O_RDONLY).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redirection);
    }
}
