//! Redirection descriptors and the per-command redirection map.
//!
//! Grounded in the original shell's `redirection.c`/`redirection.h`: a
//! redirection either opens a path with flags+mode, or dups an
//! already-open fd onto the target fd. The map enforces the two insertion
//! disciplines the parser needs (`<` first-wins, `>`/`>>` last-wins) while
//! keeping ascending-fd iteration order for display and application.

use std::collections::BTreeMap;
use std::os::fd::RawFd;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

/// One redirection to be installed in the child before `execvp`.
#[derive(Debug, Clone)]
pub enum Redirection {
    /// Resolve `path` with `flags`/`mode` at execution time and dup2 it onto `fd`.
    OpenName {
        fd: RawFd,
        path: String,
        flags: OFlag,
        mode: Mode,
    },
    /// Duplicate `source_fd` onto `fd`.
    DupFd { fd: RawFd, source_fd: RawFd },
}

impl Redirection {
    pub fn fd(&self) -> RawFd {
        match self {
            Redirection::OpenName { fd, .. } => *fd,
            Redirection::DupFd { fd, .. } => *fd,
        }
    }
}

/// Ordered `fd -> Redirection` mapping. Ascending-fd iteration order.
#[derive(Debug, Clone, Default)]
pub struct RedirectionMap {
    entries: BTreeMap<RawFd, Redirection>,
}

impl RedirectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input-redirection discipline: keep whichever was inserted first.
    pub fn insert_first_wins(&mut self, redirection: Redirection) {
        self.entries.entry(redirection.fd()).or_insert(redirection);
    }

    /// Output-redirection discipline: the latest insertion wins.
    pub fn insert_last_wins(&mut self, redirection: Redirection) {
        self.entries.insert(redirection.fd(), redirection);
    }

    pub fn get(&self, fd: RawFd) -> Option<&Redirection> {
        self.entries.get(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.entries.contains_key(&fd)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in ascending fd order, the order redirections must be applied in.
    pub fn iter(&self) -> impl Iterator<Item = (&RawFd, &Redirection)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_name(fd: RawFd, path: &str) -> Redirection {
        Redirection::OpenName {
            fd,
            path: path.to_string(),
            flags: OFlag::O_RDONLY,
            mode: Mode::empty(),
        }
    }

    #[test]
    fn first_wins_keeps_earliest_input_redirection() {
        let mut map = RedirectionMap::new();
        map.insert_first_wins(open_name(0, "a"));
        map.insert_first_wins(open_name(0, "b"));
        match map.get(0).unwrap() {
            Redirection::OpenName { path, .. } => assert_eq!(path, "a"),
            _ => panic!("expected OpenName"),
        }
    }

    #[test]
    fn last_wins_keeps_latest_output_redirection() {
        let mut map = RedirectionMap::new();
        map.insert_last_wins(open_name(1, "a"));
        map.insert_last_wins(open_name(1, "b"));
        match map.get(1).unwrap() {
            Redirection::OpenName { path, .. } => assert_eq!(path, "b"),
            _ => panic!("expected OpenName"),
        }
    }

    #[test]
    fn iteration_is_ascending_by_fd() {
        let mut map = RedirectionMap::new();
        map.insert_last_wins(open_name(2, "err"));
        map.insert_last_wins(open_name(0, "in"));
        map.insert_last_wins(open_name(1, "out"));
        let fds: Vec<RawFd> = map.iter().map(|(fd, _)| *fd).collect();
        assert_eq!(fds, vec![0, 1, 2]);
    }
}
