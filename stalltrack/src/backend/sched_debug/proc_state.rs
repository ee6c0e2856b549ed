//! Per-process lookups needed while parsing task lines.

use std::{
    fs::File,
    io::Read,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use log::{debug, warn};

/// Bytes of `/proc/<pid>/stat` we look at; the state sits near the start.
const STAT_READ_SIZE: u64 = 512;

pub trait ProcessLookup {
    /// True only if the process is currently in the running state.
    fn is_runnable(&self, pid: i32) -> bool;

    /// Thread-group id of `pid`.
    fn tgid(&self, pid: i32) -> i32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Zombie,
    Other(char),
}

impl From<char> for ProcState {
    fn from(c: char) -> Self {
        match c {
            'R' => ProcState::Running,
            'S' => ProcState::Sleeping,
            'D' => ProcState::DiskSleep,
            'T' => ProcState::Stopped,
            'Z' => ProcState::Zombie,
            other => ProcState::Other(other),
        }
    }
}

impl ProcState {
    pub fn is_runnable(&self) -> bool {
        matches!(self, ProcState::Running)
    }
}

/// State character from the contents of a `/proc/<pid>/stat` file.
///
/// The state is the third field. The second field is the command name in
/// parentheses, which may itself contain spaces, so the search resumes after
/// its closing parenthesis when there is one.
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let fields = match stat.rfind(')') {
        Some(close) => stat[close + 1..].split_ascii_whitespace().next(),
        None => stat.split_ascii_whitespace().nth(2),
    };
    fields.and_then(|field| field.chars().next())
}

/// `/proc`-backed lookup.
#[derive(Debug, Clone)]
pub struct ProcLookup {
    root: PathBuf,
}

impl Default for ProcLookup {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the scheduling state of `pid`, holding a shared advisory lock on
    /// its stat file while reading. `None` if the process is gone.
    pub fn state(&self, pid: i32) -> Option<ProcState> {
        let path = self.root.join(pid.to_string()).join("stat");
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                debug!("error opening stat path for task {}: {}", pid, e);
                return None;
            }
        };

        let fd = file.as_raw_fd();
        let locked = unsafe { libc::flock(fd, libc::LOCK_SH) } == 0;

        let mut stat = Vec::with_capacity(STAT_READ_SIZE as usize);
        let read = (&file).take(STAT_READ_SIZE).read_to_end(&mut stat);

        if locked {
            unsafe { libc::flock(fd, libc::LOCK_UN) };
        }

        if let Err(e) = read {
            debug!("error reading stat for task {}: {}", pid, e);
            return None;
        }

        let stat = String::from_utf8_lossy(&stat);
        let Some(c) = parse_stat_state(&stat) else {
            warn!("no state field in {}", path.display());
            return Some(ProcState::Other(' '));
        };

        let state = ProcState::from(c);
        if let ProcState::Other(c) = state {
            warn!("invalid state({}) in {}", c, path.display());
        }
        Some(state)
    }
}

impl ProcessLookup for ProcLookup {
    fn is_runnable(&self, pid: i32) -> bool {
        if pid == 0 {
            return false;
        }
        self.state(pid).is_some_and(|state| state.is_runnable())
    }

    fn tgid(&self, pid: i32) -> i32 {
        let status = procfs::process::Process::new_with_root(self.root.join(pid.to_string()))
            .and_then(|process| process.status());
        match status {
            Ok(status) => status.tgid,
            Err(e) => {
                debug!("unable to read tgid of {}: {}", pid, e);
                pid
            }
        }
    }
}
