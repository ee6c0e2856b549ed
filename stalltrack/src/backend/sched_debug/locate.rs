use std::path::PathBuf;

use anyhow::{Result, bail};
use log::info;

const PROC_MOUNTS: &str = "/proc/mounts";
const PROC_SCHED_DEBUG: &str = "/proc/sched_debug";

/// Mount point of the first debugfs listed in a `/proc/mounts` text.
pub fn debugfs_mount(mounts: &str) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_ascii_whitespace();
        let _source = fields.next()?;
        let target = fields.next()?;
        let fstype = fields.next()?;
        (fstype == "debugfs").then(|| PathBuf::from(target))
    })
}

/// Places sched_debug may live, in order of preference.
pub fn candidates(mounts: &str) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);
    if let Some(debugfs) = debugfs_mount(mounts) {
        paths.push(debugfs.join("sched").join("debug"));
    }
    paths.push(PathBuf::from(PROC_SCHED_DEBUG));
    paths
}

/// Find the sched_debug file: debugfs first, then procfs.
pub fn find_sched_debug_path() -> Result<PathBuf> {
    let mounts = std::fs::read_to_string(PROC_MOUNTS).unwrap_or_default();
    first_existing(&candidates(&mounts))
}

fn first_existing(paths: &[PathBuf]) -> Result<PathBuf> {
    for path in paths {
        let exists = path.exists();
        info!(
            "{} {}",
            path.display(),
            if exists { "exists" } else { "doesn't exist" }
        );
        if exists {
            return Ok(path.clone());
        }
    }
    bail!("could not find the sched_debug file")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
debugfs /sys/kernel/debug debugfs rw,nosuid,nodev,noexec,relatime 0 0
tracefs /sys/kernel/tracing tracefs rw,nosuid,nodev,noexec,relatime 0 0
";

    #[test]
    fn test_debugfs_mount() {
        assert_eq!(
            debugfs_mount(MOUNTS),
            Some(PathBuf::from("/sys/kernel/debug"))
        );
        assert_eq!(debugfs_mount("proc /proc proc rw 0 0\n"), None);
    }

    #[test]
    fn test_candidates_prefer_debugfs() {
        assert_eq!(
            candidates(MOUNTS),
            vec![
                PathBuf::from("/sys/kernel/debug/sched/debug"),
                PathBuf::from("/proc/sched_debug"),
            ]
        );
        assert_eq!(candidates(""), vec![PathBuf::from("/proc/sched_debug")]);
    }

    #[test]
    fn test_first_existing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let paths = vec![
            PathBuf::from("/nonexistent/sched/debug"),
            file.path().to_path_buf(),
        ];
        assert_eq!(first_existing(&paths).unwrap(), file.path());
        assert!(first_existing(&paths[..1]).is_err());
    }
}
