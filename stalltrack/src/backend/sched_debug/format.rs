//! Task-line layouts of the sched_debug "runnable tasks" section.
//!
//! The section has changed shape across kernel releases. Older kernels
//! (3.x) print no per-task state, except an `R` label in front of the task
//! currently on the CPU:
//!
//! ```text
//!             task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
//!  ----------------------------------------------------------------------------------------------------------
//!       watchdog/5    33        -8.984472       151     0         0.000000         0.535614         0.000000 0 /
//! R           less  9542      2382.087644        56   120         0.000000        16.444493         0.000000 0 /
//! ```
//!
//! 4.18+ kernels prefix every line with a state column, headed `S`:
//!
//! ```text
//!  S           task   PID         tree-key  switches  prio     wait-time             sum-exec        sum-sleep
//! -----------------------------------------------------------------------------------------------------------
//!  I         rcu_gp     3        13.973264         2   100         0.000000         0.004469         0.000000 0 0 /
//! ```
//!
//! 6.12 added EEVDF columns, which moves `switches` and `prio` further right,
//! so field positions are discovered from the header instead of hardcoded.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use stalltrack_common::CpuAggregate;
use thiserror::Error;

use super::acquire;

pub const TASK_MARKER: &str = "runnable tasks:";

/// First header word of the state-column layout.
pub const STATE_SENTINEL: char = 'S';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Unknown,
    Legacy,
    Modern,
}

/// Word indices (not byte offsets) of the fields read from each task line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOffsets {
    pub task: usize,
    pub pid: usize,
    pub switches: usize,
    pub prio: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("sched_debug is empty")]
    Empty,
    #[error("unable to find 'runnable tasks:' in buffer, invalid input")]
    MissingTaskMarker,
    #[error("did not detect all task line fields we need (missing: {})", .missing.join(", "))]
    MissingFields { missing: Vec<&'static str> },
}

/// Detected layout, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFormat {
    /// No state column. The running task is marked `R`; everything else
    /// needs a `/proc/<pid>/stat` lookup to know if it is runnable.
    Legacy(FormatOffsets),
    /// Explicit state column plus `.nr_running`/`.rt_nr_running` counters.
    Modern(FormatOffsets),
}

impl TaskFormat {
    pub fn kind(&self) -> FormatKind {
        match self {
            TaskFormat::Legacy(_) => FormatKind::Legacy,
            TaskFormat::Modern(_) => FormatKind::Modern,
        }
    }

    pub fn offsets(&self) -> &FormatOffsets {
        match self {
            TaskFormat::Legacy(offsets) | TaskFormat::Modern(offsets) => offsets,
        }
    }

    /// Whether `line` is dropped before its fields are read.
    ///
    /// Legacy kernels print the marker in column 0 directly in front of a
    /// name padded to 15 columns, so a 15-character name fuses with it
    /// (`Rkworker/u16:12`). Every other legacy line starts with a blank.
    pub fn skips_line(&self, line: &str) -> bool {
        match self {
            TaskFormat::Legacy(_) => line.starts_with('R'),
            TaskFormat::Modern(_) => false,
        }
    }

    /// Whether a parsed task must be confirmed runnable through
    /// `/proc/<pid>/stat` before it is kept.
    pub fn needs_state_lookup(&self) -> bool {
        matches!(self, TaskFormat::Legacy(_))
    }

    pub fn has_counters(&self) -> bool {
        matches!(self, TaskFormat::Modern(_))
    }

    pub fn has_starving_task(&self, cpu: &CpuAggregate) -> bool {
        match self {
            TaskFormat::Modern(_) => cpu.nr_rt_running != 0,
            TaskFormat::Legacy(_) => cpu.nr_waiting() > 0,
        }
    }
}

/// Classify a captured sched_debug text and find the task-line fields.
pub fn detect_format(text: &str) -> Result<TaskFormat, FormatError> {
    if text.is_empty() {
        return Err(FormatError::Empty);
    }

    let marker = text
        .find(TASK_MARKER)
        .ok_or(FormatError::MissingTaskMarker)?;
    let after_marker = &text[marker..];
    let header = after_marker
        .split_once('\n')
        .map(|(_, rest)| rest.split('\n').next().unwrap_or(""))
        .unwrap_or("");

    let modern = header.trim_start().starts_with(STATE_SENTINEL);
    if modern {
        info!("detect_task_format: NEW_TASK_FORMAT detected");
    } else {
        info!("detect_task_format: OLD_TASK_FORMAT detected");
    }

    let mut task = None;
    let mut pid = None;
    let mut switches = None;
    let mut prio = None;

    for (i, word) in header.split_ascii_whitespace().enumerate() {
        let slot = match word {
            "task" => &mut task,
            "PID" => &mut pid,
            "switches" => &mut switches,
            "prio" => &mut prio,
            _ => continue,
        };
        if slot.is_none() {
            info!("detect_task_format: found '{}' at word {}", word, i);
            *slot = Some(i);
        }
    }

    match (task, pid, switches, prio) {
        (Some(task), Some(pid), Some(switches), Some(prio)) => {
            let offsets = FormatOffsets {
                task,
                pid,
                switches,
                prio,
            };
            Ok(if modern {
                TaskFormat::Modern(offsets)
            } else {
                TaskFormat::Legacy(offsets)
            })
        }
        _ => {
            let missing = [
                ("task", task),
                ("PID", pid),
                ("switches", switches),
                ("prio", prio),
            ]
            .into_iter()
            .filter(|(_, found)| found.is_none())
            .map(|(name, _)| name)
            .collect();
            Err(FormatError::MissingFields { missing })
        }
    }
}

/// Read the whole source once and detect its format.
///
/// Also returns the buffer capacity that was needed, which seeds the
/// per-cycle reads.
pub fn detect_source(path: &Path, unit: usize) -> Result<(TaskFormat, usize)> {
    let (data, capacity) = acquire::read_whole(path, unit)?;
    let text = String::from_utf8_lossy(&data);
    let format = detect_format(&text)
        .with_context(|| format!("can't handle task format of {}", path.display()))?;
    Ok((format, capacity))
}
