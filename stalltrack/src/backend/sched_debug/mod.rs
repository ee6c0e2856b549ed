//! Backend reading the kernel's textual scheduler debug interface
//! (`<debugfs>/sched/debug` or `/proc/sched_debug`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use stalltrack_common::{CpuAggregate, merge_task_info};

use crate::backend::{Backend, BackendError, RawBuffer};

pub mod acquire;
pub mod block;
pub mod format;
pub mod locate;
pub mod proc_state;
pub mod tasks;

use format::{FormatKind, TaskFormat};
use proc_state::{ProcLookup, ProcessLookup};

pub struct SchedDebugBackend<L = ProcLookup> {
    path: Option<PathBuf>,
    format: Option<TaskFormat>,
    initial_capacity: usize,
    lookup: L,
}

impl SchedDebugBackend<ProcLookup> {
    /// Backend over the real `/proc`. `path` overrides sched_debug discovery.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::with_lookup(path, ProcLookup::default())
    }
}

impl<L: ProcessLookup> SchedDebugBackend<L> {
    pub fn with_lookup(path: Option<PathBuf>, lookup: L) -> Self {
        Self {
            path,
            format: None,
            initial_capacity: 0,
            lookup,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn format(&self) -> Option<&TaskFormat> {
        self.format.as_ref()
    }

    pub fn format_kind(&self) -> FormatKind {
        self.format
            .map(|format| format.kind())
            .unwrap_or(FormatKind::Unknown)
    }

    /// Capacity the per-cycle reads start from, known after `init`.
    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    fn counter(block: &str, cpu: usize, counter: &'static str) -> Result<i64, BackendError> {
        tasks::counter_value(block, counter).ok_or(BackendError::MissingCounter { cpu, counter })
    }
}

impl<L: ProcessLookup> Backend for SchedDebugBackend<L> {
    fn name(&self) -> &'static str {
        "sched_debug"
    }

    fn init(&mut self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => locate::find_sched_debug_path()?,
        };
        info!("Using sched_debug at {}", path.display());

        let (format, capacity) = format::detect_source(&path, acquire::buffer_unit())
            .context("sched_debug task format detection failed")?;

        self.path = Some(path);
        self.format = Some(format);
        self.initial_capacity = capacity;
        Ok(())
    }

    fn get(&mut self, buffer: &mut RawBuffer) -> usize {
        let Some(path) = self.path.as_deref() else {
            return 0;
        };
        buffer.ensure_capacity(self.initial_capacity);
        acquire::read_sample(path, buffer)
    }

    fn parse(&self, cpu: &mut CpuAggregate, buffer: &str) -> Result<(), BackendError> {
        let format = self.format.as_ref().ok_or(BackendError::NotInitialized)?;

        let Some(block) = block::extract_cpu_block(buffer, cpu.id) else {
            debug!("cpu {} has no sched_debug block, it may be offline", cpu.id);
            cpu.reset();
            return Ok(());
        };

        // Only the state-column layout has usable run-queue counters.
        let (nr_running, nr_rt_running) = if format.has_counters() {
            (
                Self::counter(&block, cpu.id, ".nr_running")?,
                Self::counter(&block, cpu.id, ".rt_nr_running")?,
            )
        } else {
            (0, 0)
        };

        cpu.nr_running = nr_running;
        cpu.nr_rt_running = nr_rt_running;

        let nr_entries = match format {
            TaskFormat::Modern(_) => usize::try_from(nr_running).unwrap_or(0),
            TaskFormat::Legacy(_) => tasks::count_task_lines(&block),
        };

        let mut waiting =
            tasks::parse_task_lines(&block, format, nr_entries, &self.lookup, Utc::now());
        let old = std::mem::take(&mut cpu.tasks);
        merge_task_info(cpu.id, old, &mut waiting);
        cpu.tasks = waiting;

        Ok(())
    }

    fn has_starving_task(&self, cpu: &CpuAggregate) -> bool {
        self.format
            .as_ref()
            .is_some_and(|format| format.has_starving_task(cpu))
    }

    fn destroy(&mut self) {
        debug!("sched_debug backend released");
    }
}
