//! Backend-agnostic run-queue data shared by every stalltrack data source.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::debug;

/// Bound on a task name, including the terminating slot the kernel reserves
/// (`TASK_COMM_LEN`). Stored names hold at most `COMM_SIZE - 1` bytes.
pub const COMM_SIZE: usize = 16;

/// One task seen waiting on a CPU's run queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub comm: String,
    pub pid: i32,
    pub tgid: i32,
    pub ctxsw: i64,
    pub prio: i32,
    /// When this task was first observed waiting.
    pub since: DateTime<Utc>,
}

impl TaskRecord {
    /// How long the task has been waiting as of `now`.
    pub fn waiting_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.since)
    }
}

/// Per-CPU view rebuilt every sampling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuAggregate {
    pub id: usize,
    pub tasks: Vec<TaskRecord>,
    pub nr_running: i64,
    pub nr_rt_running: i64,
}

impl CpuAggregate {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn nr_waiting(&self) -> usize {
        self.tasks.len()
    }

    /// Drop everything learned about this CPU, e.g. when it went offline.
    pub fn reset(&mut self) {
        self.tasks = Vec::new();
        self.nr_running = 0;
        self.nr_rt_running = 0;
    }

    /// Tasks that have been waiting for at least `threshold` as of `now`.
    pub fn starving_tasks(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> impl Iterator<Item = &TaskRecord> {
        self.tasks
            .iter()
            .filter(move |task| task.waiting_for(now) >= threshold)
    }
}

/// Carry the "waiting since" stamp of tasks that were already waiting in the
/// previous cycle over to the freshly parsed records.
///
/// Tasks are matched by pid only. `old` is consumed; new arrivals keep the
/// stamp the parser gave them.
pub fn merge_task_info(cpu: usize, old: Vec<TaskRecord>, new: &mut [TaskRecord]) {
    if old.is_empty() || new.is_empty() {
        return;
    }

    let previous: HashMap<i32, TaskRecord> =
        old.into_iter().map(|task| (task.pid, task)).collect();

    for task in new.iter_mut() {
        let Some(prev) = previous.get(&task.pid) else {
            continue;
        };

        if prev.ctxsw != task.ctxsw {
            debug!(
                "cpu {}: pid {} ({}) switched {} -> {} times while queued",
                cpu, task.pid, task.comm, prev.ctxsw, task.ctxsw
            );
        }
        task.since = prev.since;
    }
}
