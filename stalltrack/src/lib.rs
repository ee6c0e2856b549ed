pub mod backend;
pub mod settings;
pub mod telemetry;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use log::{info, warn};
use stalltrack_common::CpuAggregate;
use tokio::signal;

use crate::backend::{
    Backend, RawBuffer, SchedDebugBackend, request_shutdown, sched_debug::proc_state::ProcLookup,
    shutdown_flag,
};
use crate::settings::Settings;

/// A task found waiting past the starving threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarvingTask {
    pub cpu: usize,
    pub pid: i32,
    pub tgid: i32,
    pub comm: String,
    pub waited: Duration,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub bytes: usize,
    pub starving: Vec<StarvingTask>,
}

pub struct StallTrackEngine<B: Backend = SchedDebugBackend> {
    pub settings: Settings,
    backend: B,
    cpus: Vec<CpuAggregate>,
    buffer: RawBuffer,
    threshold: Duration,
}

impl StallTrackEngine<SchedDebugBackend> {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let backend = SchedDebugBackend::with_lookup(
            settings.sched_debug_path(),
            ProcLookup::new(settings.proc_root()),
        );
        Self::new(settings, backend)
    }
}

impl<B: Backend> StallTrackEngine<B> {
    /// Initialize `backend` and allocate one aggregate per monitored CPU.
    pub fn new(settings: Settings, mut backend: B) -> Result<Self> {
        backend
            .init()
            .with_context(|| format!("Failed to initialize {} backend", backend.name()))?;

        let cpus = settings
            .cpu_list()?
            .into_iter()
            .map(CpuAggregate::new)
            .collect::<Vec<_>>();
        info!("Monitoring {} CPUs via {}", cpus.len(), backend.name());

        let threshold = settings.starving_threshold();
        Ok(Self {
            settings,
            backend,
            cpus,
            buffer: RawBuffer::default(),
            threshold,
        })
    }

    pub fn cpus(&self) -> &[CpuAggregate] {
        &self.cpus
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take one sample and refresh every monitored CPU.
    pub fn run_cycle(&mut self) -> CycleReport {
        let bytes = self.backend.get(&mut self.buffer);
        if bytes == 0 {
            warn!("No data read from {} this cycle", self.backend.name());
            telemetry::record_sample_failure("read");
            return CycleReport::default();
        }

        let text = self.buffer.text();
        let mut starving = Vec::new();

        for cpu in self.cpus.iter_mut() {
            if let Err(e) = self.backend.parse(cpu, &text) {
                warn!("{}", e);
                telemetry::record_sample_failure("parse");
                continue;
            }
            telemetry::record_waiting_tasks(cpu.id, cpu.nr_waiting());

            if !self.backend.has_starving_task(cpu) {
                continue;
            }

            let now = Utc::now();
            for task in cpu.starving_tasks(now, self.threshold) {
                let waited = task.waiting_for(now);
                warn!(
                    "{}-{} starved on CPU {} for {} seconds",
                    task.comm,
                    task.pid,
                    cpu.id,
                    waited.num_seconds()
                );
                telemetry::record_starving_task(
                    cpu.id,
                    &task.comm,
                    task.pid,
                    waited.num_seconds().max(0) as u64,
                );
                starving.push(StarvingTask {
                    cpu: cpu.id,
                    pid: task.pid,
                    tgid: task.tgid,
                    comm: task.comm.clone(),
                    waited,
                });
            }
        }

        CycleReport { bytes, starving }
    }

    pub async fn run(mut self) -> Result<()> {
        let shutdown = shutdown_flag();
        let mut ticker = tokio::time::interval(self.settings.granularity());
        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("Monitoring active. Press Ctrl-C to exit.");
        loop {
            tokio::select! {
                res = &mut ctrl_c => {
                    res.context("Failed to listen for Ctrl-C")?;
                    request_shutdown();
                    break;
                }
                _ = ticker.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    self.run_cycle();
                }
            }
        }

        info!("Exiting...");
        self.backend.destroy();
        telemetry::shutdown_metrics();
        Ok(())
    }
}
