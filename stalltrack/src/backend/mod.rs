use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use stalltrack_common::CpuAggregate;
use thiserror::Error;

pub mod buffer;
pub mod sched_debug;

pub use buffer::RawBuffer;
pub use sched_debug::SchedDebugBackend;

static SHUTDOWN: once_cell::sync::Lazy<Arc<AtomicBool>> =
    once_cell::sync::Lazy::new(|| Arc::new(AtomicBool::new(false)));

pub fn shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN.clone()
}

pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Soft, per-cycle failures. The affected CPU keeps its previous state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("cpu {cpu}: counter `{counter}` not found in its sched_debug block")]
    MissingCounter { cpu: usize, counter: &'static str },
    #[error("backend used before init")]
    NotInitialized,
}

/// A source of run-queue samples.
///
/// The polling loop only talks to this trait, so a text backend and any
/// alternate source are interchangeable.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// One-time setup. An error here is terminal for the process.
    fn init(&mut self) -> Result<()>;

    /// Capture one sample into `buffer`. Returns the number of bytes read;
    /// 0 means "no data this cycle".
    fn get(&mut self, buffer: &mut RawBuffer) -> usize;

    /// Refresh `cpu` from the captured sample.
    fn parse(&self, cpu: &mut CpuAggregate, buffer: &str) -> Result<(), BackendError>;

    fn has_starving_task(&self, cpu: &CpuAggregate) -> bool;

    fn destroy(&mut self) {}
}
