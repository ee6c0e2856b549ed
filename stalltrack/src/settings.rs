use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_GRANULARITY_SECONDS: u64 = 5;
const DEFAULT_STARVING_THRESHOLD_SECONDS: i64 = 30;
const DEFAULT_PROC_ROOT: &str = "/proc";

/// Sampling loop configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct MonitorSettings {
    /// Seconds between sampling cycles
    pub granularity: Option<u64>,
    /// Seconds a task must wait before it counts as starving
    pub starving_threshold: Option<i64>,
    /// CPU list such as "0-3,8"; all CPUs when unset
    pub cpus: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[allow(unused)]
pub struct Settings {
    pub sched_debug_path: Option<String>,
    pub proc_root: Option<String>,
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load settings from an optional config file, overridden by the
    /// environment (`MONITOR__GRANULARITY=2`, `SCHED_DEBUG_PATH=...`).
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn sched_debug_path(&self) -> Option<PathBuf> {
        self.sched_debug_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn proc_root(&self) -> PathBuf {
        PathBuf::from(self.proc_root.as_deref().unwrap_or(DEFAULT_PROC_ROOT))
    }

    pub fn granularity(&self) -> Duration {
        Duration::from_secs(
            self.monitor
                .granularity
                .unwrap_or(DEFAULT_GRANULARITY_SECONDS)
                .max(1),
        )
    }

    pub fn starving_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.monitor
                .starving_threshold
                .unwrap_or(DEFAULT_STARVING_THRESHOLD_SECONDS),
        )
    }

    /// CPUs to monitor: the configured list, or every configured CPU.
    pub fn cpu_list(&self) -> Result<Vec<usize>> {
        match self.monitor.cpus.as_deref() {
            Some(list) if !list.trim().is_empty() => parse_cpu_list(list),
            _ => Ok((0..nr_cpus_configured()).collect()),
        }
    }
}

fn nr_cpus_configured() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n > 0 { n as usize } else { 1 }
}

/// Parse a CPU list such as `0,2-4`.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid cpu range '{}'", part))?;
                let end: usize = end
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid cpu range '{}'", part))?;
                if start > end {
                    bail!("invalid cpu range '{}'", part);
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(
                part.parse()
                    .with_context(|| format!("invalid cpu '{}'", part))?,
            ),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}
