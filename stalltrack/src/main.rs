use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stalltrack::{StallTrackEngine, settings::Settings, telemetry};

#[derive(Debug, Parser)]
#[command(name = "stalltrack", about = "Detect tasks starving on CPU run queues")]
struct Opt {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// YAML/TOML/JSON config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// sched_debug file to read instead of discovering it
    #[arg(long)]
    sched_debug: Option<PathBuf>,

    /// Seconds between samples
    #[arg(short, long)]
    granularity: Option<u64>,

    /// Seconds a task must wait before it is reported as starving
    #[arg(short = 't', long)]
    threshold: Option<i64>,

    /// CPUs to monitor, e.g. "0-3,8"
    #[arg(long)]
    cpus: Option<String>,
}

impl Opt {
    fn apply(self, settings: &mut Settings) {
        if let Some(path) = self.sched_debug {
            settings.sched_debug_path = Some(path.to_string_lossy().into_owned());
        }
        if self.granularity.is_some() {
            settings.monitor.granularity = self.granularity;
        }
        if self.threshold.is_some() {
            settings.monitor.starving_threshold = self.threshold;
        }
        if self.cpus.is_some() {
            settings.monitor.cpus = self.cpus;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if opt.verbose { "info" } else { "warn" },
    ))
    .init();

    let mut settings =
        Settings::load(opt.config.as_deref()).context("Failed to load settings")?;
    opt.apply(&mut settings);

    telemetry::init_metrics(settings.otel_exporter_otlp_endpoint.as_deref())?;

    let engine = StallTrackEngine::from_settings(settings)?;
    engine.run().await
}
