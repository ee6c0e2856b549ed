//! Starvation metrics over OTLP.
//!
//! Nothing is exported unless a collector endpoint is configured; the
//! `record_*` calls are no-ops until then.

use anyhow::{Context, Result};
use log::{info, warn};
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

const EXPORT_INTERVAL: Duration = Duration::from_secs(30);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

static METRICS: OnceLock<StallTrackMetrics> = OnceLock::new();

static PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Last waiting-task count per CPU, sampled by the `waiting_tasks` gauge.
static WAITING_TASKS: OnceLock<RwLock<HashMap<usize, u64>>> = OnceLock::new();

fn waiting_tasks_map() -> &'static RwLock<HashMap<usize, u64>> {
    WAITING_TASKS.get_or_init(|| RwLock::new(HashMap::new()))
}

// Counter names carry no `_total`; the Prometheus side appends it.
pub struct StallTrackMetrics {
    pub starving_task_events: Counter<u64>,
    pub task_wait_seconds: Histogram<u64>,
    pub sample_failures: Counter<u64>,
}

impl StallTrackMetrics {
    fn register(meter: &Meter) -> Self {
        let starving_task_events = meter
            .u64_counter("starving_task_events")
            .with_description("Tasks seen waiting past the starving threshold")
            .with_unit("events")
            .build();
        let task_wait_seconds = meter
            .u64_histogram("task_wait_seconds")
            .with_description("Time a starving task has spent runnable but not running")
            .with_unit("s")
            .build();
        let sample_failures = meter
            .u64_counter("sample_failures")
            .with_description("Sampling cycles that produced no data or failed to parse")
            .with_unit("events")
            .build();

        Self {
            starving_task_events,
            task_wait_seconds,
            sample_failures,
        }
    }
}

/// Collector URL from `configured`, else OTEL_EXPORTER_OTLP_ENDPOINT.
/// A bare `host:port` gets an `http://` scheme.
fn collector_endpoint(configured: Option<&str>) -> Option<String> {
    let raw = match configured {
        Some(value) => value.to_string(),
        None => std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?,
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.contains("://") {
        Some(raw.to_string())
    } else {
        Some(format!("http://{}", raw))
    }
}

fn build_provider(endpoint: &str) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .with_context(|| format!("Failed to build OTLP exporter for {}", endpoint))?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::TokioCurrentThread)
        .with_interval(EXPORT_INTERVAL)
        .build();

    let resource = Resource::default().merge(&Resource::new([
        KeyValue::new("service.name", "stalltrack"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]));

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

/// Start exporting to `endpoint` (or the environment's collector).
pub fn init_metrics(endpoint: Option<&str>) -> Result<()> {
    let Some(endpoint) = collector_endpoint(endpoint) else {
        info!("No OTLP collector configured, metrics stay local");
        return Ok(());
    };

    info!("Exporting metrics to {}", endpoint);
    let provider = build_provider(&endpoint)?;
    global::set_meter_provider(provider.clone());
    let _ = PROVIDER.set(provider);

    let meter = global::meter("stalltrack");
    let _waiting_tasks = meter
        .u64_observable_gauge("waiting_tasks")
        .with_description("Tasks waiting on each CPU's run queue")
        .with_unit("tasks")
        .with_callback(|observer| {
            let Ok(cpus) = waiting_tasks_map().read() else {
                return;
            };
            for (cpu, count) in cpus.iter() {
                observer.observe(*count, &[KeyValue::new("cpu", *cpu as i64)]);
            }
        })
        .build();

    let _ = METRICS.set(StallTrackMetrics::register(&meter));
    Ok(())
}

pub fn metrics() -> Option<&'static StallTrackMetrics> {
    METRICS.get()
}

pub fn record_waiting_tasks(cpu: usize, count: usize) {
    if let Ok(mut cpus) = waiting_tasks_map().write() {
        cpus.insert(cpu, count as u64);
    }
}

pub fn record_starving_task(cpu: usize, comm: &str, pid: i32, waited_secs: u64) {
    let Some(m) = metrics() else {
        return;
    };
    let labels = [
        KeyValue::new("cpu", cpu as i64),
        KeyValue::new("comm", comm.to_string()),
        KeyValue::new("pid", pid as i64),
    ];
    m.starving_task_events.add(1, &labels);
    m.task_wait_seconds.record(waited_secs, &labels);
}

pub fn record_sample_failure(reason: &str) {
    if let Some(m) = metrics() {
        m.sample_failures
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}

/// Push whatever is buffered and stop the exporter.
pub fn shutdown_metrics() {
    let Some(provider) = PROVIDER.get() else {
        return;
    };
    match provider.shutdown() {
        Ok(()) => info!("Metrics exporter stopped"),
        Err(e) => warn!("Metrics exporter did not stop cleanly: {}", e),
    }
}
