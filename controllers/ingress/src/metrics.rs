//! Controller metrics
//!
//! One registry per process, initialized once in `main`. Recording helpers
//! are no-ops until then so library code and tests never depend on it.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;
use std::time::Duration;

/// Metrics exported on `/metrics`.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub reloads: IntCounter,
    pub restarts: IntCounter,
    pub runtime_failures: IntCounter,
    pub sync_errors: IntCounter,
    pub sync_duration: Histogram,
    pub events_pending: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reloads = IntCounter::new("haproxy_ingress_reloads_total", "Total number of HAProxy reloads")?;
        registry.register(Box::new(reloads.clone()))?;

        let restarts = IntCounter::new("haproxy_ingress_restarts_total", "Total number of HAProxy restarts")?;
        registry.register(Box::new(restarts.clone()))?;

        let runtime_failures = IntCounter::new(
            "haproxy_ingress_runtime_failures_total",
            "Runtime API operations that failed and fell back to a reload",
        )?;
        registry.register(Box::new(runtime_failures.clone()))?;

        let sync_errors = IntCounter::new("haproxy_ingress_sync_errors_total", "Syncs that ended with errors")?;
        registry.register(Box::new(sync_errors.clone()))?;

        let sync_duration = Histogram::with_opts(HistogramOpts::new(
            "haproxy_ingress_sync_duration_seconds",
            "Duration of one configuration sync in seconds",
        ))?;
        registry.register(Box::new(sync_duration.clone()))?;

        let events_pending = IntGauge::new(
            "haproxy_ingress_events_pending",
            "Events waiting in the channel at the start of the last sync",
        )?;
        registry.register(Box::new(events_pending.clone()))?;

        Ok(Self {
            registry,
            reloads,
            restarts,
            runtime_failures,
            sync_errors,
            sync_duration,
            events_pending,
        })
    }
}

/// Registers the metrics. Later calls return the existing instance.
pub fn init() -> Result<&'static Metrics, prometheus::Error> {
    if let Some(metrics) = METRICS.get() {
        return Ok(metrics);
    }
    let metrics = Metrics::new()?;
    Ok(METRICS.get_or_init(|| metrics))
}

/// Registered metrics, `None` until [`init`] ran.
pub fn get() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Counts a successful reload.
pub fn record_reload() {
    if let Some(m) = get() {
        m.reloads.inc();
    }
}

/// Counts a restart that replaced a failed reload.
pub fn record_restart() {
    if let Some(m) = get() {
        m.restarts.inc();
    }
}

/// Counts a runtime socket command that failed and fell back to a reload.
pub fn record_runtime_failure() {
    if let Some(m) = get() {
        m.runtime_failures.inc();
    }
}

pub fn record_sync_error() {
    if let Some(m) = get() {
        m.sync_errors.inc();
    }
}

/// Records how long one sync took.
pub fn observe_sync(duration: Duration) {
    if let Some(m) = get() {
        m.sync_duration.observe(duration.as_secs_f64());
    }
}

/// Events waiting in the reconciler channel.
pub fn set_events_pending(count: usize) {
    if let Some(m) = get() {
        m.events_pending.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// Text exposition of every registered metric.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let Some(m) = get() else {
        return Ok(String::new());
    };
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&m.registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
