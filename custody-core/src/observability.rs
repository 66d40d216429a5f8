/*!
Observability infrastructure for Custody.

This module provides:
- Structured logging setup (text or JSON) driven by `RUST_LOG`
- Prometheus metrics for snapshots and component discovery (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{CustodyError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<CustodyMetrics> = OnceLock::new();

/// Metrics collection for Custody operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct CustodyMetrics {
    // Composite and leaf snapshot metrics
    pub snapshots_total: Counter,
    pub snapshot_failures_total: Counter,
    pub snapshot_latency_seconds: Histogram,
    pub snapshot_size_bytes: Histogram,

    // Component graph metrics
    pub component_snapshots_total: Counter,
    pub components_discovered_total: Counter,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| CustodyError::storage(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| CustodyError::storage(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| CustodyError::storage(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| CustodyError::storage(format!("Failed to register {name}: {e}")))?;
    Ok(histogram)
}

#[cfg(feature = "metrics")]
impl CustodyMetrics {
    /// Initialize new metrics instance
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let snapshots_total = counter(
            &registry,
            "custody_snapshots_total",
            "Total snapshots committed",
        )?;
        let snapshot_failures_total = counter(
            &registry,
            "custody_snapshot_failures_total",
            "Total snapshots that failed",
        )?;
        let snapshot_latency_seconds = histogram(
            &registry,
            HistogramOpts::new(
                "custody_snapshot_latency_seconds",
                "Duration of snapshot operations in seconds",
            ),
        )?;
        let snapshot_size_bytes = histogram(
            &registry,
            HistogramOpts::new("custody_snapshot_size_bytes", "Size of committed snapshots")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).map_err(|e| {
                    CustodyError::storage(format!("Failed to build size buckets: {e}"))
                })?),
        )?;
        let component_snapshots_total = counter(
            &registry,
            "custody_component_snapshots_total",
            "Total nested component snapshots taken by the annotator",
        )?;
        let components_discovered_total = counter(
            &registry,
            "custody_components_discovered_total",
            "Total component references recovered from snapshots",
        )?;

        Ok(Self {
            snapshots_total,
            snapshot_failures_total,
            snapshot_latency_seconds,
            snapshot_size_bytes,
            component_snapshots_total,
            components_discovered_total,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    ///
    /// Returns `None` only if the registry could not be built.
    pub fn global() -> Option<&'static CustodyMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Some(metrics);
        }
        match Self::new() {
            Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
            Err(e) => {
                tracing::warn!(error = %e, "metrics disabled");
                None
            }
        }
    }

    /// Record a nested component snapshot
    pub fn record_component_snapshot(&self) {
        self.component_snapshots_total.inc();
    }

    /// Record component references recovered by discovery
    pub fn record_components_discovered(&self, count: usize) {
        self.components_discovered_total.inc_by(count as f64);
    }

    /// Gather metrics in Prometheus format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| CustodyError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| CustodyError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Metrics timer helper for measuring snapshot durations
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    operation: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Start a new timer for the given operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Complete the timer, recording latency and the committed size
    pub fn finish(self, size_bytes: u64) {
        if let Some(metrics) = CustodyMetrics::global() {
            metrics.snapshots_total.inc();
            metrics
                .snapshot_latency_seconds
                .observe(self.start.elapsed().as_secs_f64());
            metrics.snapshot_size_bytes.observe(size_bytes as f64);
        }
        tracing::trace!(operation = self.operation, "timer finished");
    }

    /// Complete the timer with an error, recording both latency and failure
    pub fn finish_with_error(self) {
        if let Some(metrics) = CustodyMetrics::global() {
            metrics.snapshot_failures_total.inc();
            metrics
                .snapshot_latency_seconds
                .observe(self.start.elapsed().as_secs_f64());
        }
        tracing::trace!(operation = self.operation, "timer finished with error");
    }
}

/// Initialize the global observability system
///
/// Installs a tracing subscriber filtered by `RUST_LOG` (default
/// `custody=info`), writing JSON lines when `json` is set and human-readable
/// text otherwise.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with_filter(json, "custody=info")
}

/// Same as [`init_observability`] with a caller-chosen default filter
pub fn init_observability_with_filter(json: bool, default_filter: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _ = CustodyMetrics::global();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        CustodyError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Custody observability system initialized");
    Ok(())
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_timer() {
        let timer = MetricsTimer::start("snapshot");
        timer.finish(4096);

        let timer = MetricsTimer::start("snapshot");
        timer.finish_with_error();
    }

    #[test]
    fn test_metrics_gathering() {
        let metrics = CustodyMetrics::global().unwrap();
        metrics.record_component_snapshot();
        metrics.record_components_discovered(2);

        let metrics_text = metrics.gather_metrics().unwrap();
        assert!(metrics_text.contains("custody_component_snapshots_total"));
        assert!(metrics_text.contains("custody_components_discovered_total"));
    }
}
