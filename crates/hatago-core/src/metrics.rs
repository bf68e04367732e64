//! Metrics sink: the core emits counters/histograms through a sink
//! interface, and the Prometheus wire format is just one renderer.
//!
//! `hatago-proxy` and `hatago-server` emit through [`MetricsSink`] only;
//! this module's [`PrometheusSink`] is the default renderer, built on the
//! `metrics` facade + `metrics-exporter-prometheus`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// A label is a flat list of `(key, value)` pairs; kept as `&'static str`
/// keys since label names are fixed at call sites, never user input.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Cross-cutting emission point for counters and histograms. The proxy's
/// circuit breaker and the limiter's admission counters both emit through
/// this trait rather than calling the `metrics` facade directly, so tests
/// can substitute a recording sink.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &'static str, value: u64, labels: Labels<'_>);
    fn histogram(&self, name: &'static str, value: f64, labels: Labels<'_>);
}

/// Renders metrics in Prometheus text exposition format via the global
/// `metrics` recorder.
pub struct PrometheusSink {
    handle: PrometheusHandle,
}

impl PrometheusSink {
    pub fn install() -> Result<Self, metrics_exporter_prometheus::BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }

    /// `GET /metrics` body.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl MetricsSink for PrometheusSink {
    fn counter(&self, name: &'static str, value: u64, labels: Labels<'_>) {
        let owned: Vec<(&'static str, String)> = labels.to_vec();
        metrics::counter!(name, &owned).increment(value);
    }

    fn histogram(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        let owned: Vec<(&'static str, String)> = labels.to_vec();
        metrics::histogram!(name, &owned).record(value);
    }
}

/// A no-op sink for tests and for binaries that don't want a Prometheus
/// endpoint.
#[derive(Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn counter(&self, _name: &'static str, _value: u64, _labels: Labels<'_>) {}
    fn histogram(&self, _name: &'static str, _value: f64, _labels: Labels<'_>) {}
}
