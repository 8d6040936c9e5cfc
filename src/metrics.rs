//! Prometheus metrics for the insight pipeline.
//!
//! Each `InsightMetrics` owns its registry, so independently constructed
//! services (and tests) never collide on registration.

use std::time::Duration;

use prometheus::{
    histogram_opts, opts, CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, Registry,
    TextEncoder,
};

use crate::models::InsightSource;

pub struct InsightMetrics {
    registry: Registry,
    responses_total: CounterVec,
    upstream_calls_total: IntCounter,
    response_duration_seconds: HistogramVec,
    cache_entries: IntGauge,
}

impl InsightMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let responses_total = CounterVec::new(
            opts!("insights_responses_total", "Insight responses by source"),
            &["source"],
        )?;
        let upstream_calls_total = IntCounter::with_opts(opts!(
            "insights_upstream_calls_total",
            "Calls issued to the language model"
        ))?;
        let response_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "insights_response_duration_seconds",
                "End-to-end generate_insights latency",
                vec![0.005, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            ),
            &["source"],
        )?;
        let cache_entries = IntGauge::with_opts(opts!(
            "insights_cache_entries",
            "Entries physically held by the insight cache"
        ))?;

        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(upstream_calls_total.clone()))?;
        registry.register(Box::new(response_duration_seconds.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            registry,
            responses_total,
            upstream_calls_total,
            response_duration_seconds,
            cache_entries,
        })
    }

    pub fn record_response(&self, source: InsightSource, elapsed: Duration) {
        self.responses_total
            .with_label_values(&[source.as_str()])
            .inc();
        self.response_duration_seconds
            .with_label_values(&[source.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_upstream_call(&self) {
        self.upstream_calls_total.inc();
    }

    pub fn set_cache_entries(&self, n: usize) {
        self.cache_entries.set(n as i64);
    }

    pub fn upstream_calls(&self) -> u64 {
        self.upstream_calls_total.get()
    }

    /// Text exposition format for the `/metrics` endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
