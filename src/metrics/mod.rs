//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, Counter, CounterVec, HistogramVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Model calls
    pub model_calls: CounterVec,
    pub model_call_duration: HistogramVec,
    pub truncations: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,

    // Scheduler
    pub requeues: Counter,
    pub permanent_failures: Counter,
    pub classifications: CounterVec,
    pub unparsable_responses: Counter,

    // Profile generation
    pub generation_attempts: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let model_calls = register_counter_vec_with_registry!(
            Opts::new("sentinel_model_calls_total", "Total model calls by outcome"),
            &["outcome"],
            registry
        )?;

        let model_call_duration = register_histogram_vec_with_registry!(
            "sentinel_model_call_duration_seconds",
            "Model call duration in seconds",
            &["outcome"],
            registry
        )?;

        let truncations = register_counter_with_registry!(
            Opts::new("sentinel_truncations_total", "Prompts truncated to fit the token budget"),
            registry
        )?;

        let cache_hits = register_counter_with_registry!(
            Opts::new("sentinel_cache_hits_total", "Verdict cache hits"),
            registry
        )?;

        let cache_misses = register_counter_with_registry!(
            Opts::new("sentinel_cache_misses_total", "Verdict cache misses"),
            registry
        )?;

        let requeues = register_counter_with_registry!(
            Opts::new("sentinel_requeues_total", "Segments pushed back after a failed analysis"),
            registry
        )?;

        let permanent_failures = register_counter_with_registry!(
            Opts::new("sentinel_permanent_failures_total", "Segments that ran out of attempts"),
            registry
        )?;

        let classifications = register_counter_vec_with_registry!(
            Opts::new("sentinel_classifications_total", "Classified segments by level"),
            &["level"],
            registry
        )?;

        let unparsable_responses = register_counter_with_registry!(
            Opts::new("sentinel_unparsable_responses_total", "Model replies without a score"),
            registry
        )?;

        let generation_attempts = register_counter_vec_with_registry!(
            Opts::new("sentinel_generation_attempts_total", "Profile generation attempts"),
            &["stage", "outcome"],
            registry
        )?;

        Ok(Self {
            registry,
            model_calls,
            model_call_duration,
            truncations,
            cache_hits,
            cache_misses,
            requeues,
            permanent_failures,
            classifications,
            unparsable_responses,
            generation_attempts,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_model_call(&self, outcome: &str, elapsed: Duration) {
        self.model_calls.with_label_values(&[outcome]).inc();
        self.model_call_duration
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_truncation(&self) {
        self.truncations.inc();
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    pub fn record_requeue(&self) {
        self.requeues.inc();
    }

    pub fn record_permanent_failure(&self) {
        self.permanent_failures.inc();
    }

    pub fn record_classification(&self, level: &str, parsed: bool) {
        self.classifications.with_label_values(&[level]).inc();
        if !parsed {
            self.unparsable_responses.inc();
        }
    }

    pub fn record_generation_attempt(&self, stage: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.generation_attempts
            .with_label_values(&[stage, outcome])
            .inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_model_call("success", Duration::from_millis(20));
        metrics.record_classification("safe", false);
        metrics.record_generation_attempt("rubric", false);

        let text = metrics.export_prometheus();
        assert!(text.contains("sentinel_model_calls_total"));
        assert!(text.contains("sentinel_unparsable_responses_total 1"));
        assert!(text.contains("stage=\"rubric\""));
    }
}
