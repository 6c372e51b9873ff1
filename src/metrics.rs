use prometheus::{
    CounterVec, Histogram, HistogramOpts, HistogramTimer, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for admissions and store traffic
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    admitted: CounterVec,
    denied: CounterVec,
    wait_duration: Histogram,
    store_operation_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let admitted = CounterVec::new(
            Opts::new(
                "respectful_admitted_total",
                "Number of admission attempts that were allowed",
            ),
            &["realm"],
        )?;

        let denied = CounterVec::new(
            Opts::new(
                "respectful_denied_total",
                "Number of admission attempts that were over the realm threshold",
            ),
            &["realm"],
        )?;

        let wait_duration = Histogram::with_opts(HistogramOpts::new(
            "respectful_wait_duration_seconds",
            "Time spent sleeping in waiting mode before a realm admitted",
        ))?;

        let store_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "respectful_store_operation_duration_seconds",
                "Duration of store operations in seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(admitted.clone()))?;
        registry.register(Box::new(denied.clone()))?;
        registry.register(Box::new(wait_duration.clone()))?;
        registry.register(Box::new(store_operation_duration.clone()))?;

        Ok(Self {
            registry,
            admitted,
            denied,
            wait_duration,
            store_operation_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_admitted(&self, realm: &str) {
        self.admitted.with_label_values(&[realm]).inc();
    }

    pub fn record_denied(&self, realm: &str) {
        self.denied.with_label_values(&[realm]).inc();
    }

    pub fn record_wait(&self, seconds: f64) {
        self.wait_duration.observe(seconds);
    }

    /// Timer that records a store operation's duration when dropped
    pub fn start_store_timer(&self, operation: &str) -> HistogramTimer {
        self.store_operation_duration
            .with_label_values(&[operation])
            .start_timer()
    }

    /// Render every metric in the Prometheus text format
    pub fn encode_text(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_gathering() {
        let metrics = Metrics::new().unwrap();

        metrics.record_admitted("A");
        metrics.record_admitted("A");
        metrics.record_denied("B");
        metrics.record_wait(0.25);
        drop(metrics.start_store_timer("increment_usage"));

        let admitted = metrics
            .admitted
            .with_label_values(&["A"])
            .get();
        assert_eq!(admitted, 2.0);

        let families = metrics.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "respectful_denied_total"));

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("respectful_admitted_total{realm=\"A\"} 2"));
        assert!(text.contains("respectful_store_operation_duration_seconds"));
    }
}
