use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref BACKEND_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("amfork_backend_calls_total", "Calls issued to a backend by the router"),
        &["backend", "operation", "outcome"]
    ).unwrap();

    pub static ref BACKEND_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("amfork_backend_call_duration_seconds", "Backend call latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["backend", "operation"]
    ).unwrap();

    pub static ref REMOTE_CONFIG_SEED_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new(
            "amfork_remote_config_seed_failures_total",
            "Failed one-shot configuration pushes to the remote Alertmanager"
        )
    ).unwrap();

    pub static ref DIVERGENCES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "amfork_divergences_total",
            "Operations that succeeded on one backend and failed on the other"
        ),
        &["operation"]
    ).unwrap();

    pub static ref CONFIG_SYNCS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("amfork_config_syncs_total", "Periodic configuration syncs"),
        &["outcome"]
    ).unwrap();
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(BACKEND_CALLS_TOTAL.clone()),
            Box::new(BACKEND_CALL_DURATION_SECONDS.clone()),
            Box::new(REMOTE_CONFIG_SEED_FAILURES_TOTAL.clone()),
            Box::new(DIVERGENCES_TOTAL.clone()),
            Box::new(CONFIG_SYNCS_TOTAL.clone()),
        ];
        for collector in collectors {
            // a collector can only be rejected if it is already registered
            let _ = REGISTRY.register(collector);
        }
    });
}

pub fn observe_backend_call(backend: &str, operation: &str, success: bool, seconds: f64) {
    let outcome = if success { "success" } else { "error" };
    BACKEND_CALLS_TOTAL
        .with_label_values(&[backend, operation, outcome])
        .inc();
    BACKEND_CALL_DURATION_SECONDS
        .with_label_values(&[backend, operation])
        .observe(seconds);
}

pub fn record_divergence(operation: &str) {
    DIVERGENCES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_seed_failure() {
    REMOTE_CONFIG_SEED_FAILURES_TOTAL.inc();
}

pub fn record_config_sync(success: bool) {
    let outcome = if success { "success" } else { "error" };
    CONFIG_SYNCS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();

        observe_backend_call("local", "apply_config", true, 0.01);
        observe_backend_call("remote", "apply_config", false, 0.5);
        record_divergence("create_silence");
        record_seed_failure();
        record_config_sync(true);

        let metrics = gather_metrics();
        assert!(metrics.contains("amfork_backend_calls_total"));
        assert!(metrics.contains("amfork_backend_call_duration_seconds"));
        assert!(metrics.contains("amfork_divergences_total{operation=\"create_silence\"}"));
        assert!(metrics.contains("amfork_remote_config_seed_failures_total"));
    }

    #[test]
    fn test_outcome_labels() {
        observe_backend_call("local", "get_status", false, 0.0);
        let errors = BACKEND_CALLS_TOTAL
            .with_label_values(&["local", "get_status", "error"])
            .get();
        assert!(errors >= 1);
    }
}
