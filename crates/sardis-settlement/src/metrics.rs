//! Prometheus metrics for the settlement core.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static SETTLE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "sardis_settlement_total",
        "Settlement dispatches by result",
        &["result"]
    )
    .unwrap()
});

pub static SETTLE_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "sardis_settlement_duration_seconds",
        "Settlement latency in seconds",
        &["result"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

pub static POLICY_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "sardis_policy_denials_total",
        "Policy denials by reason",
        &["reason"]
    )
    .unwrap()
});

pub static WEBHOOK_DELIVERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "sardis_webhook_deliveries_total",
        "Webhook delivery attempts by result",
        &["result"]
    )
    .unwrap()
});

/// Render all registered metrics in the Prometheus text format.
pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_render() {
        SETTLE_REQUESTS.with_label_values(&["settled"]).inc();
        POLICY_DENIALS.with_label_values(&["time_window_limit"]).inc();
        let output = metrics_output();
        assert!(output.contains("sardis_settlement_total"));
        assert!(output.contains("sardis_policy_denials_total"));
    }
}
