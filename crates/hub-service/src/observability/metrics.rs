//! Metrics definitions for the hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hub_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (controller, room, connection)
//! - `outcome`: bounded by join outcomes and write outcomes
//! - `kind`: 5 values (offer, answer, iceCandidate, retryRequest,
//!   renegotiateRequest)
//! - `operation`: 5 values, one per store call

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("hub_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Set the number of open WebSocket connections.
///
/// Metric: `hub_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_connections_active").set(count as f64);
}

/// Set the number of live room actors.
///
/// Metric: `hub_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `hub_actor_mailbox_depth`
/// Labels: `actor_type` (controller, room, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Join / Relay / Chat (Counters)
// ============================================================================

/// Record the outcome of a `joinRoom`.
///
/// Metric: `hub_joins_total`
/// Labels: `outcome` (`granted` or a lower-cased error code)
pub fn record_join(outcome: &str) {
    counter!("hub_joins_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a signaling message delivered to its target.
///
/// Metric: `hub_signals_relayed_total`
/// Labels: `kind`
pub fn record_signal_relayed(kind: &str) {
    counter!("hub_signals_relayed_total", "kind" => kind.to_string()).increment(1);
}

/// Record a signaling message that could not be delivered.
///
/// Metric: `hub_relay_failures_total`
/// Labels: `kind`
///
/// Never surfaced to the sender; the target usually just left.
pub fn record_relay_failure(kind: &str) {
    counter!("hub_relay_failures_total", "kind" => kind.to_string()).increment(1);
}

/// Record a chat message accepted and broadcast.
///
/// Metric: `hub_messages_total`
pub fn record_message() {
    counter!("hub_messages_total").increment(1);
}

/// Record a debounced document write.
///
/// Metric: `hub_document_writes_total`
/// Labels: `outcome` (success, error, timeout)
pub fn record_document_write(outcome: &str) {
    counter!("hub_document_writes_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Latency (Histograms)
// ============================================================================

/// Record latency of a store call.
///
/// Metric: `hub_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("hub_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record an actor panic event.
///
/// Metric: `hub_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("hub_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these calls hit the no-op recorder; they
    // still exercise the label construction.
    #[test]
    fn test_gauges_without_recorder() {
        set_connections_active(0);
        set_connections_active(12);
        set_rooms_active(3);
        set_actor_mailbox_depth("room", 40);
    }

    #[test]
    fn test_counters_without_recorder() {
        record_join("granted");
        record_join("password_required");
        record_signal_relayed("offer");
        record_relay_failure("iceCandidate");
        record_message();
        record_document_write("success");
        record_store_latency("fetch_auth_snapshot", Duration::from_millis(3));
        record_actor_panic("room");
    }

    #[test]
    fn test_relay_failure_is_counted_per_kind() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_relay_failure("offer");
            record_relay_failure("offer");
            record_relay_failure("answer");
        });

        let counts: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => {
                    let kind = key
                        .key()
                        .labels()
                        .find(|l| l.key() == "kind")
                        .map(|l| l.value().to_string())?;
                    Some((kind, n))
                }
                _ => None,
            })
            .collect();

        assert!(counts.contains(&("offer".to_string(), 2)));
        assert!(counts.contains(&("answer".to_string(), 1)));
    }
}
