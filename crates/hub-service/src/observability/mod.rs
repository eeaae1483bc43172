//! Observability for the hub: health probes and Prometheus metrics.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_connections_active` | Gauge | none | Open WebSocket connections |
//! | `hub_rooms_active` | Gauge | none | Live room actors |
//! | `hub_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor type |
//! | `hub_joins_total` | Counter | `outcome` | Join results by outcome |
//! | `hub_signals_relayed_total` | Counter | `kind` | Delivered negotiation messages |
//! | `hub_relay_failures_total` | Counter | `kind` | Undeliverable negotiation messages |
//! | `hub_document_writes_total` | Counter | `outcome` | Debounced document writes |
//! | `hub_messages_total` | Counter | none | Chat messages broadcast |
//! | `hub_store_latency_seconds` | Histogram | `operation` | Store call latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
