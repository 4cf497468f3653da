//! # Prometheus Metrics
//!
//! Counters for bridge traffic across every ledger actor in the process,
//! scraped at `/metrics`. Metrics live in a dedicated
//! [`prometheus::Registry`] under the `omniwrap` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use omniwrap_contracts::BridgeEvent;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Messages accepted by the relay from any ledger.
    pub messages_dispatched_total: IntCounter,
    /// Inbound messages admitted by a destination ledger.
    pub messages_delivered_total: IntCounter,
    /// Inbound messages refused at admission or failed after it.
    pub messages_rejected_total: IntCounter,
    /// Wrapped units minted by `wrap` on the origin ledger.
    pub wrapped_volume_total: IntCounter,
    /// Underlying paid out to the operator by fee harvests.
    pub fees_harvested_total: IntCounter,
    /// Packets sitting in the relay queue.
    pub pending_packets: IntGauge,
    /// Refused packets the relay keeps for redelivery.
    pub stored_packets: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("omniwrap".into()), None)?;

        let messages_dispatched_total = IntCounter::new(
            "messages_dispatched_total",
            "Total bridge messages accepted by the relay",
        )?;
        registry.register(Box::new(messages_dispatched_total.clone()))?;

        let messages_delivered_total = IntCounter::new(
            "messages_delivered_total",
            "Total inbound bridge messages admitted by a ledger",
        )?;
        registry.register(Box::new(messages_delivered_total.clone()))?;

        let messages_rejected_total = IntCounter::new(
            "messages_rejected_total",
            "Total inbound bridge messages rejected or failed",
        )?;
        registry.register(Box::new(messages_rejected_total.clone()))?;

        let wrapped_volume_total = IntCounter::new(
            "wrapped_volume_total",
            "Total wrapped units minted against locked underlying",
        )?;
        registry.register(Box::new(wrapped_volume_total.clone()))?;

        let fees_harvested_total = IntCounter::new(
            "fees_harvested_total",
            "Total underlying paid to the operator by fee harvests",
        )?;
        registry.register(Box::new(fees_harvested_total.clone()))?;

        let pending_packets =
            IntGauge::new("pending_packets", "Packets waiting in the relay queue")?;
        registry.register(Box::new(pending_packets.clone()))?;

        let stored_packets =
            IntGauge::new("stored_packets", "Refused packets stored by the relay for retry")?;
        registry.register(Box::new(stored_packets.clone()))?;

        Ok(Self {
            registry,
            messages_dispatched_total,
            messages_delivered_total,
            messages_rejected_total,
            wrapped_volume_total,
            fees_harvested_total,
            pending_packets,
            stored_packets,
        })
    }

    /// Folds one ledger event into the counters.
    pub fn observe(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::Wrapped { amount, .. } => self.wrapped_volume_total.inc_by(*amount),
            BridgeEvent::FeesHarvested { amount } => self.fees_harvested_total.inc_by(*amount),
            BridgeEvent::MessageSent { .. } => self.messages_dispatched_total.inc(),
            BridgeEvent::MessageReceived { .. } => self.messages_delivered_total.inc(),
            BridgeEvent::MessageFailed { .. } => self.messages_rejected_total.inc(),
            _ => {}
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
