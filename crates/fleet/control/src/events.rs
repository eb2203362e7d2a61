//! Event aggregation for the fleet
//!
//! Every subsystem publishes into one broadcast stream. The aggregator owns
//! the sender; the health monitor gets a clone of it.

use fleet_types::{EventSource, FleetEvent, FleetEventEnvelope};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for the unified event stream
const EVENT_CHANNEL_CAPACITY: usize = 16384;

/// Unified fleet event stream
#[derive(Clone)]
pub struct EventAggregator {
    unified_tx: broadcast::Sender<FleetEventEnvelope>,
}

impl EventAggregator {
    pub fn new() -> Self {
        let (unified_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { unified_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEventEnvelope> {
        self.unified_tx.subscribe()
    }

    /// Sender handle for subsystems that publish directly
    pub fn sender(&self) -> broadcast::Sender<FleetEventEnvelope> {
        self.unified_tx.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.unified_tx.receiver_count()
    }

    /// Emit an event; severity is inferred from its kind
    pub fn emit(&self, event: FleetEvent, source: EventSource) {
        self.publish(FleetEventEnvelope::new(event, source));
    }

    /// Emit an event tied to an operation
    pub fn emit_correlated(&self, event: FleetEvent, source: EventSource, correlation_id: &str) {
        self.publish(FleetEventEnvelope::new(event, source).with_correlation(correlation_id));
    }

    fn publish(&self, envelope: FleetEventEnvelope) {
        debug!(
            event_id = %envelope.id,
            source = ?envelope.source,
            severity = ?envelope.severity,
            "Fleet event"
        );
        // No subscribers is fine
        let _ = self.unified_tx.send(envelope);
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}
