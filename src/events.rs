//! High personal risk notifications.
//!
//! The pipeline publishes; whoever renders or delivers notifications
//! subscribes. Publishing never blocks and never fails the pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::hexgrid::CellId;

/// Buffered events per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 64;

// ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighRiskEvent {
    pub id: Uuid,
    pub cell_id: CellId,
    /// Personal risk, 0–100.
    pub percent: f64,
    pub risk_level: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<HighRiskEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HighRiskEvent> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: HighRiskEvent) -> usize {
        // ---
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(
                    "High risk event for {} dropped, no subscribers",
                    event.cell_id
                );
                0
            }
        }
    }
}
