//! Event types for the radiohue pipeline
//!
//! Provides PipelineEvent and the EventBus that carries it. Observers (tests,
//! diagnostics) subscribe; the pipeline never depends on anyone listening.

use crate::config::JobKind;
use crate::station::StationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline event types
///
/// Events are broadcast via EventBus and are serializable for external sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Scheduler started a job for a slot occurrence
    SlotFired {
        /// Seconds after UTC midnight
        offset_secs: u32,
        job: JobKind,
        timestamp: DateTime<Utc>,
    },

    /// Capture job finished its window
    CaptureCompleted {
        captured: Vec<StationId>,
        failed: Vec<StationId>,
        timestamp: DateTime<Utc>,
    },

    /// A station was dropped from the current pass
    StationSkipped {
        station: StationId,
        /// Error taxonomy name, e.g. `NetworkError`
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Color result pushed to the downstream consumer
    ColorDispatched {
        station: StationId,
        rgb: [u8; 3],
        timestamp: DateTime<Utc>,
    },

    /// Retention sweep finished
    SweepCompleted {
        deleted: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use radiohue_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
