//! Event types for the Chorus event system
//!
//! Provides the shared event definitions and the in-process EventBus used
//! to push problem updates to SSE subscribers.
//!
//! Events carry aggregate data only (problem id, status, counts). They never
//! include contribution text or contributor identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Chorus event types
///
/// Broadcast via [`EventBus`] and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChorusEvent {
    /// Problem counters or status changed
    ///
    /// Emitted after a counted contribution and on every status transition
    /// (claim, completion, rollback).
    ProblemUpdated {
        problem_id: Uuid,
        /// Status after the change ("gathering", "synthesising", ...)
        status: String,
        contribution_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A synthesis row was stored and the problem is complete
    SynthesisCompleted {
        problem_id: Uuid,
        synthesis_id: Uuid,
        /// Number of non-flagged contributions that fed the synthesis
        contribution_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A synthesis attempt failed and the problem was returned to gathering
    SynthesisFailed {
        problem_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChorusEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ChorusEvent::ProblemUpdated { .. } => "ProblemUpdated",
            ChorusEvent::SynthesisCompleted { .. } => "SynthesisCompleted",
            ChorusEvent::SynthesisFailed { .. } => "SynthesisFailed",
        }
    }

    /// Problem this event is about
    pub fn problem_id(&self) -> Uuid {
        match self {
            ChorusEvent::ProblemUpdated { problem_id, .. }
            | ChorusEvent::SynthesisCompleted { problem_id, .. }
            | ChorusEvent::SynthesisFailed { problem_id, .. } => *problem_id,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChorusEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for slow receivers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChorusEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChorusEvent,
    ) -> Result<usize, broadcast::error::SendError<ChorusEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChorusEvent) {
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
