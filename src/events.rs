//! Playout event bus.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring buffer of recent events so observers that attach late (or tests that
//! never subscribe) can still inspect what happened.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::handoff::HandoffSlot;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 256;

/// Why the relay stopped draining a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainEnd {
    /// Data stopped arriving for the idle timeout.
    Idle,
    /// No byte ever arrived: the producer exited first or never attached.
    NoData,
    /// The slot could not be opened or read.
    ReadError,
    /// The hard stop signal was raised mid-drain.
    Stopped,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayoutEvent {
    /// A producer was started and its slot queued for relay.
    ItemLaunched {
        media: String,
        slot: HandoffSlot,
        seek: Option<String>,
    },
    /// The item's window had already passed.
    ItemSkipped {
        media: String,
        lateness_secs: f64,
        duration_secs: f64,
    },
    /// A producer process ended.
    ProducerExited {
        media: String,
        slot: HandoffSlot,
        success: bool,
        code: Option<i32>,
    },
    /// The relay finished with a slot.
    SlotDrained {
        media: String,
        slot: HandoffSlot,
        bytes: u64,
        packets: u64,
        end: DrainEnd,
    },
    /// The relay worker exited.
    RelayStopped { packets: u64, bytes: u64 },
}

/// A timestamped event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub payload: PlayoutEvent,
}

/// Broadcast channel with a bounded ring buffer of recent events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus with the given broadcast buffer size.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Record and broadcast an event.
    pub fn emit(&self, payload: PlayoutEvent) {
        let event = Event {
            timestamp: Utc::now(),
            payload,
        };

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for playout event");
        }
    }

    /// All retained events, oldest first.
    pub fn history(&self) -> Vec<PlayoutEvent> {
        self.recent.read().iter().map(|e| e.payload.clone()).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
