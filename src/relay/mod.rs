//! Relay of hand-off slots to the network.
//!
//! The scheduler appends slots to a [`RelayQueue`] as soon as their producer
//! is launched; a single [`RelayEngine`] worker pops them in FIFO order and
//! forwards each slot's bytes as UDP datagrams.

mod engine;
mod sink;

pub use engine::{RelayEngine, RelayHandle, RelayStats};
pub use sink::{DatagramSink, MulticastSender, NetworkTarget};

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::handoff::HandoffSlot;

/// Bytes per read and per datagram: 7 MPEG-TS packets of 188 bytes.
pub const PACKET_SIZE: usize = 1316;

/// Pause between empty reads while draining.
pub const IDLE_POLL: Duration = Duration::from_millis(10);

/// Consecutive empty polls that end an item once data has flowed.
pub const IDLE_RETRIES: u32 = 10;

/// Silence after the last successful read that ends an item.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(10 * IDLE_RETRIES as u64);

/// Upper bound on how long the worker sleeps on an empty queue before
/// re-checking its signals.
pub const QUEUE_POLL: Duration = Duration::from_millis(500);

/// How long a slot may stay silent before its first byte. ffmpeg has to
/// open and probe its input before writing anything.
pub const ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// A slot waiting to be drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedSlot {
    pub slot: HandoffSlot,
    /// Claim generation of the occupant, see [`crate::handoff::SlotState`].
    pub generation: u64,
    /// Media reference of the occupant, for logs and events.
    pub media: String,
    /// Expected play time of the occupant from its launch point.
    pub play_time: Duration,
}

/// Result of [`RelayQueue::pop_timeout`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Ready(QueuedSlot),
    /// Nothing arrived within the timeout.
    Empty,
    /// The queue was closed and everything in it has been handed out.
    Closed,
    /// The hard stop signal is raised.
    Stopped,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedSlot>,
    closed: bool,
    /// Play time of every slot pushed but not yet settled by the worker.
    outstanding: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<QueueState>,
    ready: Condvar,
    stop: AtomicBool,
}

/// FIFO work queue shared by the scheduler and the relay worker.
///
/// Also carries the two shutdown signals: `close` (exit once drained) and
/// `request_stop` (abandon everything, checked on every relay iteration).
#[derive(Debug, Clone, Default)]
pub struct RelayQueue {
    inner: Arc<Inner>,
}

impl RelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot. Order of pushes is the order of relay.
    pub fn push(&self, queued: QueuedSlot) {
        let mut state = self.inner.state.lock();
        if state.closed {
            tracing::warn!("Slot {} queued after the relay queue was closed", queued.slot);
        }
        state.outstanding += queued.play_time;
        state.pending.push_back(queued);
        self.inner.ready.notify_one();
    }

    /// Called by the worker once it is done with a popped slot.
    pub fn settle(&self, queued: &QueuedSlot) {
        let mut state = self.inner.state.lock();
        state.outstanding = state.outstanding.saturating_sub(queued.play_time);
    }

    /// Play time still ahead of the worker, including the slot it is
    /// draining right now.
    pub fn outstanding(&self) -> Duration {
        self.inner.state.lock().outstanding
    }

    /// Let the worker exit once every queued slot has been drained.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.inner.ready.notify_all();
    }

    /// Raise the hard stop signal and wake the worker.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        // Notify under the lock so a worker about to wait cannot miss it.
        let _state = self.inner.state.lock();
        self.inner.ready.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the front slot, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let mut state = self.inner.state.lock();

        if state.pending.is_empty() && !state.closed && !self.stop_requested() {
            self.inner.ready.wait_for(&mut state, timeout);
        }

        if self.stop_requested() {
            return Pop::Stopped;
        }
        match state.pending.pop_front() {
            Some(queued) => Pop::Ready(queued),
            None if state.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }
}
