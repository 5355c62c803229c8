//! Error types for the playout pipeline.

use crate::handoff::HandoffSlot;
use std::time::Duration;

/// Failures that end a playout run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A slot was still owned by an earlier item when the scheduler needed it.
    #[error("slot {slot} still busy after {waited:?}; refusing to attach a second producer")]
    SlotConflict { slot: HandoffSlot, waited: Duration },

    /// The relay worker exited while the scheduler still had items to play.
    #[error("relay worker is no longer running")]
    RelayStopped,

    /// The relay worker failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The playlist could not be loaded.
    #[error("playlist error: {0}")]
    Playlist(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal relay worker errors. Send failures are never retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to set up relay socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("datagram send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("datagram truncated: sent {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },

    #[error("relay worker panicked or was cancelled: {0}")]
    Join(String),
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
