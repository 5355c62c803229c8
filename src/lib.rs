//! channelcast - scheduled playlist playout to UDP multicast
//!
//! A [`scheduler::Scheduler`] walks a timestamped playlist and launches one
//! ffmpeg producer per item into one of two alternating named pipes
//! ([`handoff`]). A single [`relay`] worker drains the pipes in launch order
//! and forwards the MPEG-TS bytes as UDP datagrams, so consecutive items
//! reach the network back to back.
//!
//! This library crate exposes the core functionality for integration testing.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod handoff;
pub mod playlist;
pub mod relay;
pub mod scheduler;

pub use error::{Error, RelayError, Result};
