//! The two alternating hand-off slots between producers and the relay.
//!
//! Each slot is a named pipe that ffmpeg writes into and the relay reads
//! from. Ownership of a slot is tracked with a small state machine:
//!
//! ```text
//! Idle --claim()--> Busy --producer exits--> Busy{producer_done} --release()--> Idle
//!                     |                                                          ^
//!                     +--release()--> Busy{drained} --producer exits-------------+
//! ```
//!
//! A slot only returns to idle once the relay has released it and its
//! producer has exited, so a new producer never shares a pipe with an old
//! one that is still attached.
//!
//! Every claim bumps a generation counter so that late signals from a
//! previous occupant (a producer exiting after the relay already gave up on
//! it) cannot touch the next one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Identity of one of the two conduits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandoffSlot {
    A,
    B,
}

impl HandoffSlot {
    /// The slot used after this one.
    pub fn other(self) -> Self {
        match self {
            HandoffSlot::A => HandoffSlot::B,
            HandoffSlot::B => HandoffSlot::A,
        }
    }

    /// File name of the slot's pipe inside the hand-off directory.
    pub fn file_name(self) -> &'static str {
        match self {
            HandoffSlot::A => "pipe_a",
            HandoffSlot::B => "pipe_b",
        }
    }
}

impl fmt::Display for HandoffSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffSlot::A => f.write_str("A"),
            HandoffSlot::B => f.write_str("B"),
        }
    }
}

/// Ownership state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotState {
    pub busy: bool,
    /// Incremented by every successful claim.
    pub generation: u64,
    /// The current occupant's producer process has exited.
    pub producer_done: bool,
    /// The relay has finished with the current occupant.
    pub drained: bool,
}

/// One reusable conduit.
#[derive(Debug)]
pub struct HandoffChannel {
    slot: HandoffSlot,
    path: PathBuf,
    state: watch::Sender<SlotState>,
}

impl HandoffChannel {
    fn new(slot: HandoffSlot, dir: &Path) -> Self {
        let (state, _) = watch::channel(SlotState::default());
        Self {
            slot,
            path: dir.join(slot.file_name()),
            state,
        }
    }

    pub fn slot(&self) -> HandoffSlot {
        self.slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SlotState {
        *self.state.borrow()
    }

    /// Claim an idle slot for a new producer, returning the new generation.
    pub fn try_claim(&self) -> Option<u64> {
        let mut claimed = None;
        self.state.send_if_modified(|s| {
            if s.busy {
                return false;
            }
            s.busy = true;
            s.generation += 1;
            s.producer_done = false;
            s.drained = false;
            claimed = Some(s.generation);
            true
        });
        claimed
    }

    /// Wait up to `timeout` for the slot to become idle, then claim it.
    ///
    /// A slot that stays busy, either undrained or with its producer still
    /// running, yields [`Error::SlotConflict`].
    pub async fn claim(&self, timeout: Duration) -> Result<u64> {
        if let Some(generation) = self.try_claim() {
            return Ok(generation);
        }

        let s = self.state();
        tracing::debug!(
            "Slot {} still busy (drained: {}, producer done: {}); waiting up to {:?}",
            self.slot,
            s.drained,
            s.producer_done,
            timeout
        );
        let mut rx = self.state.subscribe();
        // The borrow guard from wait_for must be gone before claiming.
        let became_idle = tokio::time::timeout(timeout, rx.wait_for(|s| !s.busy))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        let conflict = Error::SlotConflict {
            slot: self.slot,
            waited: timeout,
        };
        if !became_idle {
            return Err(conflict);
        }
        self.try_claim().ok_or(conflict)
    }

    /// Record that the producer of `generation` has exited.
    pub fn mark_producer_done(&self, generation: u64) {
        self.state.send_if_modified(|s| {
            if s.busy && s.generation == generation && !s.producer_done {
                s.producer_done = true;
                s.busy = !s.drained;
                true
            } else {
                false
            }
        });
    }

    /// Whether the producer of `generation` has exited.
    pub fn producer_done(&self, generation: u64) -> bool {
        let s = self.state.borrow();
        s.generation != generation || s.producer_done
    }

    /// Hand the slot back after the relay finished draining `generation`.
    /// The slot stays busy until that generation's producer has exited too.
    pub fn release(&self, generation: u64) {
        self.state.send_if_modified(|s| {
            if s.busy && s.generation == generation && !s.drained {
                s.drained = true;
                s.busy = !s.producer_done;
                true
            } else {
                false
            }
        });
    }

    /// Open the read end without waiting for a writer.
    ///
    /// On a pipe with no writer attached, reads return 0 immediately; with a
    /// writer but no data they fail with `WouldBlock`.
    pub fn open_reader(&self) -> std::io::Result<File> {
        open_nonblocking(&self.path)
    }
}

#[cfg(unix)]
fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits())
        .open(path)
}

#[cfg(not(unix))]
fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

/// Both slots, addressed by [`HandoffSlot`].
#[derive(Debug)]
pub struct HandoffPair {
    dir: PathBuf,
    a: HandoffChannel,
    b: HandoffChannel,
}

impl HandoffPair {
    /// Describe the slots inside `dir` without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            a: HandoffChannel::new(HandoffSlot::A, &dir),
            b: HandoffChannel::new(HandoffSlot::B, &dir),
            dir,
        }
    }

    /// Like [`HandoffPair::new`], creating both named pipes if missing.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let pair = Self::new(dir);
        std::fs::create_dir_all(&pair.dir)?;
        for channel in [&pair.a, &pair.b] {
            ensure_fifo(channel.path())?;
        }
        Ok(pair)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn channel(&self, slot: HandoffSlot) -> &HandoffChannel {
        match slot {
            HandoffSlot::A => &self.a,
            HandoffSlot::B => &self.b,
        }
    }
}

#[cfg(unix)]
fn ensure_fifo(path: &Path) -> Result<()> {
    use nix::sys::stat::Mode;
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => {
            tracing::warn!("{} exists but is not a named pipe", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
            nix::unistd::mkfifo(path, mode).map_err(std::io::Error::from)?;
            tracing::debug!("Created named pipe {}", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn ensure_fifo(path: &Path) -> Result<()> {
    if !path.exists() {
        File::create(path)?;
    }
    Ok(())
}
