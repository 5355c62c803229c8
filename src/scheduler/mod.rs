//! Playlist scheduler.
//!
//! Walks the ordered playlist, decides per item whether to wait, join late
//! or skip, and launches each producer into the next alternating hand-off
//! slot ahead of time so the relay can switch items without a gap.

mod decision;

pub use decision::{ScheduleAction, ScheduleDecision, LOOKAHEAD};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use channelcast_av::{DurationOracle, LaunchRequest, ProducerExit, ProducerTask, Transcoder};
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, PlayoutEvent};
use crate::handoff::{HandoffPair, HandoffSlot};
use crate::playlist::{self, PlaylistItem};
use crate::relay::{QueuedSlot, RelayHandle, RelayStats};

/// Producers allowed to run at once: the one on air and the one pre-rolling.
pub const LAUNCH_POOL_SIZE: usize = 2;

/// Slack granted to the relay on top of the play time it still has queued
/// once the playlist is done, and the whole bound after a cancellation.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long a launch waits for its slot to be released by the relay.
pub const SLOT_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a playout run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayoutSummary {
    pub launched: usize,
    pub skipped: usize,
    /// The run was interrupted by the cancellation token.
    pub cancelled: bool,
    pub relay: RelayStats,
}

enum Flow {
    Completed,
    Cancelled,
}

/// Drives one playlist through the launcher and the relay.
pub struct Scheduler {
    oracle: Arc<dyn DurationOracle>,
    transcoder: Arc<dyn Transcoder>,
    handoff: Arc<HandoffPair>,
    events: Arc<EventBus>,
    launch_permits: Arc<Semaphore>,
    next_slot: HandoffSlot,
    cancel: CancellationToken,
    shutdown_grace: Duration,
    slot_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        oracle: Arc<dyn DurationOracle>,
        transcoder: Arc<dyn Transcoder>,
        handoff: Arc<HandoffPair>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            oracle,
            transcoder,
            handoff,
            events,
            launch_permits: Arc::new(Semaphore::new(LAUNCH_POOL_SIZE)),
            next_slot: HandoffSlot::A,
            cancel: CancellationToken::new(),
            shutdown_grace: SHUTDOWN_GRACE,
            slot_timeout: SLOT_RELEASE_TIMEOUT,
        }
    }

    /// Stop early when `cancel` fires. The relay is hard-stopped.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_slot_timeout(mut self, timeout: Duration) -> Self {
        self.slot_timeout = timeout;
        self
    }

    /// Play `items` in start order, then shut the relay down.
    pub async fn run(
        mut self,
        items: Vec<PlaylistItem>,
        relay: RelayHandle,
    ) -> Result<PlayoutSummary> {
        let items = playlist::order(items);
        info!("Scheduling {} items", items.len());

        let mut summary = PlayoutSummary::default();
        let flow = self.play_all(items, &relay, &mut summary).await;

        match flow {
            Ok(Flow::Completed) => {
                // Producers may only attach once the relay reaches their
                // slot, so the tail can lag the schedule by a whole item.
                let bound = relay.outstanding() + self.shutdown_grace;
                debug!("Playlist exhausted; letting the relay drain for up to {:?}", bound);
                relay.finish();
                summary.relay = relay.join(bound).await?;
            }
            Ok(Flow::Cancelled) => {
                info!("Playout cancelled");
                summary.cancelled = true;
                relay.stop();
                summary.relay = relay.join(self.shutdown_grace).await?;
            }
            Err(Error::RelayStopped) => {
                // Report what actually took the relay down.
                relay.join(self.shutdown_grace).await?;
                return Err(Error::RelayStopped);
            }
            Err(e) => {
                relay.stop();
                if let Err(relay_err) = relay.join(self.shutdown_grace).await {
                    warn!("Relay also failed during shutdown: {}", relay_err);
                }
                return Err(e);
            }
        }

        info!(
            "Playout finished: {} launched, {} skipped",
            summary.launched, summary.skipped
        );
        Ok(summary)
    }

    async fn play_all(
        &mut self,
        items: Vec<PlaylistItem>,
        relay: &RelayHandle,
        summary: &mut PlayoutSummary,
    ) -> Result<Flow> {
        for item in items {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if relay.is_finished() {
                return Err(Error::RelayStopped);
            }

            let duration = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
                d = self.oracle.duration(&item.media) => d,
            };

            let decision = ScheduleDecision::decide(item, Utc::now(), duration);
            match decision.action {
                ScheduleAction::Skip => {
                    self.skip(&decision);
                    summary.skipped += 1;
                    continue;
                }
                ScheduleAction::Wait(delay) => {
                    if !delay.is_zero() {
                        debug!("Waiting {:?} for {}", delay, decision.item.media);
                    }
                    if !self.sleep_until_start(&decision.item).await {
                        return Ok(Flow::Cancelled);
                    }
                }
                ScheduleAction::SeekAndPlay(lateness) => {
                    info!(
                        "{} started {:.2}s ago; joining mid-item",
                        decision.item.media,
                        lateness.as_secs_f64()
                    );
                }
            }

            if let Flow::Cancelled = self.launch(&decision, relay).await? {
                return Ok(Flow::Cancelled);
            }
            summary.launched += 1;

            let preroll = decision.preroll();
            debug!("Next launch in {:?}", preroll);
            if !self.pause(preroll).await {
                return Ok(Flow::Cancelled);
            }
        }

        Ok(Flow::Completed)
    }

    fn skip(&self, decision: &ScheduleDecision) {
        let lateness = match decision.item.start {
            Some(start) => (Utc::now() - start).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        };
        info!(
            "Skipping {}: started {:.1}s ago, runs {:.1}s",
            decision.item.media, lateness, decision.duration_secs
        );
        self.events.emit(PlayoutEvent::ItemSkipped {
            media: decision.item.media.clone(),
            lateness_secs: lateness,
            duration_secs: decision.duration_secs,
        });
    }

    /// Launch the item's producer into the next slot and queue the slot.
    async fn launch(
        &mut self,
        decision: &ScheduleDecision,
        relay: &RelayHandle,
    ) -> Result<Flow> {
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
            permit = Arc::clone(&self.launch_permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                // A closed pool only happens on shutdown.
                Err(_) => return Ok(Flow::Cancelled),
            },
        };

        let slot = self.next_slot;
        let channel = self.handoff.channel(slot);
        let generation = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
            claimed = channel.claim(self.slot_timeout) => claimed?,
        };

        let media = decision.item.media.clone();
        let seek = decision.seek_timestamp();
        let request = LaunchRequest {
            media: media.clone(),
            media_type: decision.item.media_type,
            sink: channel.path().to_path_buf(),
            seek: seek.clone(),
        };

        let task: ProducerTask = match self.transcoder.start(&request).await {
            Ok(task) => task,
            Err(e) => {
                // Treated like a producer that died at once: the relay finds
                // the slot empty and moves on.
                warn!("Failed to launch producer for {}: {}", media, e);
                std::future::ready(ProducerExit::not_started(e.to_string())).boxed()
            }
        };

        relay.enqueue(QueuedSlot {
            slot,
            generation,
            media: media.clone(),
            play_time: Duration::try_from_secs_f64(decision.remaining_secs())
                .unwrap_or(Duration::ZERO),
        });
        info!(
            "Launched {} into slot {}{}",
            media,
            slot,
            seek.as_deref().map(|s| format!(" at {s}")).unwrap_or_default()
        );
        self.events.emit(PlayoutEvent::ItemLaunched {
            media: media.clone(),
            slot,
            seek,
        });
        self.next_slot = slot.other();

        self.track(media, slot, generation, task, permit);
        Ok(Flow::Completed)
    }

    /// Wait for the producer on a detached task and publish its exit.
    fn track(
        &self,
        media: String,
        slot: HandoffSlot,
        generation: u64,
        task: ProducerTask,
        permit: OwnedSemaphorePermit,
    ) {
        let handoff = Arc::clone(&self.handoff);
        let events = Arc::clone(&self.events);

        tokio::spawn(async move {
            let exit = task.await;
            handoff.channel(slot).mark_producer_done(generation);

            if exit.success {
                debug!("Producer for {} exited cleanly", media);
            } else {
                warn!(
                    "Producer for {} failed (code {:?}){}",
                    media,
                    exit.code,
                    exit.detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
                );
            }

            events.emit(PlayoutEvent::ProducerExited {
                media,
                slot,
                success: exit.success,
                code: exit.code,
            });
            drop(permit);
        });
    }

    /// Sleep until the item's start time, re-reading the wall clock after
    /// each wake. Returns false if cancelled.
    async fn sleep_until_start(&self, item: &PlaylistItem) -> bool {
        let Some(start) = item.start else {
            return !self.cancel.is_cancelled();
        };

        loop {
            let remaining = match (start - Utc::now()).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => return !self.cancel.is_cancelled(),
            };
            if !self.pause(remaining).await {
                return false;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
