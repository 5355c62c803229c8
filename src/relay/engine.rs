//! The relay worker.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    DatagramSink, Pop, QueuedSlot, RelayQueue, ATTACH_TIMEOUT, IDLE_POLL, IDLE_TIMEOUT,
    PACKET_SIZE, QUEUE_POLL,
};
use crate::error::RelayError;
use crate::events::{DrainEnd, EventBus, PlayoutEvent};
use crate::handoff::{HandoffChannel, HandoffPair};

/// Extra time granted after a hard stop before the worker is given up on.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Totals over the worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub items: u64,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct DrainCounters {
    packets: u64,
    bytes: u64,
}

/// Single worker forwarding queued slots to a [`DatagramSink`].
pub struct RelayEngine {
    sink: Box<dyn DatagramSink>,
    queue: RelayQueue,
    handoff: Arc<HandoffPair>,
    events: Arc<EventBus>,
    stats: RelayStats,
}

impl RelayEngine {
    pub fn new(
        sink: Box<dyn DatagramSink>,
        queue: RelayQueue,
        handoff: Arc<HandoffPair>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            sink,
            queue,
            handoff,
            events,
            stats: RelayStats::default(),
        }
    }

    /// Run the worker on the blocking pool.
    pub fn spawn(self) -> RelayHandle {
        let queue = self.queue.clone();
        let join = tokio::task::spawn_blocking(move || self.run());
        RelayHandle { queue, join }
    }

    /// Drain queued slots until the queue is closed and empty, or the stop
    /// signal is raised. A failed send ends the worker with an error.
    pub fn run(mut self) -> Result<RelayStats, RelayError> {
        info!("Relay started");

        let result = self.serve();

        match &result {
            Ok(stats) => info!(
                "Relay stopped after {} items ({} packets, {} bytes)",
                stats.items, stats.packets, stats.bytes
            ),
            Err(e) => tracing::error!("Relay failed: {}", e),
        }
        self.events.emit(PlayoutEvent::RelayStopped {
            packets: self.stats.packets,
            bytes: self.stats.bytes,
        });

        result
    }

    fn serve(&mut self) -> Result<RelayStats, RelayError> {
        loop {
            match self.queue.pop_timeout(QUEUE_POLL) {
                Pop::Ready(queued) => {
                    let end = self.drain(&queued)?;
                    if end == DrainEnd::Stopped {
                        return Ok(self.stats);
                    }
                }
                Pop::Empty => continue,
                Pop::Closed | Pop::Stopped => return Ok(self.stats),
            }
        }
    }

    fn drain(&mut self, queued: &QueuedSlot) -> Result<DrainEnd, RelayError> {
        let handoff = Arc::clone(&self.handoff);
        let channel = handoff.channel(queued.slot);
        info!(
            "Sending {} from slot {} ({})",
            queued.media,
            queued.slot,
            channel.path().display()
        );

        let mut counters = DrainCounters::default();
        let outcome = match channel.open_reader() {
            Ok(mut reader) => self.pump(&mut reader, channel, queued, &mut counters),
            Err(e) => {
                warn!("Could not open slot {}: {}", queued.slot, e);
                Ok(DrainEnd::ReadError)
            }
        };

        // Hand the slot back even when the send path failed.
        channel.release(queued.generation);
        self.queue.settle(queued);
        self.stats.items += 1;
        self.stats.packets += counters.packets;
        self.stats.bytes += counters.bytes;

        let end = outcome?;
        match end {
            DrainEnd::NoData => warn!(
                "Slot {} produced no data for {}",
                queued.slot, queued.media
            ),
            DrainEnd::Stopped => info!("Stop requested; abandoning {}", queued.media),
            _ => debug!(
                "Finished {} from slot {}: {} packets, {} bytes ({:?})",
                queued.media, queued.slot, counters.packets, counters.bytes, end
            ),
        }

        self.events.emit(PlayoutEvent::SlotDrained {
            media: queued.media.clone(),
            slot: queued.slot,
            bytes: counters.bytes,
            packets: counters.packets,
            end,
        });

        Ok(end)
    }

    /// Forward reads until the idle rule ends the item.
    fn pump<R: Read>(
        &mut self,
        reader: &mut R,
        channel: &HandoffChannel,
        queued: &QueuedSlot,
        counters: &mut DrainCounters,
    ) -> Result<DrainEnd, RelayError> {
        let mut buf = [0u8; PACKET_SIZE];
        let opened = Instant::now();
        let mut last_data: Option<Instant> = None;

        loop {
            if self.queue.stop_requested() {
                return Ok(DrainEnd::Stopped);
            }

            // Sampled before reading so bytes written just before exit are
            // still picked up by this read.
            let producer_done = channel.producer_done(queued.generation);

            let n = match reader.read(&mut buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => 0,
                Err(e) => {
                    warn!("Read from slot {} failed: {}", queued.slot, e);
                    return Ok(DrainEnd::ReadError);
                }
            };

            if n > 0 {
                self.send(&buf[..n])?;
                counters.packets += 1;
                counters.bytes += n as u64;
                last_data = Some(Instant::now());
                continue;
            }

            match last_data {
                Some(at) if at.elapsed() >= IDLE_TIMEOUT => return Ok(DrainEnd::Idle),
                None if producer_done || opened.elapsed() >= ATTACH_TIMEOUT => {
                    return Ok(DrainEnd::NoData)
                }
                _ => std::thread::sleep(IDLE_POLL),
            }
        }
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), RelayError> {
        let sent = self.sink.send(payload).map_err(RelayError::Send)?;
        if sent != payload.len() {
            return Err(RelayError::ShortSend {
                sent,
                len: payload.len(),
            });
        }
        Ok(())
    }
}

/// Control handle for a spawned [`RelayEngine`].
#[derive(Debug)]
pub struct RelayHandle {
    queue: RelayQueue,
    join: JoinHandle<Result<RelayStats, RelayError>>,
}

impl RelayHandle {
    pub fn enqueue(&self, queued: QueuedSlot) {
        self.queue.push(queued);
    }

    /// Exit once the queue has been drained.
    pub fn finish(&self) {
        self.queue.close();
    }

    /// Abandon the current drain and exit.
    pub fn stop(&self) {
        self.queue.request_stop();
    }

    /// Play time queued or being drained that the worker has not finished.
    pub fn outstanding(&self) -> Duration {
        self.queue.outstanding()
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait up to `timeout` for the worker to exit. If it is still running,
    /// raise the stop signal and wait a little longer.
    pub async fn join(self, timeout: Duration) -> Result<RelayStats, RelayError> {
        let RelayHandle { queue, mut join } = self;

        let joined = match tokio::time::timeout(timeout, &mut join).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Relay still busy after {:?}; stopping it", timeout);
                queue.request_stop();
                tokio::time::timeout(STOP_GRACE, &mut join)
                    .await
                    .map_err(|_| RelayError::Join("worker did not stop".to_string()))?
            }
        };

        joined.map_err(|e| RelayError::Join(e.to_string()))?
    }
}
