//! Shared test harness for integration tests.
//!
//! Provides [`Harness`], which sets up a temporary hand-off directory using
//! plain files, an [`EventBus`], a scripted duration oracle and transcoder,
//! and a sink that records every datagram the relay sends.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use channelcast::events::{EventBus, PlayoutEvent};
use channelcast::handoff::{HandoffPair, HandoffSlot};
use channelcast::relay::{DatagramSink, RelayEngine, RelayHandle, RelayQueue};
use channelcast::scheduler::Scheduler;
use channelcast_av::{DurationOracle, LaunchRequest, ProducerExit, ProducerTask, Transcoder};

/// Duration oracle answering from a fixed table.
#[derive(Default)]
pub struct FakeOracle {
    durations: Mutex<HashMap<String, f64>>,
    fallback: f64,
}

impl FakeOracle {
    pub fn new(fallback: f64) -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    pub fn set(&self, media: &str, secs: f64) {
        self.durations.lock().insert(media.to_string(), secs);
    }
}

#[async_trait]
impl DurationOracle for FakeOracle {
    async fn duration(&self, media: &str) -> f64 {
        self.durations
            .lock()
            .get(media)
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// A recorded call to [`FakeTranscoder::start`].
#[derive(Debug, Clone)]
pub struct Launch {
    pub media: String,
    pub slot: HandoffSlot,
    pub seek: Option<String>,
    pub at: DateTime<Utc>,
}

/// Transcoder that writes a canned payload straight into the slot file.
///
/// By default the producer exits as soon as the payload is written. A media
/// can instead be held alive for a while, gated on a token, or written in
/// chunks from a background thread.
#[derive(Default)]
pub struct FakeTranscoder {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    crashing: Mutex<HashSet<String>>,
    refusing: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, Duration>>,
    gates: Mutex<HashMap<String, CancellationToken>>,
    trickles: Mutex<HashMap<String, (usize, Duration)>>,
    launches: Mutex<Vec<Launch>>,
    exits: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>,
}

impl FakeTranscoder {
    pub fn set_payload(&self, media: &str, payload: Vec<u8>) {
        self.payloads.lock().insert(media.to_string(), payload);
    }

    /// The producer starts but exits with an error without writing.
    pub fn crash(&self, media: &str) {
        self.crashing.lock().insert(media.to_string());
    }

    /// `start` itself fails.
    pub fn refuse(&self, media: &str) {
        self.refusing.lock().insert(media.to_string());
    }

    /// Keep the producer running for `hold` after its payload is written.
    pub fn hold(&self, media: &str, hold: Duration) {
        self.holds.lock().insert(media.to_string(), hold);
    }

    /// Keep the producer running until the returned token is cancelled.
    pub fn gate(&self, media: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.gates.lock().insert(media.to_string(), token.clone());
        token
    }

    /// Write `chunks` packets of the payload pattern, one every `interval`.
    pub fn trickle(&self, media: &str, chunks: usize, interval: Duration) {
        self.trickles
            .lock()
            .insert(media.to_string(), (chunks, interval));
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().clone()
    }

    /// When each producer exited, in exit order.
    pub fn exits(&self) -> Vec<(String, DateTime<Utc>)> {
        self.exits.lock().clone()
    }

    pub fn exit_of(&self, media: &str) -> Option<DateTime<Utc>> {
        self.exits()
            .into_iter()
            .find(|(m, _)| m == media)
            .map(|(_, at)| at)
    }
}

/// Bytes a trickled producer writes in total.
pub fn trickle_bytes(chunks: usize) -> Vec<u8> {
    (0..chunks).flat_map(|i| pattern(1316, i as u8)).collect()
}

fn slot_of(request: &LaunchRequest) -> HandoffSlot {
    match request.sink.file_name().and_then(|n| n.to_str()) {
        Some("pipe_b") => HandoffSlot::B,
        _ => HandoffSlot::A,
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn start(&self, request: &LaunchRequest) -> channelcast_av::Result<ProducerTask> {
        self.launches.lock().push(Launch {
            media: request.media.clone(),
            slot: slot_of(request),
            seek: request.seek.clone(),
            at: Utc::now(),
        });

        if self.refusing.lock().contains(&request.media) {
            return Err(channelcast_av::Error::tool_failed("ffmpeg", "refused"));
        }

        if self.crashing.lock().contains(&request.media) {
            std::fs::write(&request.sink, b"")?;
            return Ok(async {
                ProducerExit {
                    success: false,
                    code: Some(1),
                    detail: None,
                }
            }
            .boxed());
        }

        let exits = Arc::clone(&self.exits);
        let media = request.media.clone();
        let finished = move || {
            exits.lock().push((media, Utc::now()));
            ProducerExit {
                success: true,
                code: Some(0),
                detail: None,
            }
        };

        let trickle = self.trickles.lock().get(&request.media).copied();
        if let Some((chunks, interval)) = trickle {
            let mut file = std::fs::File::create(&request.sink)?;
            let writer = tokio::task::spawn_blocking(move || {
                use std::io::Write;
                for i in 0..chunks {
                    std::thread::sleep(interval);
                    file.write_all(&pattern(1316, i as u8)).unwrap();
                    file.flush().unwrap();
                }
            });
            return Ok(async move {
                writer.await.unwrap();
                finished()
            }
            .boxed());
        }

        let payload = self
            .payloads
            .lock()
            .get(&request.media)
            .cloned()
            .unwrap_or_else(|| request.media.as_bytes().to_vec());
        std::fs::write(&request.sink, payload)?;

        let hold = self.holds.lock().get(&request.media).copied();
        let gate = self.gates.lock().get(&request.media).cloned();
        Ok(async move {
            if let Some(hold) = hold {
                tokio::time::sleep(hold).await;
            }
            if let Some(gate) = gate {
                gate.cancelled().await;
            }
            finished()
        }
        .boxed())
    }
}

/// Sink recording each datagram with its send time.
#[derive(Clone, Default)]
pub struct RecordingSink {
    packets: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
}

impl RecordingSink {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.packets.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.payloads().concat()
    }
}

impl DatagramSink for RecordingSink {
    fn send(&mut self, payload: &[u8]) -> std::io::Result<usize> {
        self.packets.lock().push((Instant::now(), payload.to_vec()));
        Ok(payload.len())
    }
}

/// Sink whose every send fails.
pub struct FailingSink;

impl DatagramSink for FailingSink {
    fn send(&mut self, _payload: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NetworkUnreachable,
            "network unreachable",
        ))
    }
}

/// Everything a scheduler run needs, backed by fakes.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub handoff: Arc<HandoffPair>,
    pub events: Arc<EventBus>,
    pub oracle: Arc<FakeOracle>,
    pub transcoder: Arc<FakeTranscoder>,
    pub sink: RecordingSink,
}

impl Harness {
    /// Items default to 0.5s, short enough that no pre-roll sleep happens.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        Self {
            handoff: Arc::new(HandoffPair::new(dir.path())),
            dir,
            events: Arc::new(EventBus::default()),
            oracle: Arc::new(FakeOracle::new(0.5)),
            transcoder: Arc::new(FakeTranscoder::default()),
            sink: RecordingSink::default(),
        }
    }

    pub fn relay(&self) -> RelayHandle {
        self.relay_with(Box::new(self.sink.clone()))
    }

    pub fn relay_with(&self, sink: Box<dyn DatagramSink>) -> RelayHandle {
        RelayEngine::new(
            sink,
            RelayQueue::new(),
            Arc::clone(&self.handoff),
            Arc::clone(&self.events),
        )
        .spawn()
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.oracle.clone(),
            self.transcoder.clone(),
            Arc::clone(&self.handoff),
            Arc::clone(&self.events),
        )
    }

    pub fn history(&self) -> Vec<PlayoutEvent> {
        self.events.history()
    }
}

/// Deterministic non-repeating byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
