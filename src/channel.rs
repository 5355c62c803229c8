//! Wiring of one channel: slots, relay worker, tools and scheduler.

use std::sync::Arc;

use channelcast_av::{resolve_tool_path, FfmpegTranscoder, FfprobeOracle};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::handoff::HandoffPair;
use crate::playlist::PlaylistItem;
use crate::relay::{MulticastSender, RelayEngine, RelayQueue};
use crate::scheduler::{PlayoutSummary, Scheduler};

/// Play `items` on the channel described by `config` until the playlist
/// ends or `cancel` fires.
pub async fn run(
    config: &Config,
    items: Vec<PlaylistItem>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) -> Result<PlayoutSummary> {
    let handoff = Arc::new(HandoffPair::create(&config.handoff.dir)?);
    tracing::debug!("Hand-off slots in {}", handoff.dir().display());

    let sender = MulticastSender::new(&config.output)?;
    tracing::info!(
        "Streaming to udp://{} (ttl {})",
        sender.target(),
        config.output.ttl
    );

    let relay = RelayEngine::new(
        Box::new(sender),
        RelayQueue::new(),
        Arc::clone(&handoff),
        Arc::clone(&events),
    )
    .spawn();

    let ffprobe = resolve_tool_path("ffprobe", config.tools.ffprobe_path.as_deref());
    let ffmpeg = resolve_tool_path("ffmpeg", config.tools.ffmpeg_path.as_deref());

    Scheduler::new(
        Arc::new(FfprobeOracle::new(ffprobe)),
        Arc::new(FfmpegTranscoder::new(ffmpeg, config.transcode.clone())),
        handoff,
        events,
    )
    .with_cancellation(cancel)
    .run(items, relay)
    .await
}

/// Cancel `token` on Ctrl+C or SIGTERM.
pub async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => return,
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}
