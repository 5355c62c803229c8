//! Item duration lookup backed by `ffprobe`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::{Error, Result};

/// Duration assumed for an item whose length cannot be determined.
pub const DEFAULT_DURATION_SECS: f64 = 10.0;

/// ffprobe should answer a format query almost instantly.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Answers "how long is this item" for the scheduler.
///
/// Implementations never fail: anything that goes wrong is logged and
/// replaced by [`DEFAULT_DURATION_SECS`].
#[async_trait]
pub trait DurationOracle: Send + Sync {
    /// Total duration of `media` in seconds.
    async fn duration(&self, media: &str) -> f64;
}

/// Duration oracle shelling out to `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeOracle {
    ffprobe_path: PathBuf,
}

impl FfprobeOracle {
    /// Create an oracle using the given ffprobe binary.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Run ffprobe and parse the container duration, surfacing failures.
    pub async fn probe_duration(&self, media: &str) -> Result<f64> {
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media)
            .timeout(PROBE_TIMEOUT)
            .execute()
            .await?;

        parse_duration(&output.stdout)
    }
}

#[async_trait]
impl DurationOracle for FfprobeOracle {
    async fn duration(&self, media: &str) -> f64 {
        match self.probe_duration(media).await {
            Ok(secs) => secs,
            Err(e) => {
                tracing::warn!(
                    "Could not get duration for {}, defaulting to {}s: {}",
                    media,
                    DEFAULT_DURATION_SECS,
                    e
                );
                DEFAULT_DURATION_SECS
            }
        }
    }
}

/// Parse ffprobe's bare `format=duration` output.
///
/// Live inputs report `N/A`; negative or non-finite values are rejected too.
pub fn parse_duration(stdout: &str) -> Result<f64> {
    let trimmed = stdout.trim();
    let secs: f64 = trimmed
        .parse()
        .map_err(|_| Error::parse_error("ffprobe", format!("invalid duration {trimmed:?}")))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::parse_error(
            "ffprobe",
            format!("duration out of range: {secs}"),
        ));
    }

    Ok(secs)
}
