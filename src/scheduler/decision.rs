//! Per-item wait / seek / skip decision.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::playlist::PlaylistItem;

/// Pre-roll margin: the next producer is launched this long before the
/// current item is expected to end.
pub const LOOKAHEAD: Duration = Duration::from_secs(2);

/// What to do with an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleAction {
    /// Start time is ahead; wait this long, then play from the beginning.
    Wait(Duration),
    /// Start time has passed but the item is still running; join it here.
    SeekAndPlay(Duration),
    /// The item's whole window has already passed.
    Skip,
}

/// Decision for one item, computed when the scheduler reaches it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDecision {
    pub item: PlaylistItem,
    pub action: ScheduleAction,
    pub duration_secs: f64,
}

impl ScheduleDecision {
    /// Decide how to play `item` at wall-clock `now`.
    pub fn decide(item: PlaylistItem, now: DateTime<Utc>, duration_secs: f64) -> Self {
        let action = match item.start {
            None => ScheduleAction::Wait(Duration::ZERO),
            Some(start) => {
                let delay = start - now;
                match delay.to_std() {
                    Ok(wait) => ScheduleAction::Wait(wait),
                    Err(_) => {
                        let lateness = (-delay)
                            .to_std()
                            .unwrap_or(Duration::MAX);
                        if lateness.as_secs_f64() >= duration_secs {
                            ScheduleAction::Skip
                        } else {
                            ScheduleAction::SeekAndPlay(lateness)
                        }
                    }
                }
            }
        };

        Self {
            item,
            action,
            duration_secs,
        }
    }

    /// Seek offset in seconds, if joining mid-item.
    pub fn seek_secs(&self) -> Option<f64> {
        match self.action {
            ScheduleAction::SeekAndPlay(lateness) => Some(lateness.as_secs_f64()),
            _ => None,
        }
    }

    /// Seek offset formatted for the transcoder.
    pub fn seek_timestamp(&self) -> Option<String> {
        self.seek_secs().map(channelcast_av::format_seek)
    }

    /// Play time left from the launch point.
    pub fn remaining_secs(&self) -> f64 {
        (self.duration_secs - self.seek_secs().unwrap_or(0.0)).max(0.0)
    }

    /// How long to sleep after launching before moving to the next item.
    pub fn preroll(&self) -> Duration {
        let secs = (self.remaining_secs() - LOOKAHEAD.as_secs_f64()).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}
