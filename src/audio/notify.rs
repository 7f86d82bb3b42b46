use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::time::Duration;

use crate::{error::ResolveError, sources::Track};

/// Things the controller tells a guild about without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowPlaying(Track),
    /// The original could not be played; a similar track replaced it.
    Substituted { original: Track, substitute: Track },
    /// Dropped after resolution or playback failed.
    Dropped { track: Track, error: ResolveError },
    QueueFinished,
    LeftIdle(Duration),
    LeftEmptyChannel,
}

impl Notice {
    /// Terse, user-facing text.
    pub fn message(&self) -> String {
        match self {
            Notice::NowPlaying(track) => format!("🎵 Now playing: **{}**", track.title()),
            Notice::Substituted { original, substitute } => format!(
                "🔄 **{}** can't be played here, playing **{}** instead",
                original.title(),
                substitute.title()
            ),
            Notice::Dropped { track, error } => {
                format!("⚠️ Skipped **{}**: {}", track.title(), error)
            }
            Notice::QueueFinished => "✅ Queue finished".to_string(),
            Notice::LeftIdle(after) => format!(
                "👋 Left the voice channel after {} of inactivity",
                humantime::format_duration(*after)
            ),
            Notice::LeftEmptyChannel => "👋 Left the voice channel because everyone left".to_string(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, guild_id: GuildId, notice: Notice);
}
