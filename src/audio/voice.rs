//! Voice output seam. The playback controller only ever talks to these traits;
//! the songbird-backed implementation lives in [`crate::bot::voice`].

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::{
    error::{ResolveError, SinkError, VoiceConnectError},
    sources::StreamEndpoint,
};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Reached the end, or was stopped.
    Finished,
    Failed(ResolveError),
}

/// Events consumed by the controller's driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished {
        guild_id: GuildId,
        generation: u64,
        outcome: PlaybackOutcome,
    },
}

/// Handed to [`VoiceSink::play`]; the sink calls [`FinishNotifier::notify`]
/// when the stream ends. Notifying more than once is harmless: the controller
/// drops events it has already acted on.
#[derive(Debug, Clone)]
pub struct FinishNotifier {
    guild_id: GuildId,
    generation: u64,
    events: UnboundedSender<PlaybackEvent>,
}

impl FinishNotifier {
    pub fn new(guild_id: GuildId, generation: u64, events: UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            guild_id,
            generation,
            events,
        }
    }

    pub fn notify(&self, outcome: PlaybackOutcome) {
        let event = PlaybackEvent::Finished {
            guild_id: self.guild_id,
            generation: self.generation,
            outcome,
        };
        if self.events.send(event).is_err() {
            debug!("Playback driver gone, dropping finish event for {}", self.guild_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMember {
    pub user_id: UserId,
    pub is_bot: bool,
}

/// Members that are not bots.
pub fn human_count(members: &[ChannelMember]) -> usize {
    members.iter().filter(|m| !m.is_bot).count()
}

/// An established voice connection in one guild.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Starts `stream`, replacing anything already playing.
    async fn play(&self, stream: StreamEndpoint, on_finished: FinishNotifier) -> Result<(), SinkError>;

    async fn pause(&self) -> Result<(), SinkError>;

    async fn resume(&self) -> Result<(), SinkError>;

    /// Stops the current stream. Its notifier still fires with `Finished`.
    async fn stop(&self);

    async fn disconnect(&self);

    /// Volume in `0.0..=1.0`; applies to the current and later streams.
    async fn set_volume(&self, volume: f32) -> Result<(), SinkError>;

    fn is_connected(&self) -> bool;

    fn is_playing(&self) -> bool;

    fn channel_id(&self) -> ChannelId;

    /// Everyone currently in the sink's voice channel, the bot included.
    fn channel_members(&self) -> Vec<ChannelMember>;
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, VoiceConnectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn counts_only_humans() {
        let members = [
            ChannelMember { user_id: UserId::new(1), is_bot: true },
            ChannelMember { user_id: UserId::new(2), is_bot: false },
            ChannelMember { user_id: UserId::new(3), is_bot: false },
        ];
        assert_eq!(human_count(&members), 2);
        assert_eq!(human_count(&members[..1]), 0);
    }

    #[tokio::test]
    async fn notifier_posts_tagged_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = FinishNotifier::new(GuildId::new(9), 4, tx);
        notifier.notify(PlaybackOutcome::Finished);

        assert_eq!(
            rx.recv().await,
            Some(PlaybackEvent::Finished {
                guild_id: GuildId::new(9),
                generation: 4,
                outcome: PlaybackOutcome::Finished,
            })
        );
    }
}
