//! Songbird-backed [`VoiceConnector`] and [`VoiceSink`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    error::JoinError,
    input::HttpRequest,
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::voice::{ChannelMember, FinishNotifier, PlaybackOutcome, VoiceConnector, VoiceSink},
    error::{ResolveError, SinkError, TransientReason, VoiceConnectError},
    sources::StreamEndpoint,
};

/// Volume new connections start at.
const DEFAULT_VOLUME: f32 = 0.5;

/// Joins voice channels through songbird.
///
/// The serenity cache only exists once the client is built, after the
/// controller; it is attached with [`SongbirdConnector::attach_cache`].
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    cache: OnceLock<Arc<Cache>>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self {
            manager,
            http,
            cache: OnceLock::new(),
        }
    }

    pub fn attach_cache(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            debug!("Voice connector cache already attached");
        }
    }

    /// Whether the bot may connect and speak in `channel_id`. Unknown
    /// guilds or channels are let through; songbird reports the failure.
    fn can_join(cache: &Cache, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let bot_id = cache.current_user().id;
        let Some(guild) = cache.guild(guild_id) else {
            return true;
        };
        let (Some(channel), Some(member)) = (guild.channels.get(&channel_id), guild.members.get(&bot_id))
        else {
            return true;
        };
        let permissions = guild.user_permissions_in(channel, member);
        permissions.connect() && permissions.speak()
    }
}

fn map_join_error(error: &JoinError) -> VoiceConnectError {
    match error {
        JoinError::TimedOut | JoinError::Dropped => VoiceConnectError::Timeout,
        _ => VoiceConnectError::PermissionDenied,
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, VoiceConnectError> {
        let Some(cache) = self.cache.get().cloned() else {
            error!("❌ Voice connect before the cache was attached");
            return Err(VoiceConnectError::Timeout);
        };

        if !Self::can_join(&cache, guild_id, channel_id) {
            warn!("🔒 Missing connect/speak permission for {} in {}", channel_id, guild_id);
            return Err(VoiceConnectError::PermissionDenied);
        }

        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            warn!("❌ Voice join in {} failed: {}", guild_id, e);
            map_join_error(&e)
        })?;

        info!("🔊 Connected to voice channel {} in {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdSink {
            guild_id,
            channel_id,
            call,
            manager: self.manager.clone(),
            http: self.http.clone(),
            cache,
            current: Mutex::new(None),
            volume: Mutex::new(DEFAULT_VOLUME),
            paused: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }))
    }
}

/// One guild's songbird call.
pub struct SongbirdSink {
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
    cache: Arc<Cache>,
    current: Mutex<Option<TrackHandle>>,
    volume: Mutex<f32>,
    paused: AtomicBool,
    connected: AtomicBool,
}

impl SongbirdSink {
    fn current(&self) -> Result<TrackHandle, SinkError> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| SinkError("no track loaded".into()))
    }
}

/// Forwards songbird track events to the controller.
struct FinishForwarder {
    notifier: FinishNotifier,
    outcome: PlaybackOutcome,
}

#[async_trait]
impl VoiceEventHandler for FinishForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.notifier.notify(self.outcome);
        None
    }
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    async fn play(&self, stream: StreamEndpoint, on_finished: FinishNotifier) -> Result<(), SinkError> {
        let input = HttpRequest::new(self.http.clone(), stream.url);
        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input.into())
        };

        let sink_error = |e: songbird::tracks::ControlError| SinkError(e.to_string());
        handle.set_volume(*self.volume.lock()).map_err(sink_error)?;
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                FinishForwarder {
                    notifier: on_finished.clone(),
                    outcome: PlaybackOutcome::Finished,
                },
            )
            .map_err(sink_error)?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                FinishForwarder {
                    notifier: on_finished,
                    outcome: PlaybackOutcome::Failed(ResolveError::Transient(TransientReason::BackendError)),
                },
            )
            .map_err(sink_error)?;

        debug!("🎶 Streaming from {} in {}", stream.backend, self.guild_id);
        *self.current.lock() = Some(handle);
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        self.current()?.pause().map_err(|e| SinkError(e.to_string()))?;
        self.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn resume(&self) -> Result<(), SinkError> {
        self.current()?.play().map_err(|e| SinkError(e.to_string()))?;
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop() {
                debug!("Track in {} already ended: {}", self.guild_id, e);
            }
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Voice call in {} already gone: {}", self.guild_id, e);
        }
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError> {
        *self.volume.lock() = volume;
        let handle = self.current.lock().clone();
        if let Some(handle) = handle {
            handle.set_volume(volume).map_err(|e| SinkError(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Relaxed) {
            return false;
        }
        // A busy lock means the call is in use, hence still alive
        self.call
            .try_lock()
            .map_or(true, |call| call.current_connection().is_some())
    }

    fn is_playing(&self) -> bool {
        self.current.lock().is_some() && !self.paused.load(Ordering::Relaxed)
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn channel_members(&self) -> Vec<ChannelMember> {
        let Some(guild) = self.cache.guild(self.guild_id) else {
            return Vec::new();
        };
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(self.channel_id))
            .map(|state| {
                let is_bot = state
                    .member
                    .as_ref()
                    .map(|member| member.user.bot)
                    .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                    .unwrap_or(false);
                ChannelMember {
                    user_id: state.user_id,
                    is_bot,
                }
            })
            .collect()
    }
}
