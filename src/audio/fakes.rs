//! In-memory collaborators for controller scenario tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use super::{
    notify::{Notice, NotificationSink},
    voice::{ChannelMember, FinishNotifier, PlaybackOutcome, VoiceConnector, VoiceSink},
};
use crate::{
    error::{ResolveError, SearchError, SinkError, VoiceConnectError},
    sources::{StreamEndpoint, StreamResolver, Track, TrackSearch},
};

pub fn track(name: &str) -> Track {
    Track::new(name, format!("https://www.youtube.com/watch?v={}", name)).with_requested_by(UserId::new(42))
}

/// Lets every ready task run; paused-clock tests then observe a settled state.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
struct SinkState {
    connected: bool,
    now_playing: Option<(StreamEndpoint, FinishNotifier)>,
    paused: bool,
    played: Vec<String>,
    stops: usize,
    members: Vec<ChannelMember>,
    volume: Option<f32>,
}

pub struct FakeSink {
    channel_id: ChannelId,
    state: Mutex<SinkState>,
}

impl FakeSink {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            state: Mutex::new(SinkState {
                connected: true,
                members: vec![
                    ChannelMember { user_id: UserId::new(1), is_bot: true },
                    ChannelMember { user_id: UserId::new(42), is_bot: false },
                ],
                ..SinkState::default()
            }),
        }
    }

    /// Stream URLs in the order they were started.
    pub fn played(&self) -> Vec<String> {
        self.state.lock().played.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn volume(&self) -> Option<f32> {
        self.state.lock().volume
    }

    pub fn set_members(&self, members: Vec<ChannelMember>) {
        self.state.lock().members = members;
    }

    /// Ends the current stream as if it ran out or failed.
    pub fn finish(&self, outcome: PlaybackOutcome) {
        let playing = self.state.lock().now_playing.take();
        if let Some((_, notifier)) = playing {
            notifier.notify(outcome);
        }
    }
}

#[async_trait]
impl VoiceSink for FakeSink {
    async fn play(&self, stream: StreamEndpoint, on_finished: FinishNotifier) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(SinkError("not connected".into()));
        }
        state.played.push(stream.url.clone());
        state.paused = false;
        state.now_playing = Some((stream, on_finished));
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), SinkError> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn stop(&self) {
        let playing = {
            let mut state = self.state.lock();
            state.stops += 1;
            state.now_playing.take()
        };
        if let Some((_, notifier)) = playing {
            notifier.notify(PlaybackOutcome::Finished);
        }
    }

    async fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    async fn set_volume(&self, volume: f32) -> Result<(), SinkError> {
        self.state.lock().volume = Some(volume);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn is_playing(&self) -> bool {
        let state = self.state.lock();
        state.now_playing.is_some() && !state.paused
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn channel_members(&self) -> Vec<ChannelMember> {
        self.state.lock().members.clone()
    }
}

/// Hands out [`FakeSink`]s, optionally failing the first few attempts.
#[derive(Default)]
pub struct FakeConnector {
    failures: Mutex<VecDeque<VoiceConnectError>>,
    attempts: Mutex<usize>,
    sinks: Mutex<HashMap<GuildId, Arc<FakeSink>>>,
    hang: bool,
    delay: Option<Duration>,
}

impl FakeConnector {
    pub fn failing_with(errors: impl IntoIterator<Item = VoiceConnectError>) -> Self {
        Self {
            failures: Mutex::new(errors.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every connect attempt never completes.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Every connect attempt takes `delay` before succeeding.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn sink(&self, guild_id: GuildId) -> Arc<FakeSink> {
        self.sinks.lock()[&guild_id].clone()
    }
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, VoiceConnectError> {
        *self.attempts.lock() += 1;
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let sink = Arc::new(FakeSink::new(channel_id));
        self.sinks.lock().insert(guild_id, sink.clone());
        Ok(sink)
    }
}

/// Resolves `source_ref` to `stream:<source_ref>` unless told otherwise.
#[derive(Default)]
pub struct FakeResolver {
    failures: Mutex<HashMap<String, ResolveError>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn fail(&self, track: &Track, error: impl Into<ResolveError>) {
        self.failures.lock().insert(track.source_ref().to_string(), error.into());
    }

    pub fn delay(&self, track: &Track, delay: Duration) {
        self.delays.lock().insert(track.source_ref().to_string(), delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

pub fn stream_url(track: &Track) -> String {
    format!("stream:{}", track.source_ref())
}

#[async_trait]
impl StreamResolver for FakeResolver {
    async fn resolve(&self, track: &Track) -> Result<StreamEndpoint, ResolveError> {
        self.calls.lock().push(track.source_ref().to_string());
        let delay = self.delays.lock().get(track.source_ref()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().get(track.source_ref()) {
            return Err(*error);
        }
        Ok(StreamEndpoint {
            url: stream_url(track),
            approx_bitrate_kbps: Some(160),
            backend: "fake",
        })
    }
}

#[derive(Default)]
pub struct FakeSearch {
    results: Mutex<HashMap<String, Vec<Track>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn answer(&self, query: &str, results: Vec<Track>) {
        self.results.lock().insert(query.to_string(), results);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl TrackSearch for FakeSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        self.queries.lock().push(query.to_string());
        match self.results.lock().get(query) {
            Some(results) if !results.is_empty() => Ok(results.iter().take(limit).cloned().collect()),
            _ => Err(SearchError::NoResults),
        }
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(GuildId, Notice)>>,
}

impl FakeNotifier {
    pub fn notices(&self, guild_id: GuildId) -> Vec<Notice> {
        self.sent
            .lock()
            .iter()
            .filter(|(g, _)| *g == guild_id)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for FakeNotifier {
    async fn send(&self, guild_id: GuildId, notice: Notice) {
        self.sent.lock().push((guild_id, notice));
    }
}
