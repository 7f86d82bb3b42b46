use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    notify::{Notice, NotificationSink},
    queue::{GuildQueue, PlaybackState, QueueRegistry, QueueSnapshot},
    voice::{FinishNotifier, PlaybackEvent, PlaybackOutcome, VoiceConnector, VoiceSink},
};
use crate::{
    error::{PlaybackError, QueueStateError, ResolveError, TransientReason, VoiceConnectError},
    sources::{title::normalize_title, StreamResolver, Track, TrackSearch},
};

/// Timing and retry knobs for [`PlaybackController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_backoff_step: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub queue_eviction_ttl: Duration,
    /// Candidates requested when searching for a replacement upload.
    pub alternate_candidates: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(200),
            connect_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            connect_backoff_step: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            queue_eviction_ttl: Duration::from_secs(1800),
            alternate_candidates: 5,
        }
    }
}

impl ControllerSettings {
    /// Raises `resolve_timeout` to at least `budget`, the resolver's own
    /// worst case, so the outer bound never cuts its fallback chain short.
    pub fn covering_resolve_budget(mut self, budget: Duration) -> Self {
        if self.resolve_timeout < budget {
            warn!(
                "⏱️ Resolve timeout {:?} is shorter than the resolver budget {:?}, raising it",
                self.resolve_timeout, budget
            );
            self.resolve_timeout = budget;
        }
        self
    }
}

/// Where an enqueued track landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// Playback was idle and starts with this request.
    Started,
    /// 1-based position among pending tracks.
    Queued(usize),
}

/// How an advance picks its first track.
enum Advance {
    Next,
    SkipCurrent,
    Recover(Track, ResolveError),
}

enum Step {
    Play(Track),
    Done,
    Stale,
}

/// Per-guild playback state machine: connect, resolve, play, advance on finish.
///
/// Finish notifications arrive as [`PlaybackEvent`]s on a channel consumed by
/// [`PlaybackController::run`]. Every playback attempt is tagged with the
/// queue's generation; results and events from an older generation are dropped.
pub struct PlaybackController {
    registry: QueueRegistry,
    connections: DashMap<GuildId, Arc<dyn VoiceSink>>,
    notifiers: DashMap<GuildId, Arc<dyn NotificationSink>>,
    connector: Arc<dyn VoiceConnector>,
    search: Arc<dyn TrackSearch>,
    resolver: Arc<dyn StreamResolver>,
    settings: ControllerSettings,
    events: UnboundedSender<PlaybackEvent>,
}

impl PlaybackController {
    /// Builds the controller; hand the receiver to [`PlaybackController::run`].
    pub fn new(
        connector: Arc<dyn VoiceConnector>,
        search: Arc<dyn TrackSearch>,
        resolver: Arc<dyn StreamResolver>,
        settings: ControllerSettings,
    ) -> (Arc<Self>, UnboundedReceiver<PlaybackEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            registry: QueueRegistry::new(),
            connections: DashMap::new(),
            notifiers: DashMap::new(),
            connector,
            search,
            resolver,
            settings,
            events,
        });
        (controller, receiver)
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub(crate) fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// Driver loop: turns finish events into advances until shut down.
    pub async fn run(
        self: Arc<Self>,
        mut events: UnboundedReceiver<PlaybackEvent>,
        shutdown: CancellationToken,
    ) {
        info!("🎛️ Playback driver started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        info!("🎛️ Playback driver stopped");
    }

    fn handle_event(self: &Arc<Self>, event: PlaybackEvent) {
        let PlaybackEvent::Finished {
            guild_id,
            generation,
            outcome,
        } = event;
        let Some(queue) = self.registry.get(guild_id) else {
            return;
        };

        let claimed = {
            let mut q = queue.lock();
            let active = matches!(q.state(), PlaybackState::Playing | PlaybackState::Paused);
            if q.generation() != generation || !active {
                None
            } else {
                q.set_state(PlaybackState::Resolving);
                Some((q.bump_generation(), q.current().cloned()))
            }
        };
        let Some((generation, current)) = claimed else {
            debug!("Ignoring stale finish event in {}", guild_id);
            return;
        };

        let start = match (outcome, current) {
            (PlaybackOutcome::Failed(error), Some(track)) => Advance::Recover(track, error),
            _ => Advance::Next,
        };
        tokio::spawn(self.clone().advance(guild_id, generation, start));
    }

    /// Queues `track`; when the guild is idle, also connects and starts playback.
    pub async fn enqueue_and_maybe_play(
        self: &Arc<Self>,
        guild_id: GuildId,
        track: Track,
        channel_id: ChannelId,
        notify: Arc<dyn NotificationSink>,
    ) -> Result<QueuePosition, PlaybackError> {
        self.notifiers.insert(guild_id, notify);
        let queue = self.registry.get_or_create(guild_id);

        let (length, generation) = {
            let mut q = queue.lock();
            let length = q.enqueue(track);
            if q.state() != PlaybackState::Idle {
                return Ok(QueuePosition::Queued(length));
            }
            q.set_state(PlaybackState::Connecting);
            (length, q.bump_generation())
        };

        let sink = match self.ensure_connected(guild_id, channel_id).await {
            Ok(sink) => sink,
            Err(e) => {
                warn!("❌ Could not join voice in {}: {}", guild_id, e);
                let mut q = queue.lock();
                if q.generation() == generation {
                    q.set_state(PlaybackState::Idle);
                }
                return Err(e.into());
            }
        };

        let abandoned = {
            let mut q = queue.lock();
            if q.generation() == generation && q.state() == PlaybackState::Connecting {
                q.set_voice(Some(&sink));
                None
            } else {
                // Stopped or left mid-connect. A newer play may already be
                // using this connection; only an idle guild gives it up.
                let idle = q.state() == PlaybackState::Idle;
                Some(idle && self.connections.remove_if(&guild_id, |_, s| Arc::ptr_eq(s, &sink)).is_some())
            }
        };
        if let Some(release) = abandoned {
            info!("⏹️ Playback in {} was cancelled while connecting", guild_id);
            if release {
                sink.disconnect().await;
            }
            return Err(PlaybackError::Cancelled);
        }

        tokio::spawn(self.clone().advance(guild_id, generation, Advance::Next));
        Ok(if length == 1 {
            QueuePosition::Started
        } else {
            QueuePosition::Queued(length)
        })
    }

    /// Connects without queueing anything. Refuses to move while busy elsewhere.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        notify: Arc<dyn NotificationSink>,
    ) -> Result<(), PlaybackError> {
        self.notifiers.insert(guild_id, notify);
        let queue = self.registry.get_or_create(guild_id);

        if queue.lock().state() != PlaybackState::Idle {
            return match self.sink(guild_id) {
                Some(sink) if sink.channel_id() != channel_id => {
                    Err(VoiceConnectError::AlreadyConnectedElsewhere.into())
                }
                _ => Ok(()),
            };
        }

        let sink = self.ensure_connected(guild_id, channel_id).await?;
        queue.lock().set_voice(Some(&sink));
        Ok(())
    }

    /// Skips the current track. Returns false when nothing is playing.
    pub async fn skip(self: &Arc<Self>, guild_id: GuildId) -> bool {
        let Some(queue) = self.registry.get(guild_id) else {
            return false;
        };

        let (generation, previous) = {
            let mut q = queue.lock();
            let previous = q.state();
            if !previous.has_current() {
                return false;
            }
            q.set_state(PlaybackState::Resolving);
            (q.bump_generation(), previous)
        };

        // The stopped stream's finish event carries the old generation and is dropped
        if previous != PlaybackState::Resolving {
            if let Some(sink) = self.sink(guild_id) {
                sink.stop().await;
            }
        }

        info!("⏭️ Skipped in {}", guild_id);
        tokio::spawn(self.clone().advance(guild_id, generation, Advance::SkipCurrent));
        true
    }

    /// Stops audio, clears the queue and disconnects. Returns false if there
    /// was nothing to stop.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        let had_tracks = match self.registry.get(guild_id) {
            Some(queue) => {
                let mut q = queue.lock();
                let had_tracks = !q.is_empty();
                q.clear();
                q.bump_generation();
                q.set_voice(None);
                had_tracks
            }
            None => false,
        };

        let sink = self.connections.remove(&guild_id).map(|(_, sink)| sink);
        if let Some(sink) = &sink {
            sink.stop().await;
            sink.disconnect().await;
        }

        info!("⏹️ Stopped playback in {}", guild_id);
        had_tracks || sink.is_some()
    }

    /// Disconnects but keeps the queue; the current track goes back to the front.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        if let Some(queue) = self.registry.get(guild_id) {
            let mut q = queue.lock();
            q.requeue_current();
            q.bump_generation();
            q.set_voice(None);
        }

        match self.connections.remove(&guild_id) {
            Some((_, sink)) => {
                sink.stop().await;
                sink.disconnect().await;
                info!("👋 Left voice in {}", guild_id);
                true
            }
            None => false,
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        let queue = self
            .registry
            .get(guild_id)
            .ok_or(QueueStateError::NothingPlaying)?;
        let generation = {
            let q = queue.lock();
            match q.state() {
                PlaybackState::Playing => q.generation(),
                PlaybackState::Paused => return Ok(()),
                _ => return Err(QueueStateError::NothingPlaying.into()),
            }
        };
        let sink = self.sink(guild_id).ok_or(QueueStateError::NothingPlaying)?;
        sink.pause().await?;

        let mut q = queue.lock();
        if q.generation() == generation && q.state() == PlaybackState::Playing {
            q.set_state(PlaybackState::Paused);
            info!("⏸️ Paused in {}", guild_id);
        }
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        let queue = self
            .registry
            .get(guild_id)
            .ok_or(QueueStateError::NothingPlaying)?;
        let generation = {
            let q = queue.lock();
            match q.state() {
                PlaybackState::Paused => q.generation(),
                PlaybackState::Playing => return Err(QueueStateError::NotPaused.into()),
                _ => return Err(QueueStateError::NothingPlaying.into()),
            }
        };
        let sink = self.sink(guild_id).ok_or(QueueStateError::NothingPlaying)?;
        sink.resume().await?;

        let mut q = queue.lock();
        if q.generation() == generation && q.state() == PlaybackState::Paused {
            q.set_state(PlaybackState::Playing);
            info!("▶️ Resumed in {}", guild_id);
        }
        Ok(())
    }

    /// Sets the volume in percent, clamped to 0..=100.
    pub async fn set_volume(&self, guild_id: GuildId, percent: u8) -> Result<u8, PlaybackError> {
        let percent = percent.min(100);
        let sink = self.sink(guild_id).ok_or(QueueStateError::NothingPlaying)?;
        sink.set_volume(f32::from(percent) / 100.0).await?;
        info!("🔊 Volume in {} set to {}%", guild_id, percent);
        Ok(percent)
    }

    /// Removes pending tracks; the current one keeps playing.
    pub fn clear_pending(&self, guild_id: GuildId) -> Result<usize, PlaybackError> {
        let queue = self
            .registry
            .get(guild_id)
            .ok_or(QueueStateError::QueueEmpty)?;
        let removed = queue.lock().clear_pending();
        match removed {
            0 => Err(QueueStateError::QueueEmpty.into()),
            removed => Ok(removed),
        }
    }

    pub fn toggle_loop(&self, guild_id: GuildId) -> bool {
        self.registry.get_or_create(guild_id).lock().toggle_loop()
    }

    pub fn queue_snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        self.registry
            .get(guild_id)
            .map(|queue| queue.lock().snapshot())
            .unwrap_or_else(QueueSnapshot::empty)
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        let queue = self.registry.get(guild_id)?;
        let q = queue.lock();
        q.current().cloned()
    }

    /// Connected guilds and their sinks.
    pub(crate) fn connections(&self) -> Vec<(GuildId, Arc<dyn VoiceSink>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub(crate) async fn notify(&self, guild_id: GuildId, notice: Notice) {
        let sink = self.notifiers.get(&guild_id).map(|n| n.value().clone());
        if let Some(sink) = sink {
            sink.send(guild_id, notice).await;
        }
    }

    fn sink(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSink>> {
        self.connections.get(&guild_id).map(|s| s.value().clone())
    }

    fn is_current(&self, guild_id: GuildId, generation: u64) -> bool {
        self.registry
            .get(guild_id)
            .is_some_and(|queue| queue.lock().generation() == generation)
    }

    /// Applies `pick` to the queue if `generation` is still current.
    fn step(
        &self,
        guild_id: GuildId,
        generation: u64,
        pick: impl FnOnce(&mut GuildQueue) -> Option<Track>,
    ) -> Step {
        let Some(queue) = self.registry.get(guild_id) else {
            return Step::Stale;
        };
        let mut q = queue.lock();
        if q.generation() != generation {
            return Step::Stale;
        }
        match pick(&mut *q) {
            Some(track) => Step::Play(track),
            None => Step::Done,
        }
    }

    async fn ensure_connected(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, VoiceConnectError> {
        if let Some(sink) = self.sink(guild_id) {
            if sink.is_connected() && sink.channel_id() == channel_id {
                return Ok(sink);
            }
            debug!("Dropping old voice connection in {}", guild_id);
            self.connections.remove(&guild_id);
            sink.disconnect().await;
        }

        let sink = self.connect_with_retry(guild_id, channel_id).await?;
        self.connections.insert(guild_id, sink.clone());
        Ok(sink)
    }

    async fn connect_with_retry(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, VoiceConnectError> {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(
                self.settings.connect_timeout,
                self.connector.connect(guild_id, channel_id),
            )
            .await
            .unwrap_or(Err(VoiceConnectError::Timeout));

            match result {
                Ok(sink) => {
                    info!("🔊 Connected to voice channel {} in {}", channel_id, guild_id);
                    return Ok(sink);
                }
                Err(e) if e.is_retryable() && attempt < self.settings.connect_attempts => {
                    let delay = self.settings.connect_backoff_step * attempt;
                    warn!(
                        "🔄 Voice connect attempt {}/{} in {} failed: {}, retrying in {:?}",
                        attempt, self.settings.connect_attempts, guild_id, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Plays the next playable track, working through failures, until
    /// something plays, the queue runs out, or the generation goes stale.
    async fn advance(self: Arc<Self>, guild_id: GuildId, generation: u64, start: Advance) {
        let mut substitute: Option<String> = None;
        let mut step = match start {
            Advance::Next => self.step(guild_id, generation, GuildQueue::dequeue_next),
            Advance::SkipCurrent => self.step(guild_id, generation, GuildQueue::skip_current),
            Advance::Recover(track, error) => {
                self.recover(guild_id, generation, track, error, &mut substitute)
                    .await
            }
        };

        loop {
            let track = match step {
                Step::Play(track) => track,
                Step::Done => {
                    info!("📭 Queue finished in {}", guild_id);
                    self.notify(guild_id, Notice::QueueFinished).await;
                    return;
                }
                Step::Stale => return,
            };

            match self.start_track(guild_id, generation, &track).await {
                Ok(()) => return,
                Err(error) => {
                    step = self
                        .recover(guild_id, generation, track, error, &mut substitute)
                        .await;
                }
            }
        }
    }

    /// Resolves and starts `track`. `Ok` covers both "playing" and "superseded".
    async fn start_track(
        &self,
        guild_id: GuildId,
        generation: u64,
        track: &Track,
    ) -> Result<(), ResolveError> {
        debug!("🎯 Resolving '{}' in {}", track.title(), guild_id);
        let resolved = tokio::time::timeout(self.settings.resolve_timeout, self.resolver.resolve(track))
            .await
            .unwrap_or_else(|_| {
                warn!("⏱️ Resolving '{}' timed out", track.title());
                Err(TransientReason::Timeout.into())
            });

        if !self.is_current(guild_id, generation) {
            debug!("Discarding stale resolve of '{}' in {}", track.title(), guild_id);
            return Ok(());
        }
        let endpoint = resolved?;

        let Some(sink) = self.sink(guild_id) else {
            warn!("🔌 No voice connection in {}, keeping '{}' queued", guild_id, track.title());
            if let Some(queue) = self.registry.get(guild_id) {
                let mut q = queue.lock();
                if q.generation() == generation {
                    q.requeue_current();
                }
            }
            return Ok(());
        };

        let notifier = FinishNotifier::new(guild_id, generation, self.events.clone());
        if let Err(e) = sink.play(endpoint, notifier).await {
            warn!("❌ Voice sink refused '{}': {}", track.title(), e);
            return Err(TransientReason::BackendError.into());
        }

        let still_current = match self.registry.get(guild_id) {
            Some(queue) => {
                let mut q = queue.lock();
                let current = q.generation() == generation;
                if current {
                    q.set_state(PlaybackState::Playing);
                }
                current
            }
            None => false,
        };
        if !still_current {
            sink.stop().await;
            return Ok(());
        }

        info!("🎵 Now playing in {}: {}", guild_id, track.title());
        self.notify(guild_id, Notice::NowPlaying(track.clone())).await;
        Ok(())
    }

    /// Handles a failed track: one same-title substitution for unplayable
    /// tracks, otherwise drop it and move on.
    async fn recover(
        &self,
        guild_id: GuildId,
        generation: u64,
        track: Track,
        error: ResolveError,
        substitute: &mut Option<String>,
    ) -> Step {
        if !self.is_current(guild_id, generation) {
            return Step::Stale;
        }
        warn!("⚠️ '{}' failed in {}: {}", track.title(), guild_id, error);

        let is_substitute = substitute.as_deref() == Some(track.source_ref());
        if error.is_unplayable() && !is_substitute {
            if let Some(alternate) = self.find_alternate(&track).await {
                let step = self.step(guild_id, generation, |q| {
                    q.push_front(alternate.clone());
                    q.skip_current()
                });
                if matches!(step, Step::Play(_)) {
                    info!("🔄 Replacing '{}' with '{}'", track.title(), alternate.title());
                    *substitute = Some(alternate.source_ref().to_string());
                    self.notify(
                        guild_id,
                        Notice::Substituted {
                            original: track,
                            substitute: alternate,
                        },
                    )
                    .await;
                }
                return step;
            }
        }

        let step = self.step(guild_id, generation, GuildQueue::skip_current);
        if !matches!(step, Step::Stale) {
            self.notify(guild_id, Notice::Dropped { track, error }).await;
        }
        step
    }

    /// Searches the normalized title for a different upload of the same song.
    async fn find_alternate(&self, track: &Track) -> Option<Track> {
        let query = normalize_title(track.title());
        if query.is_empty() {
            return None;
        }

        let search = self.search.search(&query, self.settings.alternate_candidates);
        let candidates = match tokio::time::timeout(self.settings.resolve_timeout, search).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                debug!("No alternate for '{}': {}", track.title(), e);
                return None;
            }
            Err(_) => {
                debug!("Alternate search for '{}' timed out", track.title());
                return None;
            }
        };

        let alternate = candidates.into_iter().find(|c| !same_source(c, track))?;
        Some(match track.requested_by() {
            Some(user) => alternate.with_requested_by(user),
            None => alternate,
        })
    }
}

fn same_source(a: &Track, b: &Track) -> bool {
    match (a.video_id(), b.video_id()) {
        (Some(x), Some(y)) => x == y,
        _ => a.source_ref() == b.source_ref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::fakes::{settle, stream_url, track, FakeConnector, FakeNotifier, FakeResolver, FakeSearch, FakeSink},
        error::UnplayableReason,
        sources::{AudioFormat, AudioResolver, ExtractionBackend, FormatKind, MockExtractionBackend, RetryPolicy},
    };
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);

    struct Harness {
        controller: Arc<PlaybackController>,
        connector: Arc<FakeConnector>,
        resolver: Arc<FakeResolver>,
        search: Arc<FakeSearch>,
        notifier: Arc<FakeNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_connector(FakeConnector::default())
        }

        fn with_connector(connector: FakeConnector) -> Self {
            let connector = Arc::new(connector);
            let resolver = Arc::new(FakeResolver::default());
            let search = Arc::new(FakeSearch::default());
            let (controller, events) = PlaybackController::new(
                connector.clone(),
                search.clone(),
                resolver.clone(),
                ControllerSettings::default(),
            );
            tokio::spawn(controller.clone().run(events, CancellationToken::new()));
            Self {
                controller,
                connector,
                resolver,
                search,
                notifier: Arc::new(FakeNotifier::default()),
            }
        }

        async fn play_in(&self, guild_id: GuildId, track: &Track) -> Result<QueuePosition, PlaybackError> {
            self.controller
                .enqueue_and_maybe_play(guild_id, track.clone(), ChannelId::new(500), self.notifier.clone())
                .await
        }

        async fn play(&self, track: &Track) -> Result<QueuePosition, PlaybackError> {
            self.play_in(GUILD, track).await
        }

        fn sink(&self) -> Arc<FakeSink> {
            self.connector.sink(GUILD)
        }

        fn state(&self) -> PlaybackState {
            self.controller.queue_snapshot(GUILD).state
        }

        fn played(&self) -> Vec<String> {
            self.sink().played()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plays_in_order_and_goes_idle() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));

        assert_eq!(h.play(&a).await, Ok(QueuePosition::Started));
        settle().await;
        assert_eq!(h.play(&b).await, Ok(QueuePosition::Queued(1)));
        assert_eq!(h.state(), PlaybackState::Playing);
        assert_eq!(h.played(), vec![stream_url(&a)]);

        h.sink().finish(PlaybackOutcome::Finished);
        settle().await;
        assert_eq!(h.played(), vec![stream_url(&a), stream_url(&b)]);

        h.sink().finish(PlaybackOutcome::Finished);
        settle().await;
        assert_eq!(h.state(), PlaybackState::Idle);
        assert_eq!(h.controller.now_playing(GUILD), None);
        assert_eq!(
            h.notifier.notices(GUILD),
            vec![Notice::NowPlaying(a), Notice::NowPlaying(b), Notice::QueueFinished]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drm_track_is_replaced_by_same_title_upload() {
        let h = Harness::new();
        let original = Track::new("Song (Official Video)", "https://www.youtube.com/watch?v=original");
        let alternate = Track::new("Song", "https://www.youtube.com/watch?v=alternate");
        h.resolver.fail(&original, UnplayableReason::DrmProtected);
        h.search.answer("Song", vec![original.clone(), alternate.clone()]);

        h.play(&original).await.unwrap();
        settle().await;

        assert_eq!(h.search.queries(), vec!["Song".to_string()]);
        assert_eq!(h.played(), vec![stream_url(&alternate)]);
        assert_eq!(h.controller.now_playing(GUILD), Some(alternate.clone()));
        assert_eq!(
            h.notifier.notices(GUILD),
            vec![
                Notice::Substituted {
                    original,
                    substitute: alternate.clone()
                },
                Notice::NowPlaying(alternate),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unplayable_substitute_is_dropped_without_searching_again() {
        let h = Harness::new();
        let original = track("Song");
        let alternate = track("Song2");
        let next = track("next");
        h.resolver.fail(&original, UnplayableReason::RegionBlocked);
        h.resolver.fail(&alternate, UnplayableReason::RegionBlocked);
        h.search.answer("Song", vec![alternate.clone()]);

        h.play(&original).await.unwrap();
        h.play(&next).await.unwrap();
        settle().await;

        assert_eq!(h.search.queries().len(), 1);
        assert_eq!(h.played(), vec![stream_url(&next)]);
        assert!(h.notifier.notices(GUILD).contains(&Notice::Dropped {
            track: alternate,
            error: UnplayableReason::RegionBlocked.into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_drops_track_and_continues() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));
        h.resolver.fail(&a, TransientReason::RateLimited);

        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        settle().await;

        assert!(h.search.queries().is_empty());
        assert_eq!(h.played(), vec![stream_url(&b)]);
        assert_eq!(h.controller.queue_snapshot(GUILD).pending, Vec::<Track>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolve_times_out() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));
        h.resolver.delay(&a, Duration::from_secs(300));

        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        tokio::time::sleep(Duration::from_secs(201)).await;

        assert_eq!(h.played(), vec![stream_url(&b)]);
        assert!(h.notifier.notices(GUILD).contains(&Notice::Dropped {
            track: a,
            error: TransientReason::Timeout.into(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_advances_exactly_once() {
        let h = Harness::new();
        let (a, b, c) = (track("a"), track("b"), track("c"));
        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        h.play(&c).await.unwrap();
        settle().await;

        assert!(h.controller.skip(GUILD).await);
        settle().await;

        assert_eq!(h.played(), vec![stream_url(&a), stream_url(&b)]);
        assert_eq!(h.controller.queue_snapshot(GUILD).pending, vec![c]);
        assert_eq!(h.state(), PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_with_nothing_playing_is_a_no_op() {
        let h = Harness::new();
        assert!(!h.controller.skip(GUILD).await);

        h.play(&track("a")).await.unwrap();
        settle().await;
        h.sink().finish(PlaybackOutcome::Finished);
        settle().await;

        assert_eq!(h.state(), PlaybackState::Idle);
        assert!(!h.controller.skip(GUILD).await);
        assert_eq!(h.sink().stops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_while_resolving_discards_the_slow_result() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));
        h.resolver.delay(&a, Duration::from_secs(10));

        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        settle().await;
        assert_eq!(h.state(), PlaybackState::Resolving);

        assert!(h.controller.skip(GUILD).await);
        settle().await;
        assert_eq!(h.played(), vec![stream_url(&b)]);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.played(), vec![stream_url(&b)]);
        assert_eq!(h.controller.now_playing(GUILD), Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_and_discards_in_flight_resolve() {
        let h = Harness::new();
        let a = track("a");
        h.resolver.delay(&a, Duration::from_secs(10));

        h.play(&a).await.unwrap();
        h.play(&track("b")).await.unwrap();
        settle().await;

        assert!(h.controller.stop(GUILD).await);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(h.played().is_empty());
        assert!(!h.sink().is_connected());
        assert_eq!(h.controller.queue_snapshot(GUILD), QueueSnapshot::empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_repeats_until_track_fails() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));
        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        settle().await;
        assert!(h.controller.toggle_loop(GUILD));

        h.sink().finish(PlaybackOutcome::Finished);
        settle().await;
        assert_eq!(h.played(), vec![stream_url(&a), stream_url(&a)]);

        // No alternate is found, so the looped track is dropped instead of retried forever
        h.sink()
            .finish(PlaybackOutcome::Failed(UnplayableReason::Deleted.into()));
        settle().await;
        assert_eq!(h.played(), vec![stream_url(&a), stream_url(&a), stream_url(&b)]);
        assert_eq!(h.search.queries(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_keeps_the_queue() {
        let h = Harness::new();
        let (a, b) = (track("a"), track("b"));
        h.play(&a).await.unwrap();
        h.play(&b).await.unwrap();
        settle().await;

        assert!(h.controller.leave(GUILD).await);
        settle().await;

        let snapshot = h.controller.queue_snapshot(GUILD);
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current, None);
        assert_eq!(snapshot.pending, vec![a, b]);
        assert!(!h.sink().is_connected());
        assert!(!h.controller.leave(GUILD).await);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeouts_are_retried() {
        let h = Harness::with_connector(FakeConnector::failing_with([
            VoiceConnectError::Timeout,
            VoiceConnectError::Timeout,
        ]));

        assert_eq!(h.play(&track("a")).await, Ok(QueuePosition::Started));
        assert_eq!(h.connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_not_retried() {
        let h = Harness::with_connector(FakeConnector::failing_with([VoiceConnectError::PermissionDenied]));

        assert_eq!(
            h.play(&track("a")).await,
            Err(PlaybackError::Connect(VoiceConnectError::PermissionDenied))
        );
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(h.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_connect_gives_up() {
        let h = Harness::with_connector(FakeConnector::hanging());

        assert_eq!(
            h.play(&track("a")).await,
            Err(PlaybackError::Connect(VoiceConnectError::Timeout))
        );
        assert_eq!(h.connector.attempts(), 3);
        assert_eq!(h.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_connecting_releases_the_connection() {
        let h = Harness::with_connector(FakeConnector::slow(Duration::from_secs(5)));
        let (controller, notifier) = (h.controller.clone(), h.notifier.clone());
        let play = tokio::spawn(async move {
            controller
                .enqueue_and_maybe_play(GUILD, track("a"), ChannelId::new(500), notifier)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.state(), PlaybackState::Connecting);
        assert!(h.controller.stop(GUILD).await);

        assert_eq!(play.await.unwrap(), Err(PlaybackError::Cancelled));
        assert!(!h.sink().is_connected());
        assert!(h.played().is_empty());
        assert!(h.controller.sink(GUILD).is_none());
        assert_eq!(h.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_while_connecting_keeps_the_queue() {
        let h = Harness::with_connector(FakeConnector::slow(Duration::from_secs(5)));
        let a = track("a");
        let (controller, notifier, queued) = (h.controller.clone(), h.notifier.clone(), a.clone());
        let play = tokio::spawn(async move {
            controller
                .enqueue_and_maybe_play(GUILD, queued, ChannelId::new(500), notifier)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.controller.leave(GUILD).await);

        assert_eq!(play.await.unwrap(), Err(PlaybackError::Cancelled));
        assert!(!h.sink().is_connected());
        assert!(h.controller.sink(GUILD).is_none());
        let snapshot = h.controller.queue_snapshot(GUILD);
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.pending, vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_play_survives_a_cancelled_connect() {
        let h = Harness::with_connector(FakeConnector::slow(Duration::from_secs(5)));
        let b = track("b");
        let (controller, notifier) = (h.controller.clone(), h.notifier.clone());
        let first = tokio::spawn(async move {
            controller
                .enqueue_and_maybe_play(GUILD, track("a"), ChannelId::new(500), notifier)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.controller.stop(GUILD).await;
        let (controller, notifier, queued) = (h.controller.clone(), h.notifier.clone(), b.clone());
        let second = tokio::spawn(async move {
            controller
                .enqueue_and_maybe_play(GUILD, queued, ChannelId::new(500), notifier)
                .await
        });

        assert_eq!(first.await.unwrap(), Err(PlaybackError::Cancelled));
        assert_eq!(second.await.unwrap(), Ok(QueuePosition::Started));
        settle().await;

        assert!(h.sink().is_connected());
        assert_eq!(h.played(), vec![stream_url(&b)]);
        assert_eq!(h.state(), PlaybackState::Playing);
    }

    /// Stands in for yt-dlp stalling until its own process timeout.
    struct StallingExtraction;

    #[async_trait::async_trait]
    impl ExtractionBackend for StallingExtraction {
        fn name(&self) -> &'static str {
            "ytdlp"
        }

        fn supports(&self, _track: &Track) -> bool {
            true
        }

        async fn extract(&self, _track: &Track) -> Result<Vec<AudioFormat>, ResolveError> {
            tokio::time::sleep(Duration::from_secs(45)).await;
            Err(TransientReason::Timeout.into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_extractor_falls_back_to_the_next_backend() {
        let mut invidious = MockExtractionBackend::new();
        invidious.expect_name().return_const("invidious");
        invidious.expect_supports().return_const(true);
        invidious
            .expect_extract()
            .times(1)
            .returning(|_| Ok(vec![AudioFormat::new("https://invidious/stream", FormatKind::AudioOnly, Some(160))]));
        let resolver = AudioResolver::new(RetryPolicy::default())
            .with_backend(Arc::new(StallingExtraction))
            .with_backend(Arc::new(invidious));
        let settings = ControllerSettings::default().covering_resolve_budget(resolver.budget());

        let connector = Arc::new(FakeConnector::default());
        let (controller, events) = PlaybackController::new(
            connector.clone(),
            Arc::new(FakeSearch::default()),
            Arc::new(resolver),
            settings,
        );
        tokio::spawn(controller.clone().run(events, CancellationToken::new()));
        let notifier = Arc::new(FakeNotifier::default());
        let a = track("a");

        controller
            .enqueue_and_maybe_play(GUILD, a.clone(), ChannelId::new(500), notifier.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(70)).await;

        assert_eq!(connector.sink(GUILD).played(), vec!["https://invidious/stream".to_string()]);
        assert_eq!(notifier.notices(GUILD), vec![Notice::NowPlaying(a)]);
    }

    #[test]
    fn resolve_timeout_is_raised_to_the_resolver_budget() {
        let short = ControllerSettings {
            resolve_timeout: Duration::from_secs(60),
            ..ControllerSettings::default()
        };
        let raised = short.covering_resolve_budget(Duration::from_secs(189));
        assert_eq!(raised.resolve_timeout, Duration::from_secs(189));

        let kept = ControllerSettings::default().covering_resolve_budget(Duration::from_secs(63));
        assert_eq!(kept, ControllerSettings::default());
    }

    #[tokio::test(start_paused = true)]
    async fn guilds_do_not_interfere() {
        let h = Harness::new();
        let other = GuildId::new(2);
        let (a, b, x, y) = (track("a"), track("b"), track("x"), track("y"));

        h.play_in(GUILD, &a).await.unwrap();
        h.play_in(other, &x).await.unwrap();
        h.play_in(GUILD, &b).await.unwrap();
        h.play_in(other, &y).await.unwrap();
        settle().await;

        h.connector.sink(GUILD).finish(PlaybackOutcome::Finished);
        settle().await;

        assert_eq!(h.connector.sink(GUILD).played(), vec![stream_url(&a), stream_url(&b)]);
        assert_eq!(h.connector.sink(other).played(), vec![stream_url(&x)]);
        assert_eq!(h.controller.queue_snapshot(other).pending, vec![y]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume() {
        let h = Harness::new();
        assert_eq!(
            h.controller.pause(GUILD).await,
            Err(QueueStateError::NothingPlaying.into())
        );

        h.play(&track("a")).await.unwrap();
        settle().await;
        assert_eq!(h.controller.resume(GUILD).await, Err(QueueStateError::NotPaused.into()));

        h.controller.pause(GUILD).await.unwrap();
        assert_eq!(h.state(), PlaybackState::Paused);
        assert!(!h.sink().is_playing());

        h.controller.resume(GUILD).await.unwrap();
        assert_eq!(h.state(), PlaybackState::Playing);
        assert!(h.sink().is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_clamped() {
        let h = Harness::new();
        assert_eq!(
            h.controller.set_volume(GUILD, 50).await,
            Err(QueueStateError::NothingPlaying.into())
        );

        h.play(&track("a")).await.unwrap();
        assert_eq!(h.controller.set_volume(GUILD, 150).await, Ok(100));
        assert_eq!(h.sink().volume(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_pending_keeps_current_track() {
        let h = Harness::new();
        let a = track("a");
        h.play(&a).await.unwrap();
        h.play(&track("b")).await.unwrap();
        h.play(&track("c")).await.unwrap();
        settle().await;

        assert_eq!(h.controller.clear_pending(GUILD), Ok(2));
        assert_eq!(h.controller.clear_pending(GUILD), Err(QueueStateError::QueueEmpty.into()));
        assert_eq!(h.controller.now_playing(GUILD), Some(a));
    }
}
