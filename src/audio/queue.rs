use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info};

use super::voice::VoiceSink;
use crate::sources::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Connecting,
    /// A dequeued track is being turned into a stream; `current` is already set.
    Resolving,
    Playing,
    Paused,
}

impl PlaybackState {
    /// States in which the queue holds a current track.
    pub fn has_current(self) -> bool {
        matches!(self, Self::Resolving | Self::Playing | Self::Paused)
    }
}

/// Point-in-time copy of a guild's queue for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub loop_enabled: bool,
    pub state: PlaybackState,
}

impl QueueSnapshot {
    pub fn empty() -> Self {
        Self {
            current: None,
            pending: Vec::new(),
            loop_enabled: false,
            state: PlaybackState::Idle,
        }
    }

    pub fn total_duration_secs(&self) -> u64 {
        self.pending.iter().filter_map(Track::duration_secs).sum()
    }
}

/// Per-guild playback queue. Plain data: every method is synchronous and the
/// owner wraps it in a mutex that is never held across an await.
///
/// `current` is set exactly while the state is Resolving, Playing or Paused;
/// `dequeue_next` and `skip_current` move the state accordingly.
pub struct GuildQueue {
    guild_id: GuildId,
    pending: VecDeque<Track>,
    current: Option<Track>,
    loop_enabled: bool,
    state: PlaybackState,
    voice: Option<Weak<dyn VoiceSink>>,
    last_activity: Instant,
    generation: u64,
}

impl GuildQueue {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            pending: VecDeque::new(),
            current: None,
            loop_enabled: false,
            state: PlaybackState::Idle,
            voice: None,
            last_activity: Instant::now(),
            generation: 0,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Appends to the back of the queue and returns the new pending length.
    pub fn enqueue(&mut self, track: Track) -> usize {
        info!("➕ Queued in {}: {}", self.guild_id, track.title());
        self.pending.push_back(track);
        self.touch();
        self.pending.len()
    }

    /// Puts a track in front of everything else pending.
    pub fn push_front(&mut self, track: Track) {
        self.pending.push_front(track);
        self.touch();
    }

    /// Next track to play. With loop enabled the current track repeats;
    /// otherwise the head of the queue becomes current.
    pub fn dequeue_next(&mut self) -> Option<Track> {
        if self.loop_enabled {
            if let Some(current) = self.current.clone() {
                debug!("🔂 Repeating: {}", current.title());
                self.state = PlaybackState::Resolving;
                self.touch();
                return Some(current);
            }
        }
        self.take_front()
    }

    /// Abandons the current track regardless of loop mode and moves on.
    pub fn skip_current(&mut self) -> Option<Track> {
        self.current = None;
        self.take_front()
    }

    fn take_front(&mut self) -> Option<Track> {
        self.current = self.pending.pop_front();
        self.state = if self.current.is_some() {
            PlaybackState::Resolving
        } else {
            PlaybackState::Idle
        };
        self.touch();
        self.current.clone()
    }

    /// Empties the queue, forgets the current track, disables loop and goes Idle.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.loop_enabled = false;
        self.state = PlaybackState::Idle;
        self.touch();
    }

    /// Drops pending tracks only; the current track keeps playing.
    pub fn clear_pending(&mut self) -> usize {
        let removed = self.pending.len();
        self.pending.clear();
        self.touch();
        removed
    }

    /// Returns the current track to the front of the queue and goes Idle.
    pub fn requeue_current(&mut self) {
        if let Some(current) = self.current.take() {
            self.pending.push_front(current);
        }
        self.state = PlaybackState::Idle;
        self.touch();
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.touch();
        info!(
            "🔁 Loop {} in {}",
            if self.loop_enabled { "enabled" } else { "disabled" },
            self.guild_id
        );
        self.loop_enabled
    }

    pub fn is_loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.guild_id, self.state, state);
            self.state = state;
        }
        self.touch();
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// No current track and nothing pending.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidates in-flight resolves and finish events; returns the new generation.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn voice(&self) -> Option<Arc<dyn VoiceSink>> {
        self.voice.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_voice(&mut self, sink: Option<&Arc<dyn VoiceSink>>) {
        self.voice = sink.map(Arc::downgrade);
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            loop_enabled: self.loop_enabled,
            state: self.state,
        }
    }
}

pub type SharedQueue = Arc<Mutex<GuildQueue>>;

/// Process-wide guild -> queue map. A queue is created on first access, so
/// there is never more than one per guild.
#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<GuildId, SharedQueue>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> SharedQueue {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildQueue::new(guild_id))))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SharedQueue> {
        self.queues.get(&guild_id).map(|q| q.clone())
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Removes queues that are Idle, empty, disconnected and untouched for `ttl`.
    pub fn evict_idle(&self, ttl: Duration, now: Instant) -> usize {
        let before = self.queues.len();
        self.queues.retain(|_, queue| {
            let q = queue.lock();
            let stale = q.state() == PlaybackState::Idle
                && q.is_empty()
                && q.voice().is_none()
                && q.idle_for(now) >= ttl;
            !stale
        });
        let evicted = before.saturating_sub(self.queues.len());
        if evicted > 0 {
            debug!("🧹 Evicted {} idle queues", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(name: &str) -> Track {
        Track::new(name, format!("https://example.com/{}.mp3", name))
    }

    fn titles(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(Track::title).collect()
    }

    #[test]
    fn dequeues_in_fifo_order() {
        let mut q = GuildQueue::new(GuildId::new(1));
        assert_eq!(q.enqueue(track("a")), 1);
        assert_eq!(q.enqueue(track("b")), 2);
        assert_eq!(q.enqueue(track("c")), 3);

        assert_eq!(q.dequeue_next().unwrap().title(), "a");
        assert_eq!(q.state(), PlaybackState::Resolving);
        assert_eq!(q.dequeue_next().unwrap().title(), "b");
        assert_eq!(q.dequeue_next().unwrap().title(), "c");
        assert_eq!(q.dequeue_next(), None);
        assert_eq!(q.current(), None);
        assert_eq!(q.state(), PlaybackState::Idle);
    }

    #[test]
    fn loop_repeats_current_until_disabled() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.enqueue(track("b"));
        q.dequeue_next();
        assert!(q.toggle_loop());

        for _ in 0..3 {
            assert_eq!(q.dequeue_next().unwrap().title(), "a");
        }
        assert_eq!(q.pending_len(), 1);

        assert!(!q.toggle_loop());
        assert_eq!(q.dequeue_next().unwrap().title(), "b");
    }

    #[test]
    fn skip_current_ignores_loop() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.enqueue(track("b"));
        q.dequeue_next();
        q.toggle_loop();

        assert_eq!(q.skip_current().unwrap().title(), "b");
        assert_eq!(q.skip_current(), None);
        assert_eq!(q.state(), PlaybackState::Idle);
    }

    #[test]
    fn clear_resets_everything() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.enqueue(track("b"));
        q.dequeue_next();
        q.set_state(PlaybackState::Playing);
        q.toggle_loop();

        q.clear();
        assert_eq!(q.snapshot(), QueueSnapshot::empty());
        assert!(q.is_empty());
    }

    #[test]
    fn clear_pending_keeps_current() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.enqueue(track("b"));
        q.enqueue(track("c"));
        q.dequeue_next();

        assert_eq!(q.clear_pending(), 2);
        assert_eq!(q.current().unwrap().title(), "a");
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn requeue_puts_current_back_in_front() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.enqueue(track("b"));
        q.dequeue_next();
        q.set_state(PlaybackState::Playing);

        q.requeue_current();
        let snapshot = q.snapshot();
        assert_eq!(snapshot.current, None);
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(titles(&snapshot.pending), vec!["a", "b"]);
    }

    #[test]
    fn push_front_takes_priority() {
        let mut q = GuildQueue::new(GuildId::new(1));
        q.enqueue(track("a"));
        q.push_front(track("alt"));
        assert_eq!(q.dequeue_next().unwrap().title(), "alt");
    }

    #[test]
    fn registry_creates_one_queue_per_guild() {
        let registry = QueueRegistry::new();
        let first = registry.get_or_create(GuildId::new(1));
        let again = registry.get_or_create(GuildId::new(1));
        assert!(Arc::ptr_eq(&first, &again));

        let other = registry.get_or_create(GuildId::new(2));
        first.lock().enqueue(track("a"));
        assert_eq!(other.lock().pending_len(), 0);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(GuildId::new(3)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_stale_empty_queues() {
        let registry = QueueRegistry::new();
        registry.get_or_create(GuildId::new(1));
        registry.get_or_create(GuildId::new(2)).lock().enqueue(track("a"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(registry.evict_idle(Duration::from_secs(120), Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.evict_idle(Duration::from_secs(120), Instant::now()), 1);
        assert!(registry.get(GuildId::new(1)).is_none());
        assert!(registry.get(GuildId::new(2)).is_some());
    }
}
