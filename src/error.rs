//! Error taxonomy for the playback core.
//!
//! Every network or extraction failure is converted into one of these types at
//! the component boundary ([`crate::sources::AudioResolver`],
//! [`crate::sources::TrackSearchService`]); the playback controller never sees
//! raw backend errors. `Display` strings are the terse, user-facing form.

use thiserror::Error;

/// Failure while looking up candidate tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("no results found")]
    NoResults,
    #[error("search service unavailable")]
    BackendUnavailable,
    #[error("search quota exceeded")]
    QuotaExceeded,
}

impl SearchError {
    /// Ranks errors so the most informative one survives a fallback chain.
    pub(crate) fn severity(self) -> u8 {
        match self {
            SearchError::NoResults => 0,
            SearchError::BackendUnavailable => 1,
            SearchError::QuotaExceeded => 2,
        }
    }
}

/// Temporary extraction failures; worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransientReason {
    #[error("timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("backend error")]
    BackendError,
}

/// Terminal failures; the same track will never play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnplayableReason {
    #[error("DRM protected")]
    DrmProtected,
    #[error("blocked in this region")]
    RegionBlocked,
    #[error("private video")]
    Private,
    #[error("video deleted")]
    Deleted,
}

/// Failure turning a track into a streamable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("stream unavailable ({0})")]
    Transient(TransientReason),
    #[error("track unplayable ({0})")]
    Unplayable(UnplayableReason),
}

impl ResolveError {
    pub fn is_unplayable(&self) -> bool {
        matches!(self, ResolveError::Unplayable(_))
    }
}

impl From<TransientReason> for ResolveError {
    fn from(reason: TransientReason) -> Self {
        ResolveError::Transient(reason)
    }
}

impl From<UnplayableReason> for ResolveError {
    fn from(reason: UnplayableReason) -> Self {
        ResolveError::Unplayable(reason)
    }
}

/// Failure joining a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VoiceConnectError {
    #[error("missing permission to join that voice channel")]
    PermissionDenied,
    #[error("voice connection timed out")]
    Timeout,
    #[error("already connected to another voice channel")]
    AlreadyConnectedElsewhere,
}

impl VoiceConnectError {
    /// Only timeouts are retried; the other variants need the user to act.
    pub fn is_retryable(self) -> bool {
        matches!(self, VoiceConnectError::Timeout)
    }
}

/// User-input errors against the current queue state. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueStateError {
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("the queue is empty")]
    QueueEmpty,
    #[error("playback is not paused")]
    NotPaused,
}

/// Failure reported by a voice sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("voice sink error: {0}")]
pub struct SinkError(pub String);

/// Errors returned by the playback controller's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Connect(#[from] VoiceConnectError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    QueueState(#[from] QueueStateError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("playback was stopped before it started")]
    Cancelled,
}
