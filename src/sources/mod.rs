//! # Sources
//!
//! Everything that talks to the outside world about tracks: searching for
//! candidates ([`TrackSearchService`]) and turning a chosen track into a
//! streamable endpoint ([`AudioResolver`]). Both run an ordered chain of
//! backends and classify every backend failure into [`crate::error`] types.

pub mod direct_url;
pub mod formats;
pub mod invidious;
pub mod resolver;
pub mod search;
pub mod title;
pub mod youtube_api_v3;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use serenity::model::id::UserId;
use std::{sync::LazyLock, time::Duration};

use crate::error::{ResolveError, SearchError};

pub use direct_url::DirectUrlBackend;
pub use formats::{select_best_format, AudioFormat, FormatKind};
pub use invidious::InvidiousClient;
pub use resolver::{AudioResolver, RetryPolicy};
pub use search::TrackSearchService;
pub use youtube_api_v3::YouTubeApiV3Client;
pub use ytdlp::YtDlpClient;

/// A playable item. Immutable once built; the `with_*` builders consume self.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    source_ref: String,
    requested_by: Option<UserId>,
    duration_secs: Option<u64>,
    author: Option<String>,
    thumbnail: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_ref: source_ref.into(),
            requested_by: None,
            duration_secs: None,
            author: None,
            thumbnail: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// URL or video id the track was created from.
    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn with_requested_by(mut self, user: UserId) -> Self {
        self.requested_by = Some(user);
        self
    }

    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// YouTube video id, when the source reference is a YouTube link or a bare id.
    pub fn video_id(&self) -> Option<String> {
        youtube_video_id(&self.source_ref)
    }
}

/// A resolved, directly streamable audio location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub url: String,
    pub approx_bitrate_kbps: Option<u32>,
    pub backend: &'static str,
}

/// One search provider in the [`TrackSearchService`] chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError>;

    /// Metadata for a direct URL. Backends that cannot do this keep the default.
    async fn lookup(&self, _url: &str) -> Result<Track, SearchError> {
        Err(SearchError::BackendUnavailable)
    }
}

/// One extraction provider in the [`AudioResolver`] chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend knows how to handle the track at all.
    fn supports(&self, track: &Track) -> bool;

    /// Lists the formats available for `track`; format choice happens in the resolver.
    async fn extract(&self, track: &Track) -> Result<Vec<AudioFormat>, ResolveError>;
}

/// Search seam consumed by the playback controller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError>;
}

/// Resolve seam consumed by the playback controller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, track: &Track) -> Result<StreamEndpoint, ResolveError>;
}

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("static regex")
});

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"));

/// Extracts the 11-character video id from a YouTube URL or a bare id.
pub fn youtube_video_id(reference: &str) -> Option<String> {
    let reference = reference.trim();
    if BARE_ID.is_match(reference) {
        return Some(reference.to_string());
    }
    VIDEO_ID
        .captures(reference)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be")
}

pub fn is_url(input: &str) -> bool {
    url::Url::parse(input.trim())
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

pub(crate) fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}
