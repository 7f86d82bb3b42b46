use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tracing::{debug, info, warn};

use super::{
    is_youtube_url, resolver::classify_failure_message, watch_url, AudioFormat, ExtractionBackend,
    FormatKind, SearchBackend, Track,
};
use crate::error::{ResolveError, SearchError, TransientReason};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousVideo {
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
    #[serde(default)]
    format_streams: Vec<FormatStream>,
}

#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(rename = "type")]
    mime: String,
    bitrate: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FormatStream {
    url: String,
    #[serde(rename = "type")]
    mime: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    #[serde(rename = "type")]
    kind: Option<String>,
    video_id: Option<String>,
    title: Option<String>,
    author: Option<String>,
    length_seconds: Option<u64>,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for public Invidious instances; used both as a search fallback and
/// as an alternate extraction backend when yt-dlp breaks.
pub struct InvidiousClient {
    client: reqwest::Client,
    instances: Vec<String>,
    current_instance: AtomicUsize,
}

impl InvidiousClient {
    pub fn new(instances: Vec<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            instances: instances
                .into_iter()
                .map(|i| i.trim_end_matches('/').to_string())
                .collect(),
            current_instance: AtomicUsize::new(0),
        }
    }

    /// Instances in round-robin order, starting from the next one in rotation.
    fn rotation(&self) -> impl Iterator<Item = &str> {
        let start = self.current_instance.fetch_add(1, Ordering::Relaxed);
        let len = self.instances.len();
        (0..len).map(move |offset| self.instances[(start + offset) % len].as_str())
    }

    async fn try_search(&self, instance: &str, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        let response = self
            .client
            .get(format!("{}/api/v1/search", instance))
            .query(&[("q", query), ("type", "video"), ("sort_by", "relevance"), ("page", "1")])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                warn!("❌ Invidious search on {} failed: {}", instance, e);
                SearchError::BackendUnavailable
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::QuotaExceeded);
        }
        if !response.status().is_success() {
            warn!("❌ Invidious search on {} returned {}", instance, response.status());
            return Err(SearchError::BackendUnavailable);
        }

        let results: Vec<SearchResult> = response.json().await.map_err(|e| {
            warn!("❌ Invidious search on {} returned bad JSON: {}", instance, e);
            SearchError::BackendUnavailable
        })?;

        Ok(search_results_to_tracks(results, limit))
    }

    async fn try_extract(&self, instance: &str, video_id: &str) -> Result<Vec<AudioFormat>, ResolveError> {
        let response = self
            .client
            .get(format!("{}/api/v1/videos/{}", instance, video_id))
            .query(&[("local", "true")])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                warn!("❌ Invidious request to {} failed: {}", instance, e);
                if e.is_timeout() {
                    TransientReason::Timeout
                } else {
                    TransientReason::BackendError
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransientReason::RateLimited.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            debug!("Invidious {} error for {}: {}", status, video_id, message);
            return Err(classify_failure_message(&message));
        }

        let video: InvidiousVideo = response.json().await.map_err(|e| {
            warn!("❌ Invidious video payload from {} unreadable: {}", instance, e);
            TransientReason::BackendError
        })?;

        Ok(video_formats(video))
    }
}

fn search_results_to_tracks(results: Vec<SearchResult>, limit: usize) -> Vec<Track> {
    results
        .into_iter()
        .filter(|r| r.kind.as_deref().map_or(true, |k| k == "video"))
        .filter_map(|r| {
            let video_id = r.video_id?;
            let mut track = Track::new(r.title.unwrap_or_else(|| video_id.clone()), watch_url(&video_id));
            if let Some(author) = r.author {
                track = track.with_author(author);
            }
            if let Some(secs) = r.length_seconds.filter(|s| *s > 0) {
                track = track.with_duration_secs(secs);
            }
            if let Some(thumb) = r.video_thumbnails.into_iter().find(|t| t.width >= 320) {
                track = track.with_thumbnail(thumb.url);
            }
            Some(track)
        })
        .take(limit)
        .collect()
}

fn video_formats(video: InvidiousVideo) -> Vec<AudioFormat> {
    let adaptive = video.adaptive_formats.into_iter().map(|f| {
        // Invidious reports bitrate in bits/s, sometimes as a string
        let bitrate = f.bitrate.and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
        AudioFormat::new(
            f.url,
            AudioFormat::kind_from_mime(&f.mime),
            bitrate.map(|b| (b / 1000) as u32),
        )
        .with_mime(f.mime)
    });

    let combined = video
        .format_streams
        .into_iter()
        .map(|f| AudioFormat::new(f.url, FormatKind::Combined, None).with_mime(f.mime));

    adaptive.chain(combined).collect()
}

#[async_trait]
impl SearchBackend for InvidiousClient {
    fn name(&self) -> &'static str {
        "Invidious"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        info!("🔍 Searching Invidious: {}", query);
        let mut last_error = SearchError::BackendUnavailable;

        for instance in self.rotation() {
            match self.try_search(instance, query, limit).await {
                Ok(results) if !results.is_empty() => {
                    info!("✅ Invidious search on {}: {} results", instance, results.len());
                    return Ok(results);
                }
                Ok(_) => {
                    warn!("⚠️ {} returned 0 results", instance);
                    last_error = SearchError::NoResults;
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl ExtractionBackend for InvidiousClient {
    fn name(&self) -> &'static str {
        "Invidious"
    }

    fn supports(&self, track: &Track) -> bool {
        !self.instances.is_empty() && (is_youtube_url(track.source_ref()) || track.video_id().is_some())
    }

    async fn extract(&self, track: &Track) -> Result<Vec<AudioFormat>, ResolveError> {
        let video_id = track
            .video_id()
            .ok_or(ResolveError::Transient(TransientReason::BackendError))?;
        let mut last_error = ResolveError::Transient(TransientReason::BackendError);

        for instance in self.rotation() {
            match self.try_extract(instance, &video_id).await {
                Ok(formats) if !formats.is_empty() => return Ok(formats),
                Ok(_) => warn!("⚠️ {} listed no formats for {}", instance, video_id),
                // Every instance asks the same upstream; an unplayable verdict will not change
                Err(e @ ResolveError::Unplayable(_)) => return Err(e),
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }
}
