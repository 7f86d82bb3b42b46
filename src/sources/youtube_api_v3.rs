use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{title::unescape_html, watch_url, youtube_video_id, SearchBackend, Track};
use crate::error::SearchError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Snippet,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

/// Quota-limited YouTube Data API v3 search. Primary search backend when a key is configured.
pub struct YouTubeApiV3Client {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl YouTubeApiV3Client {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            api_key,
            client,
            base_url: API_BASE.to_string(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SearchError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                warn!("❌ YouTube API request failed: {}", e);
                SearchError::BackendUnavailable
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_failure(status, &body);
            warn!("❌ YouTube API error {}: {:?}", status, error);
            debug!("YouTube API error body: {}", body);
            return Err(error);
        }

        response.json::<T>().await.map_err(|e| {
            warn!("❌ YouTube API returned an unreadable payload: {}", e);
            SearchError::BackendUnavailable
        })
    }
}

/// Maps an unsuccessful API response to the search taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> SearchError {
    let quota = body.contains("quotaExceeded")
        || body.contains("dailyLimitExceeded")
        || body.contains("rateLimitExceeded");
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if quota => SearchError::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS => SearchError::QuotaExceeded,
        StatusCode::NOT_FOUND => SearchError::NoResults,
        _ => SearchError::BackendUnavailable,
    }
}

fn snippet_to_track(video_id: &str, snippet: Snippet) -> Track {
    let thumbnail = snippet.thumbnails.high.or(snippet.thumbnails.medium).map(|t| t.url);
    let mut track = Track::new(unescape_html(&snippet.title), watch_url(video_id))
        .with_author(unescape_html(&snippet.channel_title));
    if let Some(thumbnail) = thumbnail {
        track = track.with_thumbnail(thumbnail);
    }
    track
}

/// Parses an ISO 8601 duration such as `PT1H2M3S`.
fn parse_iso8601_duration(duration: &str) -> Option<u64> {
    let rest = duration.strip_prefix('P')?;
    let mut total = 0u64;
    let mut number = String::new();
    let mut in_time = false;

    for ch in rest.chars() {
        match ch {
            'T' => in_time = true,
            c if c.is_ascii_digit() => number.push(c),
            unit => {
                let value: u64 = number.parse().ok()?;
                number.clear();
                let seconds = match (unit, in_time) {
                    ('D', false) => value.checked_mul(86_400)?,
                    ('H', true) => value.checked_mul(3_600)?,
                    ('M', true) => value.checked_mul(60)?,
                    ('S', true) => value,
                    _ => return None,
                };
                total = total.checked_add(seconds)?;
            }
        }
    }

    number.is_empty().then_some(total)
}

#[async_trait]
impl SearchBackend for YouTubeApiV3Client {
    fn name(&self) -> &'static str {
        "YouTube API v3"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        debug!("🔍 YouTube API v3 search: {}", query);
        let max_results = limit.clamp(1, 50).to_string();

        let response: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("q", query),
                    ("type", "video"),
                    ("maxResults", &max_results),
                    ("videoEmbeddable", "true"),
                    ("order", "relevance"),
                ],
            )
            .await?;

        let tracks: Vec<Track> = response
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                Some(snippet_to_track(&video_id, item.snippet))
            })
            .collect();

        info!("✅ YouTube API v3: {} results", tracks.len());
        Ok(tracks)
    }

    async fn lookup(&self, url: &str) -> Result<Track, SearchError> {
        let video_id = youtube_video_id(url).ok_or(SearchError::NoResults)?;
        let response: VideosResponse = self
            .get("videos", &[("part", "snippet,contentDetails"), ("id", &video_id)])
            .await?;

        let video = response.items.into_iter().next().ok_or(SearchError::NoResults)?;
        let duration = parse_iso8601_duration(&video.content_details.duration);
        let track = snippet_to_track(&video.id, video.snippet);
        Ok(match duration {
            Some(secs) => track.with_duration_secs(secs),
            None => track,
        })
    }
}
