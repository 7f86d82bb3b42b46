use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::{is_url, is_youtube_url, AudioFormat, ExtractionBackend, FormatKind, Track};
use crate::error::{ResolveError, TransientReason, UnplayableReason};

const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".opus", ".flac", ".m4a", ".aac", ".webm"];

/// Plain links to audio files; streamed as-is after a reachability check.
pub struct DirectUrlBackend {
    client: reqwest::Client,
}

impl DirectUrlBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn is_audio_file_url(url: &str) -> bool {
        if !is_url(url) || is_youtube_url(url) {
            return false;
        }
        let path = url::Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_default();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }
}

fn classify_status(status: StatusCode) -> Option<ResolveError> {
    if status.is_success() || status.is_redirection() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => UnplayableReason::Deleted.into(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UnplayableReason::Private.into(),
        StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => UnplayableReason::RegionBlocked.into(),
        StatusCode::TOO_MANY_REQUESTS => TransientReason::RateLimited.into(),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransientReason::Timeout.into(),
        _ => TransientReason::BackendError.into(),
    })
}

#[async_trait]
impl ExtractionBackend for DirectUrlBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn supports(&self, track: &Track) -> bool {
        Self::is_audio_file_url(track.source_ref())
    }

    async fn extract(&self, track: &Track) -> Result<Vec<AudioFormat>, ResolveError> {
        let url = track.source_ref();
        let response = self
            .client
            .head(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                debug!("HEAD {} failed: {}", url, e);
                if e.is_timeout() {
                    TransientReason::Timeout
                } else {
                    TransientReason::BackendError
                }
            })?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        Ok(vec![AudioFormat::new(url, FormatKind::AudioOnly, None)])
    }
}
