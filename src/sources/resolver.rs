use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{select_best_format, ExtractionBackend, StreamEndpoint, StreamResolver, Track};
use crate::error::{ResolveError, TransientReason, UnplayableReason};

/// Per-backend retry budget for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff: the n-th retry waits `n * backoff_step`.
    pub backoff_step: Duration,
    /// Bound on a single `extract` call; an elapsed attempt counts as a timeout.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Longest time one backend can take: every attempt timing out plus
    /// every backoff in between.
    pub fn backend_budget(&self) -> Duration {
        let backoff: u32 = (1..self.max_attempts).sum();
        self.attempt_timeout * self.max_attempts + self.backoff_step * backoff
    }
}

/// Resolves tracks to stream endpoints through an ordered chain of extraction
/// backends. Unplayable verdicts skip straight to the next backend; transient
/// failures are retried per [`RetryPolicy`] first.
pub struct AudioResolver {
    backends: Vec<Arc<dyn ExtractionBackend>>,
    policy: RetryPolicy,
}

impl AudioResolver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            backends: Vec::new(),
            policy,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Worst case for a full pass over the chain. Callers bounding
    /// [`AudioResolver::resolve`] from outside must allow at least this much,
    /// or the later backends never get their turn.
    pub fn budget(&self) -> Duration {
        self.policy.backend_budget() * self.backends.len() as u32
    }

    pub async fn resolve(&self, track: &Track) -> Result<StreamEndpoint, ResolveError> {
        let mut unplayable: Option<UnplayableReason> = None;
        let mut last_transient = TransientReason::BackendError;

        for backend in self.backends.iter().filter(|b| b.supports(track)) {
            match self.resolve_with(backend.as_ref(), track).await {
                Ok(endpoint) => {
                    info!(
                        "✅ Resolved '{}' via {} ({:?} kbps)",
                        track.title(),
                        endpoint.backend,
                        endpoint.approx_bitrate_kbps
                    );
                    return Ok(endpoint);
                }
                Err(ResolveError::Unplayable(reason)) => {
                    warn!("🚫 {} reports '{}' unplayable: {}", backend.name(), track.title(), reason);
                    unplayable.get_or_insert(reason);
                }
                Err(ResolveError::Transient(reason)) => {
                    warn!("❌ {} failed for '{}': {}", backend.name(), track.title(), reason);
                    last_transient = reason;
                }
            }
        }

        Err(match unplayable {
            Some(reason) => reason.into(),
            None => last_transient.into(),
        })
    }

    async fn resolve_with(
        &self,
        backend: &dyn ExtractionBackend,
        track: &Track,
    ) -> Result<StreamEndpoint, ResolveError> {
        let mut attempt = 1;
        loop {
            let extracted = tokio::time::timeout(self.policy.attempt_timeout, backend.extract(track))
                .await
                .unwrap_or_else(|_| {
                    warn!("⏱️ {} attempt {} timed out after {:?}", backend.name(), attempt, self.policy.attempt_timeout);
                    Err(TransientReason::Timeout.into())
                });
            match extracted {
                Ok(formats) => {
                    // A format list without audio will not change on retry
                    return select_best_format(&formats, backend.name())
                        .ok_or(ResolveError::Transient(TransientReason::BackendError));
                }
                Err(e @ ResolveError::Unplayable(_)) => return Err(e),
                Err(ResolveError::Transient(reason)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    debug!(
                        "🔄 {} attempt {}/{} failed ({}), retrying in {:?}",
                        backend.name(),
                        attempt,
                        self.policy.max_attempts,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl StreamResolver for AudioResolver {
    async fn resolve(&self, track: &Track) -> Result<StreamEndpoint, ResolveError> {
        AudioResolver::resolve(self, track).await
    }
}

/// Classifies a backend's error text (yt-dlp stderr, Invidious error body).
pub fn classify_failure_message(message: &str) -> ResolveError {
    let m = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if any(&["drm"]) {
        UnplayableReason::DrmProtected.into()
    } else if any(&["private video", "video is private"]) {
        UnplayableReason::Private.into()
    } else if any(&["in your country", "geo restrict", "geo-restrict", "not available in your region"]) {
        UnplayableReason::RegionBlocked.into()
    } else if any(&["429", "too many requests", "rate limit", "rate-limit", "try again later"]) {
        TransientReason::RateLimited.into()
    } else if any(&["timed out", "timeout"]) {
        TransientReason::Timeout.into()
    } else if any(&[
        "video unavailable",
        "has been removed",
        "no longer available",
        "does not exist",
        "has been terminated",
        "404",
    ]) {
        UnplayableReason::Deleted.into()
    } else {
        TransientReason::BackendError.into()
    }
}
