use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{SearchBackend, Track, TrackSearch};
use crate::error::SearchError;

/// Free-text search across an ordered chain of backends. The first backend
/// that answers with at least one result wins; its ranking is kept.
pub struct TrackSearchService {
    backends: Vec<Arc<dyn SearchBackend>>,
}

impl TrackSearchService {
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Err(SearchError::NoResults);
        }

        let mut worst = SearchError::NoResults;
        for backend in &self.backends {
            match backend.search(query, limit).await {
                Ok(mut results) if !results.is_empty() => {
                    results.truncate(limit);
                    info!("🎵 {} answered '{}' with {} results", backend.name(), query, results.len());
                    return Ok(results);
                }
                Ok(_) => debug!("{} had no results for '{}'", backend.name(), query),
                Err(e) => {
                    warn!("⚠️ {} search failed: {}", backend.name(), e);
                    if e.severity() > worst.severity() {
                        worst = e;
                    }
                }
            }
        }

        warn!("❌ All search backends failed for '{}': {}", query, worst);
        Err(worst)
    }

    /// Metadata for a direct URL. Never fails: when no backend knows the
    /// link, a bare track titled by the URL is returned.
    pub async fn lookup(&self, url: &str) -> Track {
        for backend in &self.backends {
            match backend.lookup(url).await {
                Ok(track) => return track,
                Err(e) => debug!("{} lookup of {} failed: {}", backend.name(), url, e),
            }
        }
        Track::new(url, url)
    }
}

impl Default for TrackSearchService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackSearch for TrackSearchService {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        TrackSearchService::search(self, query, limit).await
    }
}
