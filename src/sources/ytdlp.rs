use async_trait::async_trait;
use serde::Deserialize;
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};
use tracing::{debug, info, warn};

use super::{
    is_url, resolver::classify_failure_message, watch_url, AudioFormat, ExtractionBackend,
    FormatKind, SearchBackend, Track,
};
use crate::error::{ResolveError, SearchError, TransientReason};

#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
    // Single-format extractors put the stream straight on the root object
    url: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    url: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPlaylist {
    #[serde(default)]
    entries: Vec<VideoInfo>,
}

/// Where yt-dlp session cookies come from.
#[derive(Debug, Clone)]
pub enum CookieSource {
    /// A cookies.txt already on disk; passed through untouched.
    File(PathBuf),
    /// Cookie jar contents held in memory; written to a scoped temp file per call.
    Inline(Vec<u8>),
}

/// A cookies.txt written for one yt-dlp invocation and removed when dropped,
/// whichever way the invocation ends.
pub struct ScopedCookieFile {
    file: tempfile::NamedTempFile,
}

impl ScopedCookieFile {
    pub fn write(contents: &[u8]) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("jukebox-cookies-{}-", std::process::id()))
            .suffix(".txt")
            .tempfile()?;
        file.write_all(contents)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// yt-dlp driven through its JSON output. Primary extraction backend and the
/// last-resort search backend.
pub struct YtDlpClient {
    binary: String,
    cookies: Option<CookieSource>,
    timeout: Duration,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>, cookies: Option<CookieSource>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies,
            timeout,
        }
    }

    /// Checks that the binary is on PATH; used by the health check.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs yt-dlp with `args`, adding cookies when configured. The cookie
    /// temp file lives exactly as long as this call.
    async fn run(&self, args: &[&str]) -> Result<Output, TransientReason> {
        let scoped = match &self.cookies {
            Some(CookieSource::Inline(contents)) => match ScopedCookieFile::write(contents) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("🍪 Could not write cookie file, continuing without: {}", e);
                    None
                }
            },
            _ => None,
        };
        let cookie_path = match (&self.cookies, &scoped) {
            (_, Some(file)) => Some(file.path().to_path_buf()),
            (Some(CookieSource::File(path)), None) => Some(path.clone()),
            _ => None,
        };

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--no-warnings",
            "--no-progress",
            "--socket-timeout",
            "15",
            "--retries",
            "1",
        ]);
        if let Some(path) = &cookie_path {
            cmd.arg("--cookies").arg(path);
        }
        cmd.args(args).kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output()).await;
        drop(scoped);

        match result {
            Err(_) => {
                warn!("⏱️ yt-dlp timed out after {:?}", self.timeout);
                Err(TransientReason::Timeout)
            }
            Ok(Err(e)) => {
                warn!("❌ Could not run {}: {}", self.binary, e);
                Err(TransientReason::BackendError)
            }
            Ok(Ok(output)) => Ok(output),
        }
    }
}

fn format_kind(acodec: Option<&str>, vcodec: Option<&str>) -> FormatKind {
    let has_audio = acodec.is_some_and(|c| c != "none");
    let has_video = vcodec.is_some_and(|c| c != "none");
    match (has_audio, has_video) {
        (true, false) => FormatKind::AudioOnly,
        (true, true) => FormatKind::Combined,
        _ => FormatKind::VideoOnly,
    }
}

/// Collects plain-HTTP formats; manifests (HLS/DASH) cannot be streamed directly.
fn video_formats(info: &VideoInfo) -> Vec<AudioFormat> {
    let mut formats: Vec<AudioFormat> = info
        .formats
        .iter()
        .filter(|f| f.protocol.as_deref().map_or(true, |p| p == "https" || p == "http"))
        .filter_map(|f| {
            let url = f.url.clone()?;
            let bitrate = f.abr.or(f.tbr).map(|b| b.round() as u32);
            Some(AudioFormat::new(
                url,
                format_kind(f.acodec.as_deref(), f.vcodec.as_deref()),
                bitrate,
            ))
        })
        .collect();

    if formats.is_empty() {
        if let Some(url) = &info.url {
            let kind = if info.acodec.as_deref() == Some("none") {
                FormatKind::VideoOnly
            } else {
                FormatKind::AudioOnly
            };
            formats.push(AudioFormat::new(url.clone(), kind, info.abr.map(|b| b.round() as u32)));
        }
    }

    formats
}

fn info_to_track(info: VideoInfo, fallback_url: Option<&str>) -> Option<Track> {
    let url = info
        .webpage_url
        .clone()
        .or_else(|| info.id.as_deref().map(watch_url))
        .or_else(|| fallback_url.map(str::to_string))?;
    let title = info.title.clone().unwrap_or_else(|| url.clone());

    let mut track = Track::new(title, url);
    if let Some(author) = info.channel.or(info.uploader) {
        track = track.with_author(author);
    }
    if let Some(secs) = info.duration.filter(|d| *d > 0.0) {
        track = track.with_duration_secs(secs.round() as u64);
    }
    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }
    Some(track)
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl ExtractionBackend for YtDlpClient {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn supports(&self, track: &Track) -> bool {
        is_url(track.source_ref()) || track.video_id().is_some()
    }

    async fn extract(&self, track: &Track) -> Result<Vec<AudioFormat>, ResolveError> {
        let target = match track.video_id() {
            Some(id) => watch_url(&id),
            None => track.source_ref().to_string(),
        };
        debug!("🎯 yt-dlp extracting {}", target);

        let output = self.run(&["-J", "--no-playlist", &target]).await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            debug!("yt-dlp stderr for {}: {}", target, stderr);
            return Err(classify_failure_message(&stderr));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout).map_err(|e| {
            warn!("❌ yt-dlp JSON for {} unreadable: {}", target, e);
            TransientReason::BackendError
        })?;

        Ok(video_formats(&info))
    }
}

#[async_trait]
impl SearchBackend for YtDlpClient {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>, SearchError> {
        info!("🔍 yt-dlp search: {}", query);
        let search = format!("ytsearch{}:{}", limit.clamp(1, 10), query);

        let output = self
            .run(&["-J", "--flat-playlist", &search])
            .await
            .map_err(|_| SearchError::BackendUnavailable)?;
        if !output.status.success() {
            warn!("❌ yt-dlp search failed: {}", stderr_of(&output));
            return Err(SearchError::BackendUnavailable);
        }

        let playlist: SearchPlaylist =
            serde_json::from_slice(&output.stdout).map_err(|_| SearchError::BackendUnavailable)?;

        Ok(playlist
            .entries
            .into_iter()
            .filter_map(|entry| info_to_track(entry, None))
            .take(limit)
            .collect())
    }

    async fn lookup(&self, url: &str) -> Result<Track, SearchError> {
        let output = self
            .run(&["-J", "--no-playlist", "--skip-download", url])
            .await
            .map_err(|_| SearchError::BackendUnavailable)?;
        if !output.status.success() {
            return Err(SearchError::NoResults);
        }

        let info: VideoInfo =
            serde_json::from_slice(&output.stdout).map_err(|_| SearchError::BackendUnavailable)?;
        info_to_track(info, Some(url)).ok_or(SearchError::NoResults)
    }
}
