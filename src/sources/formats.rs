use super::StreamEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    AudioOnly,
    Combined,
    VideoOnly,
}

/// One downloadable rendition reported by an extraction backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub url: String,
    pub kind: FormatKind,
    pub bitrate_kbps: Option<u32>,
    pub mime: Option<String>,
}

impl AudioFormat {
    pub fn new(url: impl Into<String>, kind: FormatKind, bitrate_kbps: Option<u32>) -> Self {
        Self {
            url: url.into(),
            kind,
            bitrate_kbps,
            mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Classifies a format from its mime type (`audio/webm; codecs="opus"`).
    pub fn kind_from_mime(mime: &str) -> FormatKind {
        if mime.starts_with("audio/") {
            FormatKind::AudioOnly
        } else if mime.starts_with("video/") && mime.contains(',') {
            // video/mp4; codecs="avc1.42001E, mp4a.40.2" carries both streams
            FormatKind::Combined
        } else {
            FormatKind::VideoOnly
        }
    }
}

/// Picks the highest-bitrate audio-only format, falling back to the best
/// combined audio+video format. Video-only formats are never selected.
pub fn select_best_format(formats: &[AudioFormat], backend: &'static str) -> Option<StreamEndpoint> {
    let best_of = |kind: FormatKind| {
        formats
            .iter()
            .filter(|f| f.kind == kind && !f.url.is_empty())
            .max_by_key(|f| f.bitrate_kbps.unwrap_or(0))
    };

    best_of(FormatKind::AudioOnly)
        .or_else(|| best_of(FormatKind::Combined))
        .map(|f| StreamEndpoint {
            url: f.url.clone(),
            approx_bitrate_kbps: f.bitrate_kbps,
            backend,
        })
}
