//! Title clean-up used for display and for same-title alternate searches.

use regex::Regex;
use std::sync::LazyLock;

/// Tokens that mark a bracketed segment as upload noise rather than part of the song name.
const NOISE_TOKENS: &[&str] = &[
    "official", "lyrics", "lyric", "m/v", "mv", "audio", "video", "hd", "hq", "4k",
    "visualizer", "visualiser",
];

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[【]([^\)\]】]*)[\)\]】]").expect("static regex"));

static LOOSE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(official\s+(music\s+)?video|official\s+audio|official\s+lyric\s+video|lyric\s+video|lyrics|m/v)\b",
    )
    .expect("static regex")
});

static TRAILING_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-–|_:]+$").expect("static regex"));

static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|quot|apos|lt|gt|amp);").expect("static regex")
});

/// Strips common upload suffixes ("Official Video", "Lyrics", "M/V", `[4K]`...)
/// so the remaining text can be searched again to find another upload.
pub fn normalize_title(title: &str) -> String {
    let title = unescape_html(title);

    let without_brackets = BRACKETED.replace_all(&title, |caps: &regex::Captures| {
        let inner = caps[1].to_lowercase();
        let noisy = inner
            .split(|c: char| !c.is_alphanumeric() && c != '/')
            .any(|token| NOISE_TOKENS.contains(&token));
        if noisy {
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    let without_noise = LOOSE_NOISE.replace_all(&without_brackets, "");
    let collapsed = without_noise.split_whitespace().collect::<Vec<_>>().join(" ");
    TRAILING_SEPARATOR.replace(&collapsed, "").trim().to_string()
}

/// Decodes the named and numeric HTML entities the YouTube Data API leaves
/// in titles. Unknown or invalid references are kept verbatim.
pub fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    HTML_ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .unwrap_or_else(|| entity[1..].parse())
                    .ok()
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
