use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        notify::Notice,
        player::QueuePosition,
        queue::{PlaybackState, QueueSnapshot},
    },
    sources::Track,
};

/// Pending tracks listed in the queue embed before collapsing into "and N more".
const QUEUE_PAGE_SIZE: usize = 10;

/// Standard colour palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Embed for the track that just started.
pub fn now_playing_embed(track: &Track, loop_enabled: bool) -> CreateEmbed {
    let mut embed = track_embed(track)
        .title("🎵 Now Playing")
        .color(colors::SUCCESS_GREEN);

    if loop_enabled {
        embed = embed.field("🔂 Loop", "On", true);
    }

    embed
}

/// Embed answering `/play`: either playback started or the track was queued.
pub fn queued_embed(track: &Track, position: QueuePosition) -> CreateEmbed {
    match position {
        QueuePosition::Started => track_embed(track)
            .title("▶️ Starting Playback")
            .color(colors::SUCCESS_GREEN),
        QueuePosition::Queued(position) => track_embed(track)
            .title("✅ Added to Queue")
            .color(colors::INFO_BLUE)
            .field("📍 Position", format!("#{}", position), true),
    }
}

fn track_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .description(format!("**{}**", track.title()))
        .field("🎤 Artist", track.author().unwrap_or("Unknown"), true)
        .field(
            "⏱️ Duration",
            track.duration().map_or_else(|| "🔴 Live".to_string(), format_duration),
            true,
        );

    if let Some(user) = track.requested_by() {
        embed = embed.field("👤 Requested by", format!("<@{}>", user), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    if track.source_ref().starts_with("http") {
        embed = embed.url(track.source_ref());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Queue listing: the current track, then up to ten pending ones.
pub fn queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Music Queue")
        .color(colors::MUSIC_PURPLE)
        .timestamp(Timestamp::now());

    match &snapshot.current {
        Some(current) => {
            let status = if snapshot.state == PlaybackState::Paused {
                "⏸️"
            } else {
                "🎵"
            };
            embed = embed.field(
                format!("{} Now Playing", status),
                format!(
                    "**{}** `[{}]`",
                    current.title(),
                    current.duration().map_or_else(|| "Live".to_string(), format_duration)
                ),
                false,
            );
        }
        None => {
            embed = embed.description("Nothing is playing");
        }
    }

    if !snapshot.pending.is_empty() {
        let mut listing = String::new();
        for (i, track) in snapshot.pending.iter().take(QUEUE_PAGE_SIZE).enumerate() {
            listing.push_str(&format!(
                "**{}.** {} `[{}]`\n",
                i + 1,
                track.title(),
                track.duration().map_or_else(|| "Live".to_string(), format_duration)
            ));
        }
        if snapshot.pending.len() > QUEUE_PAGE_SIZE {
            listing.push_str(&format!(
                "*...and {} more*",
                snapshot.pending.len() - QUEUE_PAGE_SIZE
            ));
        }
        embed = embed.field(
            format!("⏭️ Up Next ({})", snapshot.pending.len()),
            listing,
            false,
        );
    }

    let loop_label = if snapshot.loop_enabled { "🔂 On" } else { "Off" };
    embed
        .field("🔁 Loop", loop_label, true)
        .field(
            "⏱️ Total",
            format_duration(Duration::from_secs(snapshot.total_duration_secs())),
            true,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Numbered candidate list shown alongside the picker buttons.
pub fn search_results_embed(query: &str, candidates: &[Track]) -> CreateEmbed {
    let mut listing = String::new();
    for (i, track) in candidates.iter().enumerate() {
        let author = track
            .author()
            .map(|author| format!(" - {}", author))
            .unwrap_or_default();
        let duration = track
            .duration()
            .map_or_else(|| "?".to_string(), format_duration);
        listing.push_str(&format!("**{}**. {}{} `[{}]`\n", i + 1, track.title(), author, duration));
    }

    CreateEmbed::default()
        .title(format!("🔍 Results for \"{}\"", query))
        .description(listing)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("Pick a number below"))
}

/// Unprompted messages from the playback controller.
pub fn notice_embed(notice: &Notice) -> CreateEmbed {
    let color = match notice {
        Notice::NowPlaying(_) => colors::SUCCESS_GREEN,
        Notice::Substituted { .. } | Notice::Dropped { .. } => colors::WARNING_ORANGE,
        Notice::QueueFinished => colors::INFO_BLUE,
        Notice::LeftIdle(_) | Notice::LeftEmptyChannel => colors::NEUTRAL_GRAY,
    };

    let mut embed = CreateEmbed::default()
        .description(notice.message())
        .color(color)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if let Notice::NowPlaying(track) = notice {
        if let Some(thumbnail) = track.thumbnail() {
            embed = embed.thumbnail(thumbnail);
        }
    }

    embed
}

pub fn volume_embed(percent: u8) -> CreateEmbed {
    let filled = usize::from(percent) / 10;
    let bar = format!("{}{}", "▰".repeat(filled), "▱".repeat(10 - filled));
    let emoji = match percent {
        0 => "🔇",
        1..=33 => "🔈",
        34..=66 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Volume", emoji))
        .description(format!("{} **{}%**", bar, percent))
        .color(colors::INFO_BLUE)
}

pub fn error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

pub fn success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

pub fn info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
}

/// `m:ss`, or `h:mm:ss` from an hour up.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn json(embed: CreateEmbed) -> Value {
        serde_json::to_value(embed).unwrap()
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(215)), "3:35");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn queued_embed_shows_position() {
        let track = Track::new("Song", "https://youtu.be/dQw4w9WgXcQ").with_duration_secs(200);
        let value = json(queued_embed(&track, QueuePosition::Queued(3)));

        assert_eq!(value["title"], "✅ Added to Queue");
        let fields = value["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f["name"] == "📍 Position" && f["value"] == "#3"));
        assert!(fields.iter().any(|f| f["value"] == "3:20"));
    }

    #[test]
    fn queue_embed_collapses_long_queues() {
        let snapshot = QueueSnapshot {
            current: Some(Track::new("Now", "now")),
            pending: (0..12).map(|i| Track::new(format!("t{}", i), format!("t{}", i))).collect(),
            loop_enabled: false,
            state: PlaybackState::Playing,
        };
        let value = json(queue_embed(&snapshot));

        let up_next = value["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "⏭️ Up Next (12)")
            .unwrap()
            .clone();
        let listing = up_next["value"].as_str().unwrap();
        assert!(listing.contains("**10.** t9"));
        assert!(!listing.contains("t10"));
        assert!(listing.ends_with("*...and 2 more*"));
    }

    #[test]
    fn empty_queue_says_nothing_is_playing() {
        let value = json(queue_embed(&QueueSnapshot::empty()));
        assert_eq!(value["description"], "Nothing is playing");
    }

    #[test]
    fn volume_bar_tracks_percent() {
        let value = json(volume_embed(40));
        assert_eq!(value["description"], "▰▰▰▰▱▱▱▱▱▱ **40%**");
        assert_eq!(value["title"], "🔉 Volume");
    }
}
