//! Guild Jukebox: a Discord community music bot.
//!
//! The playback core ([`audio`]) and the search/extraction layer
//! ([`sources`]) are platform-agnostic; [`bot`] and [`ui`] are the thin
//! serenity/songbird shell around them.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;
