//! Discord presentation: embeds and the track picker buttons.

pub mod buttons;
pub mod embeds;
