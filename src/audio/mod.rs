//! # Audio Module
//!
//! Per-guild playback core for Guild Jukebox.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - One [`queue::GuildQueue`] per guild, created on first use by the
//!   [`queue::QueueRegistry`]
//! - FIFO order, single-track loop, generation counter for cancellation
//!
//! ### [`player`] - Playback Controller
//! - Connect → resolve → play → advance state machine
//! - Same-title substitution for unplayable uploads
//! - Finish events delivered over a channel, never by re-entrant callbacks
//!
//! ### [`idle`] - Auto-disconnect
//! - Periodic sweep leaving empty or idle voice channels
//!
//! ### [`voice`] / [`notify`] - Platform seams
//! - Traits the Discord shell implements; tests use in-memory fakes
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::player::{ControllerSettings, PlaybackController};
//! # use std::sync::Arc;
//! # use tokio_util::sync::CancellationToken;
//! # fn example(
//! #     connector: Arc<dyn guild_jukebox::audio::voice::VoiceConnector>,
//! #     search: Arc<dyn guild_jukebox::sources::TrackSearch>,
//! #     resolver: Arc<dyn guild_jukebox::sources::StreamResolver>,
//! # ) {
//! let (controller, events) =
//!     PlaybackController::new(connector, search, resolver, ControllerSettings::default());
//! tokio::spawn(controller.clone().run(events, CancellationToken::new()));
//! # }
//! ```

#[cfg(test)]
pub(crate) mod fakes;
pub mod idle;
pub mod notify;
pub mod player;
pub mod queue;
pub mod voice;
