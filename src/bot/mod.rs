pub mod commands;
pub mod handlers;
pub mod notify;
pub mod selection;
pub mod voice;

use anyhow::Result;
use serenity::{
    async_trait,
    model::{application::Interaction, gateway::Ready, id::GuildId, voice::VoiceState},
    prelude::{Context, EventHandler},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{audio::player::PlaybackController, config::Config, sources::TrackSearchService};

/// Discord event handler for Guild Jukebox.
///
/// Owns nothing stateful itself: playback lives in the shared
/// [`PlaybackController`], candidate lookup in the [`TrackSearchService`].
pub struct JukeboxBot {
    pub config: Arc<Config>,
    pub controller: Arc<PlaybackController>,
    pub search: Arc<TrackSearchService>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        controller: Arc<PlaybackController>,
        search: Arc<TrackSearchService>,
    ) -> Self {
        Self {
            config,
            controller,
            search,
        }
    }

    /// Registers slash commands.
    ///
    /// With `guild_id` configured the commands go to that guild only, which
    /// propagates within seconds; otherwise they are registered globally,
    /// which can take up to an hour.
    ///
    /// # Required Permissions
    ///
    /// The bot must have `applications.commands` in the target guild(s).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ Bot is not a member of the configured guild: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Guild command registration failed: {:?}", e);
                        anyhow::anyhow!(
                            "Could not register guild commands. Check the bot has 'applications.commands' in that guild."
                        )
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                info!("🌐 Registering commands globally");
                commands::register_global_commands(ctx).await?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Command registration failed: {:?}", e);
        }
    }

    /// Slash commands only; picker buttons are consumed by their collector.
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Someone disconnected the bot by hand: drop the connection but keep the queue.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            if self.controller.leave(guild_id).await {
                info!("🔌 Bot was disconnected in guild {}", guild_id);
            }
        }
    }
}
