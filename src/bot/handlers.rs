use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    notify::ChannelNotifier,
    selection::{ButtonPicker, Selection, TrackPicker},
    JukeboxBot,
};
use crate::{
    audio::notify::NotificationSink,
    error::{PlaybackError, QueueStateError, SearchError},
    sources::is_url,
    ui::embeds,
};

/// Candidates offered by the picker.
const SEARCH_LIMIT: usize = 10;

/// Handles slash commands
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside a server"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "join" => handle_join(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await?,
        "loop" => handle_loop(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await?,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Unknown command")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    // Searching and joining can take a while
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let channel_id = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel_id) => channel_id,
        Err(e) => {
            return edit(ctx, command, embeds::error_embed("Can't play", &e.to_string())).await;
        }
    };

    let track = if is_url(&query) {
        bot.search.lookup(&query).await
    } else {
        let candidates = match bot.search.search(&query, SEARCH_LIMIT).await {
            Ok(candidates) => candidates,
            Err(e) => {
                return edit(ctx, command, embeds::error_embed("Search failed", &search_error_message(e))).await;
            }
        };

        let picker = ButtonPicker::new(ctx, command, &query, bot.config.selection_timeout());
        match picker.present_choices(&candidates).await {
            Selection::Picked(track) => track,
            Selection::Cancelled => {
                return edit(ctx, command, embeds::info_embed("✖ Cancelled", "No song was added")).await;
            }
        }
    };
    let track = track.with_requested_by(command.user.id);

    let embed = match bot
        .controller
        .enqueue_and_maybe_play(guild_id, track.clone(), channel_id, notifier(ctx, command))
        .await
    {
        Ok(position) => embeds::queued_embed(&track, position),
        Err(e) => {
            warn!("❌ /play failed in {}: {}", guild_id, e);
            embeds::error_embed("Can't play", &playback_error_message(&e))
        }
    };

    edit(ctx, command, embed).await
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let channel_id = match get_user_voice_channel(ctx, guild_id, command.user.id) {
        Ok(channel_id) => channel_id,
        Err(e) => return respond(ctx, command, embeds::error_embed("Can't join", &e.to_string())).await,
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let embed = match bot.controller.join(guild_id, channel_id, notifier(ctx, command)).await {
        Ok(()) => embeds::success_embed("Joined", &format!("Connected to <#{}>", channel_id)),
        Err(e) => embeds::error_embed("Can't join", &playback_error_message(&e)),
    };
    edit(ctx, command, embed).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = if bot.controller.skip(guild_id).await {
        embeds::success_embed("Skipped", "Moving on to the next song")
    } else {
        embeds::error_embed("Can't skip", &playback_error_message(&QueueStateError::NothingPlaying.into()))
    };
    respond(ctx, command, embed).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = if bot.controller.stop(guild_id).await {
        embeds::success_embed("Stopped", "Queue cleared and disconnected")
    } else {
        embeds::info_embed("⏹️ Stop", "Nothing to stop")
    };
    respond(ctx, command, embed).await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = if bot.controller.leave(guild_id).await {
        embeds::success_embed("Left", "Disconnected; the queue is kept for later")
    } else {
        embeds::info_embed("👋 Leave", "I'm not in a voice channel")
    };
    respond(ctx, command, embed).await
}

async fn handle_loop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let description = if bot.controller.toggle_loop(guild_id) {
        "🔂 Repeating the current song"
    } else {
        "➡️ Loop disabled"
    };
    respond(ctx, command, embeds::info_embed("🔁 Loop", description)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.controller.queue_snapshot(guild_id);
    respond(ctx, command, embeds::queue_embed(&snapshot)).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.controller.queue_snapshot(guild_id);
    let embed = match bot.controller.now_playing(guild_id) {
        Some(track) => embeds::now_playing_embed(&track, snapshot.loop_enabled),
        None => embeds::info_embed("🎵 Now Playing", "Nothing is playing"),
    };
    respond(ctx, command, embed).await
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.controller.pause(guild_id).await {
        Ok(()) => embeds::success_embed("Paused", "Use /resume to continue"),
        Err(e) => embeds::error_embed("Can't pause", &playback_error_message(&e)),
    };
    respond(ctx, command, embed).await
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.controller.resume(guild_id).await {
        Ok(()) => embeds::success_embed("Resumed", "Back to the music"),
        Err(e) => embeds::error_embed("Can't resume", &playback_error_message(&e)),
    };
    respond(ctx, command, embed).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(50)
        .clamp(0, 100) as u8;

    let embed = match bot.controller.set_volume(guild_id, level).await {
        Ok(percent) => embeds::volume_embed(percent),
        Err(e) => embeds::error_embed("Can't change volume", &playback_error_message(&e)),
    };
    respond(ctx, command, embed).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.controller.clear_pending(guild_id) {
        Ok(1) => embeds::success_embed("Cleared", "Removed 1 song from the queue"),
        Ok(removed) => embeds::success_embed("Cleared", &format!("Removed {} songs from the queue", removed)),
        Err(e) => embeds::error_embed("Nothing to clear", &playback_error_message(&e)),
    };
    respond(ctx, command, embed).await
}

fn notifier(ctx: &Context, command: &CommandInteraction) -> Arc<dyn NotificationSink> {
    Arc::new(ChannelNotifier::new(ctx.http.clone(), command.channel_id))
}

async fn respond(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

/// Replaces a deferred response, dropping any leftover components.
async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().embed(embed).components(Vec::new()),
        )
        .await?;
    Ok(())
}

fn search_error_message(error: SearchError) -> String {
    match error {
        SearchError::NoResults => "No songs matched that search".to_string(),
        SearchError::BackendUnavailable => "Search is unavailable right now, try again shortly".to_string(),
        SearchError::QuotaExceeded => "The search quota is used up for today, try a direct link".to_string(),
    }
}

/// User-facing text for controller errors.
pub(crate) fn playback_error_message(error: &PlaybackError) -> String {
    match error {
        PlaybackError::QueueState(QueueStateError::NothingPlaying) => "Nothing is playing".to_string(),
        PlaybackError::QueueState(QueueStateError::QueueEmpty) => "The queue is empty".to_string(),
        PlaybackError::QueueState(QueueStateError::NotPaused) => "Playback isn't paused".to_string(),
        PlaybackError::Search(e) => search_error_message(*e),
        PlaybackError::Connect(e) => {
            let mut message = e.to_string();
            if let Some(first) = message.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            message
        }
        PlaybackError::Sink(_) => "The voice connection misbehaved, try again".to_string(),
        PlaybackError::Cancelled => "Playback was stopped before it started".to_string(),
    }
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Server not found in cache"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("You need to be in a voice channel"))?;

    Ok(channel_id)
}
