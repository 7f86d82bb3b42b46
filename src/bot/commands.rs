use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Every slash command the bot understands.
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        join_command(),
        skip_command(),
        stop_command(),
        leave_command(),
        loop_command(),
        queue_command(),
        nowplaying_command(),
        pause_command(),
        resume_command(),
        volume_command(),
        clear_command(),
    ]
}

/// Registers commands globally
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers commands for one guild (development)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Search for a song or play a link")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "Search terms or a URL",
            )
            .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback, clear the queue and disconnect")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current song")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume the paused song")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Set the playback volume")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume (0-100)")
                .min_int_value(0)
                .max_int_value(100)
                .required(true),
        )
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the queue")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current song")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Toggle repeating the current song")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Remove upcoming songs; the current one keeps playing")
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel, keeping the queue")
}
