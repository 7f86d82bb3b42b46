use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use guild_jukebox::{
    audio::{idle::spawn_idle_sweeper, player::PlaybackController},
    bot::{voice::SongbirdConnector, JukeboxBot},
    config::Config,
    sources::{
        AudioResolver, DirectUrlBackend, InvidiousClient, TrackSearchService,
        YouTubeApiV3Client, YtDlpClient,
    },
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    // Container health checks run without Discord credentials
    if std::env::args().any(|arg| arg == "--health-check") {
        let config = Config::load_unvalidated()?;
        return tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(health_check(&config));
    }

    info!("🎵 Starting Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("guild-jukebox/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let ytdlp = Arc::new(YtDlpClient::new(
        config.ytdlp_path.clone(),
        config.cookie_source(),
        config.extraction_timeout(),
    ));
    let invidious = Arc::new(InvidiousClient::new(config.invidious_instances.clone(), http.clone()));

    // Search: YouTube API (when keyed) → Invidious → yt-dlp
    let mut search = TrackSearchService::new();
    if let Some(key) = &config.youtube_api_key {
        search = search.with_backend(Arc::new(YouTubeApiV3Client::new(key.clone(), http.clone())));
    }
    let search = Arc::new(search.with_backend(invidious.clone()).with_backend(ytdlp.clone()));

    // Extraction: direct audio files → yt-dlp → Invidious
    let resolver = Arc::new(
        AudioResolver::new(config.retry_policy())
            .with_backend(Arc::new(DirectUrlBackend::new(http.clone())))
            .with_backend(ytdlp)
            .with_backend(invidious),
    );
    info!("🔍 Search backends: {:?}", search.backend_names());
    info!("🎧 Extraction backends: {:?}", resolver.backend_names());

    let songbird = Songbird::serenity();
    let connector = Arc::new(SongbirdConnector::new(songbird.clone(), http));
    let (controller, events) = PlaybackController::new(
        connector.clone(),
        search.clone(),
        resolver.clone(),
        config.controller_settings().covering_resolve_budget(resolver.budget()),
    );

    let shutdown = CancellationToken::new();
    let driver = tokio::spawn(controller.clone().run(events, shutdown.clone()));
    let sweeper = spawn_idle_sweeper(controller.clone(), shutdown.clone());

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = JukeboxBot::new(config.clone(), controller, search);
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;
    connector.attach_cache(client.cache.clone());

    let shard_manager = client.shard_manager.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        signal_shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    shutdown.cancel();
    if let Err(e) = tokio::try_join!(driver, sweeper) {
        warn!("Background task ended abnormally: {}", e);
    }

    Ok(())
}

/// `--health-check`: the bot cannot stream without yt-dlp.
async fn health_check(config: &Config) -> Result<()> {
    let ytdlp = YtDlpClient::new(config.ytdlp_path.clone(), None, config.extraction_timeout());
    let version = ytdlp.verify().await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
