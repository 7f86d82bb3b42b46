//! Idle auto-disconnect. A periodic sweep leaves voice channels that are
//! empty of humans or have been idle too long, and evicts dead queues.

use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    notify::Notice,
    player::PlaybackController,
    queue::PlaybackState,
    voice::{human_count, VoiceSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    EmptyChannel,
    Idle,
    /// The connection was already gone (kicked, channel deleted).
    Disconnected,
}

/// Runs one sweep over every connected guild.
pub async fn sweep_once(controller: &PlaybackController) -> Vec<(GuildId, LeaveReason)> {
    let now = Instant::now();
    let checks = controller
        .connections()
        .into_iter()
        .map(|(guild_id, sink)| check_guild(controller, guild_id, sink, now));
    let left: Vec<_> = join_all(checks).await.into_iter().flatten().collect();

    controller
        .registry()
        .evict_idle(controller.settings().queue_eviction_ttl, now);
    left
}

async fn check_guild(
    controller: &PlaybackController,
    guild_id: GuildId,
    sink: Arc<dyn VoiceSink>,
    now: Instant,
) -> Option<(GuildId, LeaveReason)> {
    let idle_timeout = controller.settings().idle_timeout;

    let reason = if !sink.is_connected() {
        LeaveReason::Disconnected
    } else if human_count(&sink.channel_members()) == 0 {
        LeaveReason::EmptyChannel
    } else {
        let idle = controller.registry().get(guild_id).map_or(true, |queue| {
            let q = queue.lock();
            q.state() == PlaybackState::Idle && q.idle_for(now) >= idle_timeout
        });
        if !idle {
            return None;
        }
        LeaveReason::Idle
    };

    controller.leave(guild_id).await;
    info!("👋 Auto-leave in {}: {:?}", guild_id, reason);
    match reason {
        LeaveReason::EmptyChannel => controller.notify(guild_id, Notice::LeftEmptyChannel).await,
        LeaveReason::Idle => controller.notify(guild_id, Notice::LeftIdle(idle_timeout)).await,
        LeaveReason::Disconnected => {}
    }
    Some((guild_id, reason))
}

/// Spawns the periodic sweep; it stops when `shutdown` is cancelled.
pub fn spawn_idle_sweeper(
    controller: Arc<PlaybackController>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(controller.settings().sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let left = sweep_once(&controller).await;
                    if !left.is_empty() {
                        debug!("Idle sweep left {} guilds", left.len());
                    }
                }
            }
        }
        info!("🧹 Idle sweeper stopped");
    })
}
