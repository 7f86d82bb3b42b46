use async_trait::async_trait;
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::warn;

use crate::{
    audio::notify::{Notice, NotificationSink},
    ui::embeds,
};

/// Posts controller notices to the text channel the last command came from.
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl NotificationSink for ChannelNotifier {
    async fn send(&self, guild_id: GuildId, notice: Notice) {
        let message = CreateMessage::new().embed(embeds::notice_embed(&notice));
        if let Err(e) = self.channel_id.send_message(&self.http, message).await {
            warn!("⚠️ Could not post notice in {} ({}): {}", guild_id, self.channel_id, e);
        }
    }
}
