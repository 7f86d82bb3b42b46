//! Track selection: the user picks one of the search candidates.

use async_trait::async_trait;
use serenity::{
    builder::{CreateInteractionResponse, EditInteractionResponse},
    model::application::CommandInteraction,
    prelude::Context,
};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    sources::Track,
    ui::{
        buttons::{parse_picker_button, picker_buttons, PickerButton},
        embeds,
    },
};

/// Outcome of presenting candidates to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Picked(Track),
    /// Explicit cancel or timeout.
    Cancelled,
}

#[async_trait]
pub trait TrackPicker: Send + Sync {
    async fn present_choices(&self, candidates: &[Track]) -> Selection;
}

/// Resolves a pressed button against the candidate list.
pub fn selection_for(button: Option<PickerButton>, candidates: &[Track]) -> Selection {
    match button {
        Some(PickerButton::Candidate(index)) => candidates
            .get(index)
            .cloned()
            .map_or(Selection::Cancelled, Selection::Picked),
        Some(PickerButton::Cancel) | None => Selection::Cancelled,
    }
}

/// Numbered buttons under the deferred `/play` response. Only the invoking
/// user can press them; they are disabled once a choice is made or the
/// timeout passes.
pub struct ButtonPicker<'a> {
    ctx: &'a Context,
    command: &'a CommandInteraction,
    query: &'a str,
    timeout: Duration,
}

impl<'a> ButtonPicker<'a> {
    pub fn new(
        ctx: &'a Context,
        command: &'a CommandInteraction,
        query: &'a str,
        timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            command,
            query,
            timeout,
        }
    }
}

#[async_trait]
impl TrackPicker for ButtonPicker<'_> {
    async fn present_choices(&self, candidates: &[Track]) -> Selection {
        let prompt = EditInteractionResponse::new()
            .embed(embeds::search_results_embed(self.query, candidates))
            .components(picker_buttons(candidates.len(), false));

        let message = match self.command.edit_response(&self.ctx.http, prompt).await {
            Ok(message) => message,
            Err(e) => {
                warn!("❌ Could not show search results: {}", e);
                return Selection::Cancelled;
            }
        };

        let pressed = message
            .await_component_interaction(&self.ctx.shard)
            .author_id(self.command.user.id)
            .timeout(self.timeout)
            .await;

        let button = match &pressed {
            Some(interaction) => {
                if let Err(e) = interaction
                    .create_response(&self.ctx.http, CreateInteractionResponse::Acknowledge)
                    .await
                {
                    debug!("Could not acknowledge picker button: {}", e);
                }
                parse_picker_button(&interaction.data.custom_id)
            }
            None => {
                debug!("⌛ Track selection timed out for {}", self.command.user.name);
                None
            }
        };

        let disabled = EditInteractionResponse::new().components(picker_buttons(candidates.len(), true));
        if let Err(e) = self.command.edit_response(&self.ctx.http, disabled).await {
            debug!("Could not disable picker buttons: {}", e);
        }

        selection_for(button, candidates)
    }
}
