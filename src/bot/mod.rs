//! # Bot Module
//!
//! Discord front end for NightFury's music sessions.
//!
//! This module contains:
//! - Slash command registration ([`commands`]) and handling ([`handlers`])
//! - Translation of gateway events into session teardown ([`events`])
//!
//! ## Architecture
//!
//! [`NightFuryBot`] implements Serenity's [`EventHandler`] trait and shares
//! one [`SessionRegistry`] with the playback event pump started in `main`.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, Guild, Interaction, Ready, UnavailableGuild, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{audio::registry::SessionRegistry, config::Config, sources::TrackLoader};
use events::VoiceSnapshot;

/// Main Discord event handler for NightFury.
pub struct NightFuryBot {
    config: Arc<Config>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) loader: Arc<TrackLoader>,
}

impl NightFuryBot {
    pub fn new(config: Arc<Config>, registry: Arc<SessionRegistry>, loader: Arc<TrackLoader>) -> Self {
        Self {
            config,
            registry,
            loader,
        }
    }

    /// Registers slash commands on the development guild if one is
    /// configured, globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        let max_results = self.config.max_search_results;

        if let Some(guild_id) = self.config.guild_id {
            commands::register_guild_commands(ctx, guild_id.into(), max_results).await?;
            info!("✅ Commands registered on guild {}", guild_id);
        } else {
            commands::register_global_commands(ctx, max_results).await?;
            info!("✅ Commands registered globally");
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for NightFuryBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Ends the guild's session when the bot leaves its channel, mutes
    /// itself or gets suppressed.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let bot_id = ctx.cache.current_user().id;
        let old = old.as_ref().map(VoiceSnapshot::from);
        let new = VoiceSnapshot::from(&new);

        if let Some(event) = events::classify_voice_update(bot_id, old.as_ref(), &new) {
            info!("🔌 {:?}", event);
            self.registry.handle_gateway(event).await;
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        match events::classify_guild_delete(incomplete.id, incomplete.unavailable) {
            Some(event) => self.registry.handle_gateway(event).await,
            None => debug!("Guild {} became unavailable", incomplete.id),
        }
    }
}
