//! Adapters from serenity gateway events to [`GatewayEvent`], plus the pump
//! that feeds songbird track events into the registry.

use serenity::model::{
    id::{ChannelId, GuildId, UserId},
    voice::VoiceState,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::audio::{
    events::{GatewayEvent, PlaybackEvent},
    registry::SessionRegistry,
};

/// The parts of a [`VoiceState`] that decide whether a session must end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSnapshot {
    pub user_id: UserId,
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub suppress: bool,
}

impl From<&VoiceState> for VoiceSnapshot {
    fn from(state: &VoiceState) -> Self {
        Self {
            user_id: state.user_id,
            guild_id: state.guild_id,
            channel_id: state.channel_id,
            self_mute: state.self_mute,
            suppress: state.suppress,
        }
    }
}

/// Maps a voice state change to the event it means for the bot's session.
///
/// Only the bot's own transitions matter: leaving the channel, muting
/// itself, or being suppressed in a stage channel.
pub fn classify_voice_update(
    bot_id: UserId,
    old: Option<&VoiceSnapshot>,
    new: &VoiceSnapshot,
) -> Option<GatewayEvent> {
    if new.user_id != bot_id {
        return None;
    }

    let guild_id = new.guild_id.or_else(|| old.and_then(|state| state.guild_id))?;
    let was_connected = old.is_some_and(|state| state.channel_id.is_some());

    if new.channel_id.is_none() {
        return was_connected.then_some(GatewayEvent::VoiceSelfLeft(guild_id));
    }

    let was_muted = old.is_some_and(|state| state.self_mute);
    if new.self_mute && !was_muted {
        return Some(GatewayEvent::VoiceSelfMuted(guild_id));
    }

    let was_suppressed = old.is_some_and(|state| state.suppress);
    if new.suppress && !was_suppressed {
        return Some(GatewayEvent::VoiceSelfSuppressed(guild_id));
    }

    None
}

/// Outages make guilds unavailable without the bot leaving them.
pub fn classify_guild_delete(guild_id: GuildId, unavailable: bool) -> Option<GatewayEvent> {
    (!unavailable).then_some(GatewayEvent::GuildLeft(guild_id))
}

/// Forwards track events to the registry until every sender is gone.
pub async fn pump_playback_events(
    registry: Arc<SessionRegistry>,
    mut events: UnboundedReceiver<PlaybackEvent>,
) {
    info!("📡 Playback event pump started");
    while let Some(event) = events.recv().await {
        registry.handle_playback(event).await;
    }
    debug!("Playback event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BOT: UserId = UserId::new(1);
    const GUILD: GuildId = GuildId::new(10);

    fn snapshot(user_id: UserId, channel: Option<u64>) -> VoiceSnapshot {
        VoiceSnapshot {
            user_id,
            guild_id: Some(GUILD),
            channel_id: channel.map(ChannelId::new),
            self_mute: false,
            suppress: false,
        }
    }

    #[test]
    fn test_other_users_are_ignored() {
        let old = snapshot(UserId::new(2), Some(5));
        let new = snapshot(UserId::new(2), None);
        assert_eq!(classify_voice_update(BOT, Some(&old), &new), None);
    }

    #[test]
    fn test_bot_leaving_channel() {
        let old = snapshot(BOT, Some(5));
        let new = snapshot(BOT, None);
        assert_eq!(
            classify_voice_update(BOT, Some(&old), &new),
            Some(GatewayEvent::VoiceSelfLeft(GUILD))
        );

        // Nothing to leave if the bot was never connected.
        assert_eq!(classify_voice_update(BOT, None, &new), None);
    }

    #[test]
    fn test_bot_moving_channels_keeps_session() {
        let old = snapshot(BOT, Some(5));
        let new = snapshot(BOT, Some(6));
        assert_eq!(classify_voice_update(BOT, Some(&old), &new), None);
    }

    #[test]
    fn test_bot_muted_and_suppressed() {
        let old = snapshot(BOT, Some(5));

        let muted = VoiceSnapshot {
            self_mute: true,
            ..old
        };
        assert_eq!(
            classify_voice_update(BOT, Some(&old), &muted),
            Some(GatewayEvent::VoiceSelfMuted(GUILD))
        );
        // Already muted: no new transition.
        assert_eq!(classify_voice_update(BOT, Some(&muted), &muted), None);

        let suppressed = VoiceSnapshot {
            suppress: true,
            ..old
        };
        assert_eq!(
            classify_voice_update(BOT, Some(&old), &suppressed),
            Some(GatewayEvent::VoiceSelfSuppressed(GUILD))
        );
    }

    #[test]
    fn test_guild_delete() {
        assert_eq!(
            classify_guild_delete(GUILD, false),
            Some(GatewayEvent::GuildLeft(GUILD))
        );
        assert_eq!(classify_guild_delete(GUILD, true), None);
    }
}
