use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    audio::{
        queue::{SessionQueue, SkipOutcome},
        track::Track,
    },
    bot::NightFuryBot,
    error::MusicError,
};

const SUCCESS: &str = "✅";
const WARNING: &str = "⚠️";
const ERROR: &str = "❌";

/// Lines shown by `/queue`.
const QUEUE_PAGE: usize = 10;

/// Handles slash commands
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &NightFuryBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return reply(ctx, &command, format!("{ERROR} Music commands only work in servers."), true)
            .await;
    };

    info!(
        "📝 Command /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        _ => {
            reply(ctx, &command, format!("{ERROR} Unknown command"), true).await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Missing query"))?
        .to_string();
    let count = int_option(command, "results").unwrap_or(1).max(1) as usize;

    let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return reply(ctx, command, not_in_voice_channel(), true).await;
    };

    if let Some(session) = bot.registry.get(guild_id).await {
        if session.channel_id() != channel_id {
            return reply(ctx, command, not_in_playing_channel(&session), true).await;
        }
    }

    // Loading can take a few seconds
    command.defer(&ctx.http).await?;

    let infos = match bot.loader.load(&query, count).await {
        Ok(infos) => infos,
        Err(MusicError::NoMatches(_)) => {
            return edit(ctx, command, format!("{WARNING} No results found for `{query}`.")).await;
        }
        Err(e) => {
            error!("Error loading {}: {}", query, e);
            return edit(ctx, command, format!("{ERROR} An error occurred: {e}.")).await;
        }
    };

    let tracks: Vec<Arc<Track>> = infos
        .into_iter()
        .map(|info| Arc::new(Track::new(info, guild_id, command.user.id)))
        .collect();

    let Some(first) = tracks.first().cloned() else {
        return edit(ctx, command, format!("{WARNING} No results found for `{query}`.")).await;
    };

    let content = if tracks.len() == 1 {
        let info = first.info().formatted();
        match bot.registry.add_track(guild_id, channel_id, first).await {
            Ok(0) => format!("{SUCCESS} Now playing {info}."),
            Ok(position) => format!("{SUCCESS} Added {info} at position {position} in the queue."),
            Err(e) => music_error(&e),
        }
    } else {
        let total = tracks.len();
        match bot.registry.add_tracks(guild_id, channel_id, tracks).await {
            Ok(added) => {
                let started = bot
                    .registry
                    .get(guild_id)
                    .await
                    .is_some_and(|session| session.current().id() == first.id());
                let skipped = if added < total {
                    format!(" ({} did not fit in the queue)", total - added)
                } else {
                    String::new()
                };

                if started {
                    format!("{SUCCESS} Now playing `{added}` tracks for **{query}**{skipped}.")
                } else {
                    format!("{SUCCESS} Added `{added}` tracks for **{query}**{skipped}.")
                }
            }
            Err(e) => music_error(&e),
        }
    };

    edit(ctx, command, content).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Err(content) = playing_session(ctx, command, bot, guild_id).await {
        return reply(ctx, command, content, true).await;
    }

    let content = match bot.registry.request_skip(guild_id, command.user.id).await {
        Ok(Some(SkipOutcome::Skipped {
            track,
            by_requester: true,
        })) => format!("{SUCCESS} Skipped {}", track.info().formatted()),
        Ok(Some(SkipOutcome::Skipped { track, .. })) => format!(
            "{SUCCESS} Skipped {} (Queued by: <@{}>)",
            track.info().formatted(),
            track.requester()
        ),
        Ok(Some(SkipOutcome::AlreadyVoted)) => {
            format!("{WARNING} You have already voted to skip this song!")
        }
        Ok(Some(SkipOutcome::Voted {
            track,
            votes,
            required,
        })) => format!(
            "{SUCCESS} Voted to skip {} (`{}/{}` votes, `{}` more needed to skip)",
            track.info().formatted(),
            votes,
            required,
            required - votes
        ),
        Ok(None) => not_playing(),
        Err(e) => music_error(&e),
    };

    reply(ctx, command, content, false).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Err(content) = playing_session(ctx, command, bot, guild_id).await {
        return reply(ctx, command, content, true).await;
    }

    let content = if bot.registry.stop(guild_id).await {
        format!("{SUCCESS} Stopped playing music!")
    } else {
        not_playing()
    };

    reply(ctx, command, content, false).await
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let session = match playing_session(ctx, command, bot, guild_id).await {
        Ok(session) => session,
        Err(content) => return reply(ctx, command, content, true).await,
    };

    let position = int_option(command, "position").unwrap_or(0);
    let len = session.len();
    if position < 1 || position as usize > len {
        let content = format!(
            "{ERROR} **Invalid position**\nTrack number must be between 1 and {}!",
            len
        );
        return reply(ctx, command, content, true).await;
    }

    let index = position as usize - 1;
    let user = command.user.id;
    let removed = if is_moderator(command) {
        session.remove_at(index).map(Some)
    } else {
        session.remove_if(index, |track| track.requester() == user)
    };

    let content = match removed {
        Ok(Some(track)) => format!(
            "{SUCCESS} Removed **{}** at position {}",
            track.info().title,
            position
        ),
        Ok(None) => {
            let content = format!(
                "{ERROR} The track position {} cannot be removed because you do not have permission to remove it.",
                position
            );
            return reply(ctx, command, content, true).await;
        }
        Err(e) => music_error(&e),
    };

    reply(ctx, command, content, false).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.registry.get(guild_id).await else {
        return reply(ctx, command, not_playing(), true).await;
    };

    reply(ctx, command, render_queue(&session.current(), &session.pending()), false).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.registry.get(guild_id).await else {
        return reply(ctx, command, not_playing(), true).await;
    };

    let content = render_now_playing(&session.current());
    reply(ctx, command, content, false).await
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let session = match playing_session(ctx, command, bot, guild_id).await {
        Ok(session) => session,
        Err(content) => return reply(ctx, command, content, true).await,
    };

    let content = match session.shuffle(command.user.id) {
        Ok(shuffled) if shuffled < 2 => {
            format!("{WARNING} You need at least 2 songs in the queue to shuffle!")
        }
        Ok(shuffled) => format!("{SUCCESS} Shuffled your {} songs.", shuffled),
        Err(e) => music_error(&e),
    };

    reply(ctx, command, content, false).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(level) = int_option(command, "level") else {
        let content = match bot.registry.get(guild_id).await {
            Some(session) => format!("🔊 Volume is at **{}%**", session.volume()),
            None => not_playing(),
        };
        return reply(ctx, command, content, false).await;
    };

    let session = match playing_session(ctx, command, bot, guild_id).await {
        Ok(session) => session,
        Err(content) => return reply(ctx, command, content, true).await,
    };

    let level = u8::try_from(level.max(0)).unwrap_or(u8::MAX);
    let content = match session.set_volume(level) {
        Ok(applied) => format!("{SUCCESS} Volume set to **{}%**", applied),
        Err(e) => music_error(&e),
    };

    reply(ctx, command, content, false).await
}

// Helpers

/// The guild's session, provided the caller is listening to it.
async fn playing_session(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &NightFuryBot,
    guild_id: GuildId,
) -> std::result::Result<Arc<SessionQueue>, String> {
    let session = bot.registry.get(guild_id).await.ok_or_else(not_playing)?;

    match user_voice_channel(ctx, guild_id, command.user.id) {
        Some(channel_id) if channel_id == session.channel_id() => Ok(session),
        _ => Err(not_in_playing_channel(&session)),
    }
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

fn is_moderator(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.manage_messages())
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

async fn reply(
    ctx: &Context,
    command: &CommandInteraction,
    content: String,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

fn not_playing() -> String {
    format!("{ERROR} I must be playing music to use that command!")
}

fn not_in_voice_channel() -> String {
    format!("{ERROR} You must be in a voice channel to use music commands!")
}

fn not_in_playing_channel(session: &SessionQueue) -> String {
    format!(
        "{ERROR} You must be in <#{}> to use music commands!",
        session.channel_id()
    )
}

fn music_error(error: &MusicError) -> String {
    match error {
        MusicError::QueueFull(max) => {
            format!("{WARNING} The queue is full ({max} songs). Try again later.")
        }
        MusicError::SessionClosed => not_playing(),
        MusicError::ShutDown => format!("{WARNING} Music is shutting down."),
        other => {
            error!("Music command failed: {}", other);
            format!("{ERROR} An error occurred: {other}.")
        }
    }
}

/// `/queue` body: the current track, then up to a page of pending ones.
fn render_now_playing(track: &Track) -> String {
    format!(
        "🎵 Now playing {} (Queued by: <@{}>, <t:{}:R>)\n{}",
        track.info().formatted(),
        track.requester(),
        track.requested_at().timestamp(),
        track.info().url
    )
}

fn render_queue(current: &Track, pending: &[Arc<Track>]) -> String {
    let mut lines = vec![format!("🎵 **Now playing:** {}", current.info().formatted())];

    if pending.is_empty() {
        lines.push("The queue is empty.".to_string());
    } else {
        lines.extend(
            pending
                .iter()
                .take(QUEUE_PAGE)
                .enumerate()
                .map(|(i, track)| {
                    format!("`{}.` {} <@{}>", i + 1, track.info().formatted(), track.requester())
                }),
        );
        if pending.len() > QUEUE_PAGE {
            lines.push(format!("...and {} more", pending.len() - QUEUE_PAGE));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::TrackInfo;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn track(title: &str, user: u64) -> Arc<Track> {
        let info = TrackInfo::new(title, "https://example.com").with_duration(Duration::from_secs(61));
        Arc::new(Track::new(info, GuildId::new(1), UserId::new(user)))
    }

    #[test]
    fn test_render_now_playing_shows_request_time() {
        let current = track("Now", 7);

        assert_eq!(
            render_now_playing(&current),
            format!(
                "🎵 Now playing **Now** (1:01) (Queued by: <@7>, <t:{}:R>)\nhttps://example.com",
                current.requested_at().timestamp()
            )
        );
    }

    #[test]
    fn test_render_queue_lists_pending_tracks() {
        let current = track("Now", 1);
        let pending = vec![track("A", 2), track("B", 3)];

        assert_eq!(
            render_queue(&current, &pending),
            "🎵 **Now playing:** **Now** (1:01)\n\
             `1.` **A** (1:01) <@2>\n\
             `2.` **B** (1:01) <@3>"
        );
    }

    #[test]
    fn test_render_queue_truncates() {
        let current = track("Now", 1);
        let pending: Vec<_> = (0..QUEUE_PAGE + 3).map(|i| track(&format!("T{i}"), 2)).collect();

        let rendered = render_queue(&current, &pending);
        assert_eq!(rendered.lines().count(), 1 + QUEUE_PAGE + 1);
        assert!(rendered.ends_with("...and 3 more"));
    }

    #[test]
    fn test_render_empty_queue() {
        let rendered = render_queue(&track("Now", 1), &[]);
        assert!(rendered.ends_with("The queue is empty."));
    }

    #[test]
    fn test_music_error_messages() {
        assert!(music_error(&MusicError::QueueFull(5)).contains("(5 songs)"));
        assert_eq!(music_error(&MusicError::SessionClosed), not_playing());
    }
}
