use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId, permissions::Permissions},
    prelude::Context,
};

use crate::audio::backend::MAX_VOLUME;

fn all_commands(max_search_results: usize) -> Vec<CreateCommand> {
    vec![
        play_command(max_search_results),
        skip_command(),
        stop_command(),
        remove_command(),
        queue_command(),
        nowplaying_command(),
        shuffle_command(),
        volume_command(),
    ]
}

/// Registers commands globally
pub async fn register_global_commands(ctx: &Context, max_search_results: usize) -> Result<()> {
    for command in all_commands(max_search_results) {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers commands on a single guild (development)
pub async fn register_guild_commands(
    ctx: &Context,
    guild_id: GuildId,
    max_search_results: usize,
) -> Result<()> {
    guild_id
        .set_commands(&ctx.http, all_commands(max_search_results))
        .await?;

    Ok(())
}

fn play_command(max_search_results: usize) -> CreateCommand {
    CreateCommand::new("play")
        .description("Plays a song from a URL or a search")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "results",
                "How many search results to queue",
            )
            .required(false)
            .min_int_value(1)
            .max_int_value(max_search_results as u64),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Votes to skip the current song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop")
        .description("Stops the music and clears the queue")
        .default_member_permissions(Permissions::MANAGE_MESSAGES)
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Removes a song from the queue")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Position in the queue",
            )
            .required(true)
            .min_int_value(1),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Shows the queue")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Shows the current song")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffles the songs you queued")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Shows or sets the volume")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume level (0-150)")
                .required(false)
                .min_int_value(0)
                .max_int_value(u64::from(MAX_VOLUME)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_is_registered() {
        let names: Vec<String> = all_commands(5)
            .iter()
            .map(|command| {
                serde_json::to_value(command).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();

        assert_eq!(
            names,
            ["play", "skip", "stop", "remove", "queue", "nowplaying", "shuffle", "volume"]
        );
    }
}
