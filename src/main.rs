use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;

use crate::audio::{
    events::GatewayEvent, queue::SessionContext, registry::SessionRegistry,
    teardown::TeardownExecutor, voice::SongbirdGateway,
};
use crate::bot::NightFuryBot;
use crate::config::Config;
use crate::sources::TrackLoader;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nightfury=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("🎵 Starting NightFury v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let http = reqwest::Client::new();
    let songbird = Songbird::serenity();
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();

    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), http.clone(), playback_tx));
    let teardown = Arc::new(
        TeardownExecutor::new("music-teardown").context("Failed to start teardown thread")?,
    );
    let registry = Arc::new(SessionRegistry::new(SessionContext {
        gateway: gateway.clone(),
        teardown,
        max_queue_size: config.max_queue_size,
        default_volume: config.default_volume,
    }));
    let loader = Arc::new(TrackLoader::new(http, config.max_search_results));

    tokio::spawn(bot::events::pump_playback_events(registry.clone(), playback_rx));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = NightFuryBot::new(config.clone(), registry.clone(), loader);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    gateway.attach_cache(client.cache.clone());

    let shard_manager = client.shard_manager.clone();
    let signal_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error listening for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        signal_registry.handle_gateway(GatewayEvent::ShutdownRequested).await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    // No-op when the Ctrl+C path already ran it.
    registry.shutdown().await;

    Ok(())
}

async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing yt-dlp or ffmpeg");
    }
}
