//! Songbird-backed implementation of the voice seams.
//!
//! Songbird drives its own mixer, so the player here is a small actor task
//! that owns the current [`TrackHandle`] and turns synchronous session calls
//! into driver commands. Track lifecycle events flow back to the registry
//! through an unbounded channel.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId, UserId},
};
use songbird::{
    input::YoutubeDl,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, OnceLock,
};
use tokio::{
    runtime::Handle,
    sync::{mpsc::UnboundedSender, Mutex},
};
use tracing::{debug, error, info, warn};

use super::{
    backend::{AudioFrame, AudioPlayer, ConnectionId, VoiceConnection, VoiceGateway},
    events::{EndReason, PlaybackEvent},
    track::Track,
};
use crate::error::{MusicError, Result};

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    runtime: Handle,
    cache: OnceLock<Arc<Cache>>,
    events: UnboundedSender<PlaybackEvent>,
    calls: DashMap<GuildId, (ConnectionId, Arc<Mutex<Call>>)>,
}

impl SongbirdGateway {
    /// Must be built inside the tokio runtime that will drive the players.
    pub fn new(
        manager: Arc<Songbird>,
        http: reqwest::Client,
        events: UnboundedSender<PlaybackEvent>,
    ) -> Self {
        Self {
            manager,
            http,
            runtime: Handle::current(),
            cache: OnceLock::new(),
            events,
            calls: DashMap::new(),
        }
    }

    /// The serenity cache only exists once the client is built.
    pub fn attach_cache(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            warn!("Voice gateway cache was already attached");
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceConnection> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))?;

        let player = SongbirdPlayer::spawn(
            guild_id,
            call.clone(),
            self.http.clone(),
            self.events.clone(),
            &self.runtime,
        );
        let connection = VoiceConnection::new(player);
        self.calls.insert(guild_id, (connection.id, call));
        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);

        Ok(connection)
    }

    fn disconnect(&self, guild_id: GuildId, connection: ConnectionId) -> Result<()> {
        // A newer session may already own the guild's call.
        if self
            .calls
            .remove_if(&guild_id, |_, (current, _)| *current == connection)
            .is_none()
        {
            debug!("Skipping disconnect of stale connection in guild {}", guild_id);
            return Ok(());
        }
        let manager = self.manager.clone();

        // Inline teardown can land on a runtime worker, where block_on panics.
        if Handle::try_current().is_ok() {
            self.runtime.spawn(async move {
                if let Err(e) = manager.remove(guild_id).await {
                    debug!("Voice connection for guild {} already gone: {}", guild_id, e);
                }
            });
            return Ok(());
        }

        self.runtime
            .block_on(manager.remove(guild_id))
            .map_err(|e| MusicError::Connection(e.to_string()))?;
        info!("👋 Disconnected from voice in guild {}", guild_id);
        Ok(())
    }

    fn listeners(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId> {
        let Some(cache) = self.cache.get() else {
            return Vec::new();
        };
        let Some(guild) = cache.guild(guild_id) else {
            return Vec::new();
        };

        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| {
                let is_bot = state
                    .member
                    .as_ref()
                    .map(|member| member.user.bot)
                    .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .map(|state| state.user_id)
            .collect()
    }

    async fn shutdown(&self) {
        let remaining: Vec<GuildId> = self.calls.iter().map(|entry| *entry.key()).collect();
        for guild_id in remaining {
            self.calls.remove(&guild_id);
            if let Err(e) = self.manager.remove(guild_id).await {
                debug!("Voice connection for guild {} already gone: {}", guild_id, e);
            }
        }
        info!("🔌 Voice gateway shut down");
    }
}

enum PlayerCommand {
    Play(Arc<Track>),
    Stop,
    Volume(u8),
    Destroy,
}

/// Per-guild player; every call is a non-blocking send to the driver task.
pub struct SongbirdPlayer {
    guild_id: GuildId,
    commands: flume::Sender<PlayerCommand>,
    volume: AtomicU8,
}

/// Set once the player is destroyed, so later stops read as cleanup.
type TornDown = Arc<AtomicBool>;

impl SongbirdPlayer {
    fn spawn(
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        http: reqwest::Client,
        events: UnboundedSender<PlaybackEvent>,
        runtime: &Handle,
    ) -> Arc<Self> {
        let (commands, receiver) = flume::unbounded();
        runtime.spawn(drive_player(guild_id, call, http, events, receiver));

        Arc::new(Self {
            guild_id,
            commands,
            volume: AtomicU8::new(100),
        })
    }

    fn send(&self, command: PlayerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Player for guild {} is gone, dropping command", self.guild_id);
        }
    }
}

impl AudioPlayer for SongbirdPlayer {
    fn play_track(&self, track: Arc<Track>) {
        self.send(PlayerCommand::Play(track));
    }

    fn stop_track(&self) {
        self.send(PlayerCommand::Stop);
    }

    /// Songbird pulls audio through its own mixer.
    fn provide(&self) -> Option<AudioFrame> {
        None
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(volume, Ordering::Relaxed);
        self.send(PlayerCommand::Volume(volume));
    }

    fn destroy(&self) {
        self.send(PlayerCommand::Destroy);
    }
}

async fn drive_player(
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    events: UnboundedSender<PlaybackEvent>,
    commands: flume::Receiver<PlayerCommand>,
) {
    let mut current: Option<TrackHandle> = None;
    let mut gain = 1.0_f32;

    let torn_down = TornDown::default();

    while let Ok(command) = commands.recv_async().await {
        match command {
            PlayerCommand::Play(track) => {
                if let Some(handle) = current.take() {
                    let _ = handle.stop();
                }

                let input = YoutubeDl::new(http.clone(), track.info().url.clone());
                let handle = call.lock().await.play_input(input.into());
                let _ = handle.set_volume(gain);
                watch_track(&handle, track, &events, &torn_down);
                current = Some(handle);
            }
            PlayerCommand::Stop => {
                if let Some(handle) = current.take() {
                    let _ = handle.stop();
                }
            }
            PlayerCommand::Volume(volume) => {
                gain = f32::from(volume) / 100.0;
                if let Some(handle) = &current {
                    let _ = handle.set_volume(gain);
                }
            }
            PlayerCommand::Destroy => break,
        }
    }

    torn_down.store(true, Ordering::SeqCst);
    // Only this player's own track; the call may already serve a newer session.
    if let Some(handle) = current.take() {
        let _ = handle.stop();
    }
    debug!("Player for guild {} destroyed", guild_id);
}

fn watch_track(
    handle: &TrackHandle,
    track: Arc<Track>,
    events: &UnboundedSender<PlaybackEvent>,
    torn_down: &TornDown,
) {
    for kind in [TrackEvent::Play, TrackEvent::End, TrackEvent::Error] {
        let notifier = TrackNotifier {
            kind,
            track: track.clone(),
            events: events.clone(),
            torn_down: torn_down.clone(),
        };
        if let Err(e) = handle.add_event(Event::Track(kind), notifier) {
            error!("Error registering track event handler: {:?}", e);
        }
    }
}

/// Forwards one songbird track event as a [`PlaybackEvent`].
struct TrackNotifier {
    kind: TrackEvent,
    track: Arc<Track>,
    events: UnboundedSender<PlaybackEvent>,
    torn_down: TornDown,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(states) = ctx else {
            return None;
        };

        let torn_down = self.torn_down.load(Ordering::SeqCst);
        for (state, _) in states.iter() {
            for event in translate(self.kind, &state.playing, &self.track, torn_down) {
                let _ = self.events.send(event);
            }
        }
        None
    }
}

fn translate(kind: TrackEvent, mode: &PlayMode, track: &Arc<Track>, torn_down: bool) -> Vec<PlaybackEvent> {
    let track = track.clone();
    match (kind, mode) {
        (TrackEvent::Play, _) => vec![PlaybackEvent::Started { track }],
        (TrackEvent::Error, PlayMode::Errored(e)) => vec![
            PlaybackEvent::Exception {
                track: track.clone(),
                message: e.to_string(),
            },
            PlaybackEvent::Ended {
                track,
                reason: EndReason::LoadFailed,
            },
        ],
        (TrackEvent::End, mode) => match end_reason(mode, torn_down) {
            Some(reason) => vec![PlaybackEvent::Ended { track, reason }],
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Errored tracks are reported by the error notifier instead.
fn end_reason(mode: &PlayMode, torn_down: bool) -> Option<EndReason> {
    match mode {
        PlayMode::End => Some(EndReason::Finished),
        PlayMode::Stop if torn_down => Some(EndReason::Cleanup),
        PlayMode::Stop => Some(EndReason::Stopped),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing;

    #[test]
    fn test_end_reason_mapping() {
        assert_eq!(end_reason(&PlayMode::End, false), Some(EndReason::Finished));
        assert_eq!(end_reason(&PlayMode::Stop, false), Some(EndReason::Stopped));
        assert_eq!(end_reason(&PlayMode::Play, false), None);
        assert_eq!(end_reason(&PlayMode::Pause, false), None);
    }

    #[test]
    fn test_stop_after_destroy_is_cleanup() {
        assert_eq!(end_reason(&PlayMode::Stop, true), Some(EndReason::Cleanup));
        // A track that ran out on its own still finished.
        assert_eq!(end_reason(&PlayMode::End, true), Some(EndReason::Finished));

        let track = testing::track("a", GuildId::new(1), UserId::new(2));
        let cleaned = translate(TrackEvent::End, &PlayMode::Stop, &track, true);
        assert!(matches!(
            cleaned.as_slice(),
            [PlaybackEvent::Ended { reason: EndReason::Cleanup, .. }]
        ));
    }

    #[test]
    fn test_translate_play_and_end() {
        let track = testing::track("a", GuildId::new(1), UserId::new(2));

        let started = translate(TrackEvent::Play, &PlayMode::Play, &track, false);
        assert!(matches!(started.as_slice(), [PlaybackEvent::Started { .. }]));

        let ended = translate(TrackEvent::End, &PlayMode::End, &track, false);
        assert!(matches!(
            ended.as_slice(),
            [PlaybackEvent::Ended { reason: EndReason::Finished, .. }]
        ));

        let stopped = translate(TrackEvent::End, &PlayMode::Stop, &track, false);
        assert!(matches!(
            stopped.as_slice(),
            [PlaybackEvent::Ended { reason: EndReason::Stopped, .. }]
        ));
    }

    #[test]
    fn test_translate_ignores_unrelated_events() {
        let track = testing::track("a", GuildId::new(1), UserId::new(2));
        assert!(translate(TrackEvent::Pause, &PlayMode::Pause, &track, false).is_empty());
        assert!(translate(TrackEvent::End, &PlayMode::Play, &track, false).is_empty());
    }
}
