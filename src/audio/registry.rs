use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    events::{EndReason, GatewayEvent, PlaybackEvent},
    queue::{AdvanceOutcome, SessionContext, SessionQueue, SkipOutcome},
    track::{format_duration, Track},
};
use crate::error::{MusicError, Result};

type Slot = Arc<Mutex<Option<Arc<SessionQueue>>>>;

/// Owns every guild's music session.
///
/// Each guild gets one slot guarded by its own async mutex, so "is there a
/// session, else open one" is a single transaction per guild while other
/// guilds proceed independently. Slots are never removed from the map;
/// an empty slot simply means the guild is not playing.
pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    sessions: DashMap<GuildId, Slot>,
    shut_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            sessions: DashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Live session of `guild_id`, if any.
    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<SessionQueue>> {
        let slot = self.sessions.get(&guild_id)?.value().clone();
        let mut slot = slot.lock().await;
        live(&mut slot).cloned()
    }

    pub async fn contains(&self, guild_id: GuildId) -> bool {
        self.get(guild_id).await.is_some()
    }

    /// Number of guilds currently playing.
    pub async fn active_sessions(&self) -> usize {
        let mut active = 0;
        for slot in self.slots() {
            if live(&mut *slot.lock().await).is_some() {
                active += 1;
            }
        }
        active
    }

    /// Queues `track` for `guild_id`.
    ///
    /// Without a session this joins `channel_id`, starts the track right
    /// away and returns 0. Otherwise the track is appended and its 1-based
    /// queue position returned.
    pub async fn add_track(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Arc<Track>,
    ) -> Result<usize> {
        let slot = self.slot(guild_id);
        let mut slot = slot.lock().await;
        self.ensure_running()?;

        if let Some(session) = live(&mut slot).cloned() {
            match session.enqueue(track.clone()) {
                // Closed between the check and the enqueue; start over.
                Err(MusicError::SessionClosed) => *slot = None,
                other => return other,
            }
        }

        self.open(&mut slot, guild_id, channel_id, track).await?;
        Ok(0)
    }

    /// Queues a batch in order, back to back.
    ///
    /// Returns how many tracks were accepted, counting one that started
    /// playing right away.
    pub async fn add_tracks(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        tracks: Vec<Arc<Track>>,
    ) -> Result<usize> {
        let mut tracks = tracks.into_iter();
        let Some(first) = tracks.next() else {
            return Err(MusicError::EmptyBatch);
        };

        let slot = self.slot(guild_id);
        let mut slot = slot.lock().await;
        self.ensure_running()?;

        if let Some(session) = live(&mut slot).cloned() {
            match session.enqueue_all(std::iter::once(first.clone()).chain(tracks.clone())) {
                Err(MusicError::SessionClosed) => *slot = None,
                other => return other,
            }
        }

        let session = self.open(&mut slot, guild_id, channel_id, first).await?;
        Ok(1 + session.enqueue_all(tracks)?)
    }

    /// Closes and forgets the guild's session. Returns whether one existed.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        let Some(slot) = self.sessions.get(&guild_id).map(|s| s.value().clone()) else {
            return false;
        };

        let session = slot.lock().await.take();
        match session {
            Some(session) => {
                let was_open = !session.is_closed();
                session.close();
                info!("⏹️ Stopped music in guild {}", guild_id);
                was_open
            }
            None => false,
        }
    }

    /// Runs the skip command for `user`, dropping the session if the skip
    /// emptied it. `None` when the guild is not playing.
    pub async fn request_skip(&self, guild_id: GuildId, user: UserId) -> Result<Option<SkipOutcome>> {
        let Some(slot) = self.sessions.get(&guild_id).map(|s| s.value().clone()) else {
            return Ok(None);
        };

        let mut slot = slot.lock().await;
        let Some(session) = live(&mut slot).cloned() else {
            return Ok(None);
        };

        let outcome = session.request_skip(user)?;
        if session.is_closed() {
            *slot = None;
        }
        Ok(Some(outcome))
    }

    /// Reacts to a track lifecycle callback from the audio backend.
    pub async fn handle_playback(&self, event: PlaybackEvent) {
        let track = event.track().clone();
        match event {
            PlaybackEvent::Started { .. } => {
                debug!("Track Started | {}", describe(&track));
                if let Some(session) = self.get(track.guild_id()).await {
                    session.mark_started(track.id());
                }
            }
            PlaybackEvent::Ended { reason, .. } => {
                debug!("Track {} | {}", reason, describe(&track));
                if reason.may_start_next() {
                    self.on_track_finished(&track).await;
                } else if reason == EndReason::LoadFailed {
                    self.on_load_failed(&track).await;
                }
            }
            PlaybackEvent::Exception { message, .. } => {
                error!("Track Exception | {} | {}", describe(&track), message);
            }
            PlaybackEvent::Stuck { threshold, .. } => {
                warn!("Track Stuck | {} | {}ms", describe(&track), threshold.as_millis());
            }
        }
    }

    /// Reacts to gateway events that end sessions.
    pub async fn handle_gateway(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::GuildLeft(guild_id)
            | GatewayEvent::VoiceSelfLeft(guild_id)
            | GatewayEvent::VoiceSelfMuted(guild_id)
            | GatewayEvent::VoiceSelfSuppressed(guild_id) => {
                debug!("{:?} received, stopping session", event);
                self.stop(guild_id).await;
            }
            GatewayEvent::ShutdownRequested => self.shutdown().await,
        }
    }

    /// Closes every session, drains the teardown executor and releases the
    /// voice backend. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut closed = 0;
        for slot in self.slots() {
            if let Some(session) = slot.lock().await.take() {
                session.close();
                closed += 1;
            }
        }
        info!("⚠️ Closed {} music sessions for shutdown", closed);

        let teardown = self.ctx.teardown.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || teardown.shutdown()).await {
            error!("Error draining teardown executor: {:?}", e);
        }

        self.ctx.gateway.shutdown().await;
    }

    async fn on_track_finished(&self, track: &Track) {
        let Some(slot) = self.sessions.get(&track.guild_id()).map(|s| s.value().clone()) else {
            return;
        };

        let mut slot = slot.lock().await;
        let Some(session) = live(&mut slot).cloned() else {
            return;
        };

        match session.finish(track.id()) {
            AdvanceOutcome::Next(next) => {
                debug!("Advanced to {} in guild {}", next.info().title, track.guild_id());
            }
            AdvanceOutcome::Exhausted => *slot = None,
            AdvanceOutcome::Ignored => {
                debug!("Ignoring end of {} (no longer current)", track.id());
            }
        }
    }

    async fn on_load_failed(&self, track: &Track) {
        let Some(slot) = self.sessions.get(&track.guild_id()).map(|s| s.value().clone()) else {
            return;
        };

        let mut slot = slot.lock().await;
        let Some(session) = live(&mut slot).cloned() else {
            return;
        };

        // A session whose very first track never loaded has nothing valid to play.
        if !session.has_started() && session.current().id() == track.id() {
            warn!(
                "First track failed to load in guild {}, discarding session",
                track.guild_id()
            );
            session.close();
            *slot = None;
        }
    }

    async fn open(
        &self,
        slot: &mut Option<Arc<SessionQueue>>,
        guild_id: GuildId,
        channel_id: ChannelId,
        first: Arc<Track>,
    ) -> Result<Arc<SessionQueue>> {
        if slot.is_some() {
            return Err(MusicError::SessionConflict(guild_id));
        }

        let connection = self.ctx.gateway.connect(guild_id, channel_id).await?;
        let session = Arc::new(SessionQueue::new(
            guild_id,
            channel_id,
            connection,
            first,
            self.ctx.clone(),
        ));
        *slot = Some(session.clone());

        info!("🔊 Started music session in guild {} (channel {})", guild_id, channel_id);
        Ok(session)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(MusicError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn slot(&self, guild_id: GuildId) -> Slot {
        self.sessions.entry(guild_id).or_default().clone()
    }

    fn slots(&self) -> Vec<Slot> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// The slot's session if it is still open; forgets closed ones.
fn live(slot: &mut Option<Arc<SessionQueue>>) -> Option<&Arc<SessionQueue>> {
    if slot.as_ref().is_some_and(|s| s.is_closed()) {
        *slot = None;
    }
    slot.as_ref()
}

fn describe(track: &Track) -> String {
    let length = track
        .info()
        .duration
        .map(format_duration)
        .unwrap_or_else(|| "Live".to_string());
    format!("Title: {} | Length: {}", track.info().title, length)
}
