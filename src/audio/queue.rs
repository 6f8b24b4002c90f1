use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info};

use super::{
    backend::{AudioFrame, AudioPlayer, ConnectionId, VoiceConnection, VoiceGateway, MAX_VOLUME},
    teardown::TeardownExecutor,
    track::{Track, TrackId},
};
use crate::error::{MusicError, Result};

/// Collaborators shared by every session a registry opens.
pub struct SessionContext {
    pub gateway: Arc<dyn VoiceGateway>,
    pub teardown: Arc<TeardownExecutor>,
    pub max_queue_size: usize,
    pub default_volume: u8,
}

/// What the skip command decided for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    /// The current track was skipped.
    Skipped { track: Arc<Track>, by_requester: bool },
    /// This listener already voted for the current track.
    AlreadyVoted,
    /// Vote recorded; not enough votes yet.
    Voted { track: Arc<Track>, votes: usize, required: usize },
}

/// Result of reacting to a finished track.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Next(Arc<Track>),
    /// The queue ran dry and the session closed.
    Exhausted,
    /// The event was about a track that is no longer current, or the
    /// session is already closed.
    Ignored,
}

struct QueueState {
    current: Arc<Track>,
    pending: VecDeque<Arc<Track>>,
    skip_votes: HashSet<UserId>,
    finished: bool,
    started: bool,
}

/// Playback state of one guild's voice connection.
///
/// Holds the track being rendered plus the FIFO of tracks waiting behind
/// it, and the skip votes cast against the current track. Once closed a
/// queue stays closed; every mutating call then fails with
/// [`MusicError::SessionClosed`].
pub struct SessionQueue {
    guild_id: GuildId,
    channel_id: ChannelId,
    connection: ConnectionId,
    player: Arc<dyn AudioPlayer>,
    ctx: Arc<SessionContext>,
    state: Mutex<QueueState>,
    closed: AtomicBool,
    // Kept apart from `state` so the 20ms frame pull never waits on queue edits.
    last_frame: Mutex<Option<AudioFrame>>,
}

impl SessionQueue {
    /// Builds the session and starts rendering `first` right away.
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        connection: VoiceConnection,
        first: Arc<Track>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        let VoiceConnection { id, player } = connection;
        player.set_volume(ctx.default_volume.min(MAX_VOLUME));
        player.play_track(first.clone());

        Self {
            guild_id,
            channel_id,
            connection: id,
            player,
            ctx,
            state: Mutex::new(QueueState {
                current: first,
                pending: VecDeque::new(),
                skip_votes: HashSet::new(),
                finished: false,
                started: false,
            }),
            closed: AtomicBool::new(false),
            last_frame: Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The track being rendered (the last one, once closed).
    pub fn current(&self) -> Arc<Track> {
        self.state.lock().current.clone()
    }

    /// Snapshot of the pending tracks in playback order.
    pub fn pending(&self) -> Vec<Arc<Track>> {
        self.state.lock().pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// 1-based queue position of a pending track.
    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        self.state
            .lock()
            .pending
            .iter()
            .position(|track| track.id() == id)
            .map(|index| index + 1)
    }

    /// Appends a track and returns its 1-based position.
    pub fn enqueue(&self, track: Arc<Track>) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        if state.pending.len() >= self.ctx.max_queue_size {
            return Err(MusicError::QueueFull(self.ctx.max_queue_size));
        }

        debug!("➕ Queued {} in guild {}", track.info().title, self.guild_id);
        state.pending.push_back(track);
        Ok(state.pending.len())
    }

    /// Appends a batch back to back, as far as capacity allows.
    ///
    /// Returns how many tracks were queued.
    pub fn enqueue_all(&self, tracks: impl IntoIterator<Item = Arc<Track>>) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let available = self.ctx.max_queue_size.saturating_sub(state.pending.len());
        let before = state.pending.len();
        state.pending.extend(tracks.into_iter().take(available));
        let added = state.pending.len() - before;

        info!("➕ Queued {} tracks in guild {}", added, self.guild_id);
        Ok(added)
    }

    /// Moves to the next pending track, closing the session when there is
    /// none. Returns the new current track.
    pub fn advance(&self) -> Option<Arc<Track>> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return None;
        }

        let next = self.advance_locked(&mut state);
        drop(state);

        if next.is_none() {
            self.release();
        }
        next
    }

    /// Reacts to `track` having played to its end.
    pub fn finish(&self, track: TrackId) -> AdvanceOutcome {
        let mut state = self.state.lock();
        if self.is_closed() || state.current.id() != track {
            return AdvanceOutcome::Ignored;
        }

        state.finished = true;
        let next = self.advance_locked(&mut state);
        drop(state);

        match next {
            Some(next) => AdvanceOutcome::Next(next),
            None => {
                self.release();
                AdvanceOutcome::Exhausted
            }
        }
    }

    /// Records that the backend began rendering `track`.
    pub fn mark_started(&self, track: TrackId) {
        let mut state = self.state.lock();
        if state.current.id() == track {
            state.started = true;
        }
    }

    /// Whether any track of this session ever started rendering.
    pub fn has_started(&self) -> bool {
        self.state.lock().started
    }

    /// Force-stops the current track and advances. Returns the skipped track.
    pub fn skip(&self) -> Result<Arc<Track>> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let (skipped, next) = self.skip_locked(&mut state);
        drop(state);

        if next.is_none() {
            self.release();
        }
        Ok(skipped)
    }

    /// Removes the pending track at the 0-based `index`.
    pub fn remove_at(&self, index: usize) -> Result<Arc<Track>> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let len = state.pending.len();
        let track = state
            .pending
            .remove(index)
            .ok_or(MusicError::IndexOutOfRange { index, len })?;

        debug!("❌ Removed {} at position {}", track.info().title, index + 1);
        Ok(track)
    }

    /// Removes the pending track at `index` only if `allowed` accepts it.
    ///
    /// The check and the removal share one critical section, so a
    /// concurrent edit cannot slide another track under the index.
    /// Returns `Ok(None)` when the track was refused.
    pub fn remove_if(
        &self,
        index: usize,
        allowed: impl FnOnce(&Track) -> bool,
    ) -> Result<Option<Arc<Track>>> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let len = state.pending.len();
        let candidate = state
            .pending
            .get(index)
            .ok_or(MusicError::IndexOutOfRange { index, len })?;
        if !allowed(candidate) {
            return Ok(None);
        }

        let track = state.pending.remove(index);
        if let Some(track) = &track {
            debug!("❌ Removed {} at position {}", track.info().title, index + 1);
        }
        Ok(track)
    }

    /// Shuffles the pending tracks requested by `user` among the slots
    /// they already occupy. Everyone else's tracks stay where they are.
    pub fn shuffle(&self, user: UserId) -> Result<usize> {
        let mut state = self.state.lock();
        self.ensure_open()?;

        let slots: Vec<usize> = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, track)| track.requester() == user)
            .map(|(index, _)| index)
            .collect();

        let mut tracks: Vec<Arc<Track>> = slots.iter().map(|&i| state.pending[i].clone()).collect();
        tracks.shuffle(&mut rand::thread_rng());

        for (slot, track) in slots.iter().zip(tracks) {
            state.pending[*slot] = track;
        }

        Ok(slots.len())
    }

    /// Non-bot members of the session's voice channel.
    pub fn listeners(&self) -> Vec<UserId> {
        self.ctx.gateway.listeners(self.guild_id, self.channel_id)
    }

    /// Votes needed to skip: half the listeners, rounded up.
    pub fn required_skip_votes(&self) -> usize {
        required_votes(self.listeners().len())
    }

    /// Current vote count, after dropping voters who left the channel.
    pub fn skip_votes(&self) -> usize {
        let listeners = self.listeners();
        let mut state = self.state.lock();
        prune_votes(&mut state.skip_votes, &listeners)
    }

    pub fn is_skipping(&self, user: UserId) -> bool {
        self.state.lock().skip_votes.contains(&user)
    }

    /// Records a vote against the current track and returns the count.
    pub fn vote_skip(&self, user: UserId) -> Result<usize> {
        let listeners = self.listeners();
        let mut state = self.state.lock();
        self.ensure_open()?;

        state.skip_votes.insert(user);
        Ok(prune_votes(&mut state.skip_votes, &listeners))
    }

    /// Applies the skip command's rules for `user` in one critical section.
    pub fn request_skip(&self, user: UserId) -> Result<SkipOutcome> {
        let listeners = self.listeners();
        let required = required_votes(listeners.len());

        let mut state = self.state.lock();
        self.ensure_open()?;

        let by_requester = state.current.requester() == user;
        if !by_requester && required > 1 {
            if state.skip_votes.contains(&user) {
                return Ok(SkipOutcome::AlreadyVoted);
            }

            state.skip_votes.insert(user);
            let votes = prune_votes(&mut state.skip_votes, &listeners);
            if votes < required {
                return Ok(SkipOutcome::Voted {
                    track: state.current.clone(),
                    votes,
                    required,
                });
            }
        }

        let (skipped, next) = self.skip_locked(&mut state);
        drop(state);

        if next.is_none() {
            self.release();
        }
        Ok(SkipOutcome::Skipped {
            track: skipped,
            by_requester,
        })
    }

    pub fn volume(&self) -> u8 {
        self.player.volume()
    }

    /// Sets the volume, clamped to [`MAX_VOLUME`]. Returns the applied value.
    pub fn set_volume(&self, volume: u8) -> Result<u8> {
        self.ensure_open()?;
        let volume = volume.min(MAX_VOLUME);
        self.player.set_volume(volume);
        Ok(volume)
    }

    /// Whether a frame is ready. Called every 20ms by the transport.
    pub fn can_provide(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(mut slot) = self.last_frame.try_lock() else {
            return false;
        };

        match self.player.provide() {
            Some(frame) => {
                *slot = Some(frame);
                true
            }
            None => false,
        }
    }

    /// Hands out the frame staged by [`Self::can_provide`].
    pub fn provide_frame(&self) -> Option<AudioFrame> {
        self.last_frame.try_lock().and_then(|mut slot| slot.take())
    }

    /// Stops rendering and releases the voice connection. Idempotent.
    pub fn close(&self) {
        {
            let _state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.release();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MusicError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Pops the next track into `current`. On an empty queue marks the
    /// session closed; the caller then owes a [`Self::release`].
    fn advance_locked(&self, state: &mut QueueState) -> Option<Arc<Track>> {
        match state.pending.pop_front() {
            Some(next) => {
                if !state.finished {
                    self.player.stop_track();
                }
                state.current = next.clone();
                state.finished = false;
                state.skip_votes.clear();
                self.player.play_track(next.clone());
                info!("🎵 Now playing {} in guild {}", next.info().title, self.guild_id);
                Some(next)
            }
            None => {
                self.closed.store(true, Ordering::Release);
                info!("📭 Queue exhausted in guild {}", self.guild_id);
                None
            }
        }
    }

    fn skip_locked(&self, state: &mut QueueState) -> (Arc<Track>, Option<Arc<Track>>) {
        let skipped = state.current.clone();
        if !state.finished {
            self.player.stop_track();
            state.finished = true;
        }
        info!("⏭️ Skipped {} in guild {}", skipped.info().title, self.guild_id);
        (skipped, self.advance_locked(state))
    }

    /// Destroys the player and hands the disconnect to the teardown thread.
    fn release(&self) {
        *self.last_frame.lock() = None;
        self.player.destroy();

        let gateway = self.ctx.gateway.clone();
        let guild_id = self.guild_id;
        let connection = self.connection;
        self.ctx.teardown.submit(move || {
            if let Err(e) = gateway.disconnect(guild_id, connection) {
                error!("Error closing voice connection in guild {}: {}", guild_id, e);
            }
        });

        info!("⏹️ Session closed in guild {}", self.guild_id);
    }
}

impl fmt::Display for SessionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "SessionQueue(VC: {}, Queued: {}, Now Playing: {})",
            self.channel_id,
            state.pending.len(),
            state.current.info().title
        )
    }
}

/// `total / 2`, plus one when `total` is odd.
pub fn required_votes(total: usize) -> usize {
    if total % 2 == 0 {
        total / 2
    } else {
        total / 2 + 1
    }
}

fn prune_votes(votes: &mut HashSet<UserId>, listeners: &[UserId]) -> usize {
    votes.retain(|voter| listeners.contains(voter));
    votes.len()
}
