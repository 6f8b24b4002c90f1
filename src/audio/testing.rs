//! Fakes for the voice seams, shared by the audio tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use super::{
    backend::{AudioFrame, AudioPlayer, ConnectionId, VoiceConnection, VoiceGateway},
    queue::SessionContext,
    teardown::TeardownExecutor,
    track::{Track, TrackId, TrackInfo},
};
use crate::error::{MusicError, Result};

pub fn track(title: &str, guild_id: GuildId, requester: UserId) -> Arc<Track> {
    let info = TrackInfo::new(title, format!("https://example.com/{title}"));
    Arc::new(Track::new(info, guild_id, requester))
}

pub fn context_parts(gateway: &Arc<FakeGateway>) -> SessionContext {
    SessionContext {
        gateway: gateway.clone(),
        teardown: gateway.teardown.clone(),
        max_queue_size: 1000,
        default_volume: 100,
    }
}

pub fn context(gateway: &Arc<FakeGateway>) -> Arc<SessionContext> {
    Arc::new(context_parts(gateway))
}

#[derive(Default)]
pub struct FakePlayer {
    played: Mutex<Vec<TrackId>>,
    stops: AtomicUsize,
    destroyed: AtomicBool,
    volume: AtomicU8,
    frames: Mutex<VecDeque<AudioFrame>>,
}

impl FakePlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn played(&self) -> Vec<TrackId> {
        self.played.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn push_frame(&self, frame: AudioFrame) {
        self.frames.lock().push_back(frame);
    }
}

impl AudioPlayer for FakePlayer {
    fn play_track(&self, track: Arc<Track>) {
        self.played.lock().push(track.id());
    }

    fn stop_track(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn provide(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(volume, Ordering::SeqCst);
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeGateway {
    teardown: Arc<TeardownExecutor>,
    listeners: Mutex<Vec<UserId>>,
    players: Mutex<Vec<(GuildId, Arc<FakePlayer>)>>,
    connects: AtomicUsize,
    active: Mutex<HashMap<GuildId, ConnectionId>>,
    disconnects: Mutex<Vec<GuildId>>,
    disconnect_threads: Mutex<Vec<Option<String>>>,
    stale_disconnects: AtomicUsize,
    fail_connect: AtomicBool,
    shut_down: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            teardown: Arc::new(TeardownExecutor::new("test-teardown").expect("spawn teardown")),
            listeners: Mutex::new(Vec::new()),
            players: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            active: Mutex::new(HashMap::new()),
            disconnects: Mutex::new(Vec::new()),
            disconnect_threads: Mutex::new(Vec::new()),
            stale_disconnects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn teardown(&self) -> Arc<TeardownExecutor> {
        self.teardown.clone()
    }

    pub fn set_listeners(&self, listeners: Vec<UserId>) {
        *self.listeners.lock() = listeners;
    }

    pub fn fail_connects(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Player handed out by the most recent connect to `guild_id`.
    pub fn player(&self, guild_id: GuildId) -> Option<Arc<FakePlayer>> {
        self.players
            .lock()
            .iter()
            .rev()
            .find(|(guild, _)| *guild == guild_id)
            .map(|(_, player)| player.clone())
    }

    /// Makes `player` the live connection for `guild_id`, replacing any other.
    pub fn register(&self, guild_id: GuildId, player: Arc<dyn AudioPlayer>) -> VoiceConnection {
        let connection = VoiceConnection::new(player);
        self.active.lock().insert(guild_id, connection.id);
        connection
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.active.lock().contains_key(&guild_id)
    }

    /// Runs every queued disconnect before returning.
    pub fn drain_teardown(&self) {
        self.teardown.shutdown();
    }

    /// Guilds whose live connection was actually torn down.
    pub fn disconnects(&self) -> Vec<GuildId> {
        self.disconnects.lock().clone()
    }

    /// Name of the thread each disconnect call ran on, stale ones included.
    pub fn disconnect_threads(&self) -> Vec<Option<String>> {
        self.disconnect_threads.lock().clone()
    }

    pub fn stale_disconnects(&self) -> usize {
        self.stale_disconnects.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(&self, guild_id: GuildId, _channel_id: ChannelId) -> Result<VoiceConnection> {
        // Give racing callers a chance to interleave.
        tokio::task::yield_now().await;

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MusicError::Connection("refused".to_string()));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let player = FakePlayer::new();
        self.players.lock().push((guild_id, player.clone()));
        Ok(self.register(guild_id, player))
    }

    fn disconnect(&self, guild_id: GuildId, connection: ConnectionId) -> Result<()> {
        let thread = std::thread::current().name().map(str::to_string);
        self.disconnect_threads.lock().push(thread);

        let mut active = self.active.lock();
        if active.get(&guild_id) != Some(&connection) {
            self.stale_disconnects.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        active.remove(&guild_id);
        self.disconnects.lock().push(guild_id);
        Ok(())
    }

    fn listeners(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Vec<UserId> {
        self.listeners.lock().clone()
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
