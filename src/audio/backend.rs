//! Seams between the session core and the voice transport.
//!
//! The registry and the queues only ever talk to these traits. Production
//! wiring lives in [`super::voice`]; tests plug in fakes and mocks.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use super::track::Track;
use crate::error::Result;

/// Highest volume a session accepts.
pub const MAX_VOLUME: u8 = 150;

/// One 20ms Opus frame ready for the voice transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    data: Bytes,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Identity of one voice connection, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A freshly opened voice connection and the player bound to it.
pub struct VoiceConnection {
    pub id: ConnectionId,
    pub player: Arc<dyn AudioPlayer>,
}

impl VoiceConnection {
    pub fn new(player: Arc<dyn AudioPlayer>) -> Self {
        Self {
            id: ConnectionId::next(),
            player,
        }
    }
}

/// Renders one track at a time for a single voice connection.
///
/// Every method is called from synchronous critical sections of a session,
/// so implementations must return promptly and never block on I/O.
#[cfg_attr(test, mockall::automock)]
pub trait AudioPlayer: Send + Sync {
    /// Starts rendering `track`, replacing whatever was playing.
    fn play_track(&self, track: Arc<Track>);

    /// Stops the current render. A no-op when nothing is playing.
    fn stop_track(&self);

    /// Pulls the next frame, if one is ready. Must not block.
    fn provide(&self) -> Option<AudioFrame>;

    fn volume(&self) -> u8;

    fn set_volume(&self, volume: u8);

    /// Releases the player. Nothing is rendered afterwards.
    fn destroy(&self);
}

/// Opens and closes voice connections and knows who is listening.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Joins `channel_id` and returns the new connection with its player.
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceConnection>;

    /// Leaves the guild's voice channel if `connection` is still the one
    /// registered for it. A newer connection in the same guild is untouched.
    ///
    /// May block on the transport; only the teardown executor calls it.
    fn disconnect(&self, guild_id: GuildId, connection: ConnectionId) -> Result<()>;

    /// Non-bot members currently in `channel_id`.
    fn listeners(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId>;

    /// Releases process-wide audio resources.
    async fn shutdown(&self);
}
