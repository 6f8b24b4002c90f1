//! Closed sets of events the session registry reacts to.
//!
//! Serenity and songbird deliver far richer events; the adapters in
//! `bot::events` and `audio::voice` reduce them to these variants.

use serenity::model::id::GuildId;
use std::{fmt, sync::Arc, time::Duration};

use super::track::Track;

/// Why a track stopped rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Played to the end; the queue should advance.
    Finished,
    /// The media could not be loaded.
    LoadFailed,
    /// Stopped on request (skip, stop, replaced by the next track).
    Stopped,
    /// The player was torn down with the track still loaded.
    Cleanup,
}

impl EndReason {
    /// Only natural completion moves the queue forward.
    pub fn may_start_next(self) -> bool {
        matches!(self, EndReason::Finished)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndReason::Finished => "Finished",
            EndReason::LoadFailed => "Load Failed",
            EndReason::Stopped => "Stopped",
            EndReason::Cleanup => "Cleanup",
        };
        f.write_str(name)
    }
}

/// Track lifecycle callbacks from the audio backend.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started { track: Arc<Track> },
    Ended { track: Arc<Track>, reason: EndReason },
    Exception { track: Arc<Track>, message: String },
    Stuck { track: Arc<Track>, threshold: Duration },
}

impl PlaybackEvent {
    pub fn track(&self) -> &Arc<Track> {
        match self {
            PlaybackEvent::Started { track }
            | PlaybackEvent::Ended { track, .. }
            | PlaybackEvent::Exception { track, .. }
            | PlaybackEvent::Stuck { track, .. } => track,
        }
    }
}

/// Gateway events that end a guild's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    GuildLeft(GuildId),
    VoiceSelfLeft(GuildId),
    VoiceSelfMuted(GuildId),
    VoiceSelfSuppressed(GuildId),
    ShutdownRequested,
}
