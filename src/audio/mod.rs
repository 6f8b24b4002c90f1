//! # Audio Module
//!
//! Per-guild music sessions for NightFury.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One live [`queue::SessionQueue`] per guild at most
//! - Serializes check-then-create per guild so racing `/play` calls share a session
//! - Routes playback and gateway events to the owning session
//!
//! ### [`queue`] - Session Queue
//! - Current track, pending FIFO, skip votes and volume
//! - Non-blocking frame handoff for the voice send path
//! - Idempotent close that hands the disconnect to [`teardown`]
//!
//! ### [`backend`] / [`voice`] - Voice Seams
//! - [`backend::AudioPlayer`] and [`backend::VoiceGateway`] traits
//! - Songbird implementations used in production
//!
//! ### [`teardown`] - Teardown Executor
//! - Single named worker thread for blocking disconnects
//! - Drained on shutdown, inline execution afterwards
//!
//! ## Flow
//!
//! `SessionRegistry::add_track` returns `0` when the track opened a new
//! session and started playing, or its 1-based queue position otherwise.
//! Playback callbacks reach `SessionRegistry::handle_playback`, which
//! advances the queue and drops the session once it runs dry.

pub mod backend;
pub mod events;
pub mod queue;
pub mod registry;
pub mod teardown;
pub mod track;
pub mod voice;

#[cfg(test)]
mod testing;
