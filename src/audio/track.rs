use chrono::{DateTime, Utc};
use serenity::model::id::{GuildId, UserId};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a queued track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata of something the audio backend can render.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// `**Title** (3:25)`, or `(Live)` for streams without a length.
    pub fn formatted(&self) -> String {
        match self.duration {
            Some(duration) => format!("**{}** ({})", self.title, format_duration(duration)),
            None => format!("**{}** (Live)", self.title),
        }
    }
}

/// A playable item bound to the member who requested it.
///
/// Tracks are immutable once built; queues hand them around behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    info: TrackInfo,
    guild_id: GuildId,
    requester: UserId,
    requested_at: DateTime<Utc>,
}

impl Track {
    pub fn new(info: TrackInfo, guild_id: GuildId, requester: UserId) -> Self {
        Self {
            id: TrackId::next(),
            info,
            guild_id,
            requester,
            requested_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

/// Formats a duration as `m:ss`, or `h:mm:ss` past the hour.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_ids_are_unique() {
        let info = TrackInfo::new("song", "https://example.com/song");
        let a = Track::new(info.clone(), GuildId::new(1), UserId::new(2));
        let b = Track::new(info, GuildId::new(1), UserId::new(2));

        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(205)), "3:25");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_formatted_info() {
        let info = TrackInfo::new("Intro", "https://example.com/intro")
            .with_duration(Duration::from_secs(61));
        assert_eq!(info.formatted(), "**Intro** (1:01)");
        assert_eq!(
            TrackInfo::new("Radio", "https://example.com/radio").formatted(),
            "**Radio** (Live)"
        );
    }
}
