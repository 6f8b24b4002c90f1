//! Query resolution through songbird's yt-dlp input.

use songbird::input::{AuxMetadata, Compose, YoutubeDl};
use tracing::{debug, info};
use url::Url;

use crate::{
    audio::track::TrackInfo,
    error::{MusicError, Result},
};

const SEARCH_PREFIX: &str = "ytsearch:";

/// What a user typed after `/play`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Url(String),
    Search(String),
}

impl Query {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        if let Some(terms) = input.strip_prefix(SEARCH_PREFIX) {
            return Query::Search(terms.trim().to_string());
        }

        match Url::parse(input) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                Query::Url(url.to_string())
            }
            _ => Query::Search(input.to_string()),
        }
    }
}

pub struct TrackLoader {
    http: reqwest::Client,
    max_results: usize,
}

impl TrackLoader {
    pub fn new(http: reqwest::Client, max_results: usize) -> Self {
        Self {
            http,
            max_results: max_results.max(1),
        }
    }

    /// Resolves `input` to at most `count` tracks, capped by `max_results`.
    /// A URL always yields exactly one track.
    pub async fn load(&self, input: &str, count: usize) -> Result<Vec<TrackInfo>> {
        match Query::parse(input) {
            Query::Url(url) => {
                let mut source = YoutubeDl::new(self.http.clone(), url.clone());
                let metadata = source
                    .aux_metadata()
                    .await
                    .map_err(|e| MusicError::Load(e.to_string()))?;

                let info = to_track_info(metadata, Some(&url))
                    .ok_or_else(|| MusicError::NoMatches(url.clone()))?;
                info!("🔗 Loaded {}", info.title);
                Ok(vec![info])
            }
            Query::Search(terms) => {
                if terms.is_empty() {
                    return Err(MusicError::NoMatches(terms));
                }

                let limit = count.clamp(1, self.max_results);
                let mut source = YoutubeDl::new_search(self.http.clone(), terms.clone());
                let results: Vec<AuxMetadata> = source
                    .search(Some(limit))
                    .await
                    .map_err(|e| MusicError::Load(e.to_string()))?
                    .into_iter()
                    .collect();

                let tracks: Vec<TrackInfo> = results
                    .into_iter()
                    .filter_map(|metadata| to_track_info(metadata, None))
                    .take(limit)
                    .collect();

                if tracks.is_empty() {
                    return Err(MusicError::NoMatches(terms));
                }
                debug!("🔍 {} results for {}", tracks.len(), terms);
                Ok(tracks)
            }
        }
    }
}

fn to_track_info(metadata: AuxMetadata, fallback_url: Option<&str>) -> Option<TrackInfo> {
    let url = metadata
        .source_url
        .or_else(|| fallback_url.map(str::to_string))?;
    let title = metadata.title.unwrap_or_else(|| url.clone());

    let info = TrackInfo::new(title, url);
    Some(match metadata.duration {
        Some(duration) => info.with_duration(duration),
        None => info,
    })
}
