//! External client set (C4): one family per provider, behind a shared
//! `MetadataProvider` trait for the duration resolver's fan-out.

pub mod discogs;
pub mod lastfm;
pub mod musicbrainz;
pub mod noembed;
pub mod wikipedia;
pub mod youtube;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub const USER_AGENT: &str = concat!(
    "vinylkeeper/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/vinylkeeper/vinylkeeper)"
);

/// What every metadata provider returns on a match.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSearchResult {
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_s: Option<i32>,
    pub match_score: f64,
    pub confidence: f64,
    pub raw_response: Option<String>,
}

/// Shared interface for MusicBrainz, Wikipedia, Last.fm, YouTube, Noembed.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>>;
}

/// Normalize a query per spec §4.4: strip disambiguation/edition suffixes,
/// lowercase, collapse whitespace. Shared by every provider's query
/// construction boundary.
pub fn normalize_query(s: &str) -> String {
    crate::similarity::normalize_title(s)
}
