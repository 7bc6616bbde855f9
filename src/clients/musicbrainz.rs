//! MusicBrainz metadata provider: Lucene-style recording search.
//!
//! 1 req/s unauthenticated (spec §6), enforced via its own `RateLimiter`
//! instance configured with a 1-second window.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::similarity::match_score;

use super::{MetadataProvider, TrackSearchResult, USER_AGENT};

const API_BASE: &str = "https://musicbrainz.org/ws/2";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    title: String,
    #[serde(default)]
    length: Option<i64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<ReleaseRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseRef {
    title: String,
}

pub struct MusicBrainzClient {
    http: Client,
    limiter: RateLimiter,
}

impl MusicBrainzClient {
    pub fn new(limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build musicbrainz http client");
        Self { http, limiter }
    }

    /// Lucene-style query grammar: `recording:"…" AND artist:"…" [AND release:"…"]`.
    fn build_query(title: &str, artist: &str, album: Option<&str>) -> String {
        let mut query = format!(
            "recording:\"{}\" AND artist:\"{}\"",
            escape_lucene(title),
            escape_lucene(artist)
        );
        if let Some(album) = album {
            query.push_str(&format!(" AND release:\"{}\"", escape_lucene(album)));
        }
        query
    }
}

fn escape_lucene(s: &str) -> String {
    s.replace('"', "\\\"")
}

#[async_trait]
impl MetadataProvider for MusicBrainzClient {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>> {
        self.limiter
            .check(false)
            .await
            .map_err(|e| crate::error::AppError::RateLimited { retry_after_s: e.retry_after_s })?;

        let query = Self::build_query(title, artist, album);
        let response = self
            .http
            .get(format!("{API_BASE}/recording"))
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "5")])
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            let err = self.limiter.on_http_429(retry_after).await;
            return Err(crate::error::AppError::RateLimited { retry_after_s: err.retry_after_s });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(crate::error::AppError::ProviderHttp { status, body });
        }

        self.limiter.decrement(false).await;

        let raw_body = response.text().await.unwrap_or_default();
        let parsed: SearchResponse = serde_json::from_str(&raw_body).unwrap_or(SearchResponse { recordings: vec![] });

        let best = parsed
            .recordings
            .into_iter()
            .filter_map(|r| {
                let result_artist = r.artist_credit.first().map(|a| a.name.clone()).unwrap_or_default();
                let result_album = r.releases.first().map(|rel| rel.title.clone());
                let score = match_score(title, artist, &r.title, &result_artist);
                r.length.map(|ms| (r.id, r.title, result_artist, result_album, (ms / 1000) as i32, score))
            })
            .max_by(|a, b| a.5.partial_cmp(&b.5).unwrap_or(std::cmp::Ordering::Equal));

        Ok(best.map(|(id, result_title, result_artist, result_album, duration_s, score)| TrackSearchResult {
            external_id: Some(id.clone()),
            external_url: Some(format!("https://musicbrainz.org/recording/{id}")),
            title: result_title,
            artist: result_artist,
            album: result_album,
            duration_s: Some(duration_s),
            match_score: score,
            confidence: score,
            raw_response: Some(raw_body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_includes_album_when_present() {
        let query = MusicBrainzClient::build_query("Come Together", "The Beatles", Some("Abbey Road"));
        assert!(query.contains("recording:\"Come Together\""));
        assert!(query.contains("artist:\"The Beatles\""));
        assert!(query.contains("release:\"Abbey Road\""));
    }

    #[test]
    fn test_build_query_without_album() {
        let query = MusicBrainzClient::build_query("Come Together", "The Beatles", None);
        assert!(!query.contains("release:"));
    }

    #[test]
    fn test_escape_lucene_quotes() {
        assert_eq!(escape_lucene("say \"hi\""), "say \\\"hi\\\"");
    }
}
