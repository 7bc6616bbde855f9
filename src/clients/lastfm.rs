//! Last.fm metadata provider: `track.getInfo` by artist/track name.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::similarity::match_score;

use super::{MetadataProvider, TrackSearchResult, USER_AGENT};

const API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";

#[derive(Debug, Deserialize)]
struct TrackInfoResponse {
    track: Option<LastFmTrack>,
}

#[derive(Debug, Deserialize)]
struct LastFmTrack {
    name: String,
    /// Milliseconds, as a string ("0" when unknown).
    duration: Option<String>,
    artist: LastFmArtist,
    album: Option<LastFmAlbum>,
    url: Option<String>,
    mbid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LastFmArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LastFmAlbum {
    title: String,
}

pub struct LastFmClient {
    http: Client,
    api_key: String,
    limiter: RateLimiter,
}

impl LastFmClient {
    pub fn new(api_key: String, limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build last.fm http client");
        Self { http, api_key, limiter }
    }
}

#[async_trait]
impl MetadataProvider for LastFmClient {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        _album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>> {
        if self.api_key.is_empty() {
            return Ok(None);
        }

        self.limiter
            .check(false)
            .await
            .map_err(|e| crate::error::AppError::RateLimited { retry_after_s: e.retry_after_s })?;

        let response = self
            .http
            .get(API_BASE)
            .query(&[
                ("method", "track.getInfo"),
                ("api_key", self.api_key.as_str()),
                ("artist", artist),
                ("track", title),
                ("format", "json"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(crate::error::AppError::ProviderHttp { status, body });
        }

        self.limiter.decrement(false).await;

        let raw_body = response.text().await.unwrap_or_default();
        let parsed: TrackInfoResponse = match serde_json::from_str(&raw_body) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };

        let Some(track) = parsed.track else {
            return Ok(None);
        };

        let duration_s = track
            .duration
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .map(|ms| (ms / 1000) as i32);

        let Some(duration_s) = duration_s else {
            return Ok(None);
        };

        let score = match_score(title, artist, &track.name, &track.artist.name);

        Ok(Some(TrackSearchResult {
            external_id: track.mbid,
            external_url: track.url,
            title: track.name,
            artist: track.artist.name,
            album: track.album.map(|a| a.title),
            duration_s: Some(duration_s),
            match_score: score,
            confidence: score,
            raw_response: Some(raw_body),
        }))
    }
}
