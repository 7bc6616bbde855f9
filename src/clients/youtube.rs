//! YouTube Data API metadata provider.
//!
//! The expensive provider in the chain by quota cost — the resolver's
//! consensus short-circuit (spec §4.7 step 3) exists specifically to skip
//! this one when earlier, cheaper providers already agree.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::similarity::match_score;

use super::{MetadataProvider, TrackSearchResult, USER_AGENT};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchSnippet {
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(rename = "contentDetails")]
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

pub struct YouTubeClient {
    http: Client,
    api_key: String,
    limiter: RateLimiter,
}

impl YouTubeClient {
    pub fn new(api_key: String, limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build youtube http client");
        Self { http, api_key, limiter }
    }
}

/// Parse ISO 8601 durations like `PT4M19S` into whole seconds.
fn parse_iso8601_duration(s: &str) -> Option<i32> {
    let s = s.strip_prefix("PT")?;
    let mut seconds = 0i32;
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else {
            let value: i32 = number.parse().ok()?;
            number.clear();
            seconds += match c {
                'H' => value * 3600,
                'M' => value * 60,
                'S' => value,
                _ => 0,
            };
        }
    }
    Some(seconds)
}

#[async_trait]
impl MetadataProvider for YouTubeClient {
    fn name(&self) -> &'static str {
        "youtube"
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

        let query = format!("{artist} {title}");
        let search_resp = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("q", query.as_str()),
                ("type", "video"),
                ("maxResults", "3"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !search_resp.status().is_success() {
            let status = search_resp.status().as_u16();
            let body = search_resp.text().await.unwrap_or_default();
            return Err(crate::error::AppError::ProviderHttp { status, body });
        }

        self.limiter.decrement(false).await;

        let raw_body = search_resp.text().await.unwrap_or_default();
        let parsed: SearchResponse = match serde_json::from_str(&raw_body) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };

        let best = parsed
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let score = match_score(title, artist, &item.snippet.title, &item.snippet.channel_title);
                Some((video_id, item.snippet.title, item.snippet.channel_title, score))
            })
            .max_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal));

        let Some((video_id, result_title, channel, score)) = best else {
            return Ok(None);
        };

        let videos_resp = self
            .http
            .get(VIDEOS_URL)
            .query(&[
                ("part", "contentDetails"),
                ("id", video_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !videos_resp.status().is_success() {
            return Ok(None);
        }

        let videos: VideosResponse = videos_resp.json().await.unwrap_or(VideosResponse { items: vec![] });
        let duration_s = videos
            .items
            .first()
            .and_then(|v| parse_iso8601_duration(&v.content_details.duration));

        Ok(duration_s.map(|duration_s| TrackSearchResult {
            external_id: Some(video_id.clone()),
            external_url: Some(format!("https://www.youtube.com/watch?v={video_id}")),
            title: result_title,
            artist: channel,
            album: None,
            duration_s: Some(duration_s),
            match_score: score,
            confidence: score * 0.6,
            raw_response: Some(raw_body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso8601_duration_minutes_seconds() {
        assert_eq!(parse_iso8601_duration("PT4M19S"), Some(259));
    }

    #[test]
    fn test_parse_iso8601_duration_with_hours() {
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), Some(3723));
    }

    #[test]
    fn test_parse_iso8601_duration_seconds_only() {
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45));
    }
}
