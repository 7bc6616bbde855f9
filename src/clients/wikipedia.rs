//! Wikipedia metadata provider: opensearch + summary extraction.
//!
//! Wikipedia carries no structured track-duration field, so this provider
//! is best-effort: it confirms the track/artist pairing exists as an article
//! and leans on whatever duration fragment appears in the summary text, if
//! any. Low confidence by construction.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::similarity::match_score;

use super::{MetadataProvider, TrackSearchResult, USER_AGENT};

const API_BASE: &str = "https://en.wikipedia.org/w/api.php";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    snippet: String,
    pageid: i64,
}

pub struct WikipediaClient {
    http: Client,
    limiter: RateLimiter,
}

impl WikipediaClient {
    pub fn new(limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build wikipedia http client");
        Self { http, limiter }
    }
}

/// Extract a `M:SS` or `H:MM:SS` fragment from free text, if present.
fn extract_duration_fragment(text: &str) -> Option<i32> {
    let re = Regex::new(r"\b(\d{1,2}:)?\d{1,2}:\d{2}\b").ok()?;
    let raw = re.find(text)?.as_str();
    let secs = crate::sync::duration_to_seconds(raw);
    (secs > 0).then_some(secs)
}

#[async_trait]
impl MetadataProvider for WikipediaClient {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        _album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>> {
        self.limiter
            .check(false)
            .await
            .map_err(|e| crate::error::AppError::RateLimited { retry_after_s: e.retry_after_s })?;

        let query = format!("{title} {artist} song");
        let response = self
            .http
            .get(API_BASE)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query.as_str()),
                ("format", "json"),
                ("srlimit", "3"),
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
        let parsed: SearchResponse = match serde_json::from_str(&raw_body) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };

        let best = parsed
            .query
            .search
            .into_iter()
            .map(|hit| {
                let score = match_score(title, artist, &hit.title, artist);
                (hit, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(best.and_then(|(hit, score)| {
            let duration_s = extract_duration_fragment(&hit.snippet)?;
            Some(TrackSearchResult {
                external_id: Some(hit.pageid.to_string()),
                external_url: Some(format!(
                    "https://en.wikipedia.org/wiki/{}",
                    hit.title.replace(' ', "_")
                )),
                title: hit.title,
                artist: artist.to_string(),
                album: None,
                duration_s: Some(duration_s),
                match_score: score,
                confidence: score * 0.7,
                raw_response: Some(raw_body.clone()),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_duration_fragment_finds_mmss() {
        assert_eq!(
            extract_duration_fragment("The song runs 4:19 on the album."),
            Some(259)
        );
    }

    #[test]
    fn test_extract_duration_fragment_none_when_absent() {
        assert_eq!(extract_duration_fragment("No timing info here."), None);
    }
}
