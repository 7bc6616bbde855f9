//! Noembed/oEmbed-style client (spec §4.4.3): unauthenticated GET for
//! enriching a video candidate's duration once a URL is already known.
//!
//! Unlike the other providers this is not itself a `MetadataProvider` — it
//! is invoked by the resolver with a specific URL (e.g. a YouTube result)
//! rather than a title/artist search.

use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;

use super::USER_AGENT;

const API_BASE: &str = "https://noembed.com/embed";

#[derive(Debug, Deserialize)]
pub struct NoembedResponse {
    pub title: Option<String>,
    pub author_name: Option<String>,
    /// Seconds, when the provider exposes it (YouTube embeds do not; mainly
    /// useful for platforms that do).
    pub duration: Option<i32>,
}

pub struct NoembedClient {
    http: Client,
}

impl NoembedClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build noembed http client");
        Self { http }
    }

    pub async fn lookup(&self, url: &str) -> Result<Option<NoembedResponse>> {
        let response = self.http.get(API_BASE).query(&[("url", url)]).send().await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        Ok(response.json::<NoembedResponse>().await.ok())
    }
}

impl Default for NoembedClient {
    fn default() -> Self {
        Self::new()
    }
}
