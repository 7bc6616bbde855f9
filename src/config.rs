//! Runtime configuration (C9, ambient).
//!
//! CLI flag > env var > default, the same precedence order as the teacher's
//! config loader — just via `clap`'s `env` attribute rather than a
//! dedicated layering crate, since this crate's config surface is a handful
//! of scalars rather than a nested backend/fallback-chain tree.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "vinylkeeper", about = "Self-hosted record catalog sync service")]
pub struct Settings {
    /// Discogs OAuth1 consumer key.
    #[arg(long, env = "DISCOGS_CONSUMER_KEY", default_value = "")]
    pub discogs_consumer_key: String,

    /// Discogs OAuth1 consumer secret.
    #[arg(long, env = "DISCOGS_CONSUMER_SECRET", default_value = "")]
    pub discogs_consumer_secret: String,

    /// OAuth1 callback URL registered with Discogs.
    #[arg(long, env = "DISCOGS_CALLBACK_URL", default_value = "")]
    pub discogs_callback_url: String,

    /// Last.fm API key. Empty disables that provider in the duration resolver.
    #[arg(long, env = "LASTFM_API_KEY", default_value = "")]
    pub lastfm_api_key: String,

    /// YouTube Data API key. Empty disables that provider.
    #[arg(long, env = "YOUTUBE_API_KEY", default_value = "")]
    pub youtube_api_key: String,

    /// SQLite database path. Falls back to individual DB_* vars if unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_PATH", default_value = "vinylkeeper.db")]
    pub db_path: String,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8787)]
    pub port: u16,
}

impl Settings {
    pub fn load() -> Self {
        Self::parse()
    }

    /// Resolve the effective SQLite path: `DATABASE_URL` (stripped of a
    /// `sqlite://` prefix if present) takes precedence over `DB_PATH`.
    pub fn resolved_db_path(&self) -> String {
        match &self.database_url {
            Some(url) => url
                .strip_prefix("sqlite://")
                .unwrap_or(url)
                .to_string(),
            None => self.db_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_db_path_prefers_database_url() {
        let settings = Settings {
            discogs_consumer_key: String::new(),
            discogs_consumer_secret: String::new(),
            discogs_callback_url: String::new(),
            lastfm_api_key: String::new(),
            youtube_api_key: String::new(),
            database_url: Some("sqlite:///data/vinylkeeper.db".into()),
            db_path: "fallback.db".into(),
            port: 8787,
        };
        assert_eq!(settings.resolved_db_path(), "/data/vinylkeeper.db");
    }

    #[test]
    fn test_resolved_db_path_falls_back() {
        let settings = Settings {
            discogs_consumer_key: String::new(),
            discogs_consumer_secret: String::new(),
            discogs_callback_url: String::new(),
            lastfm_api_key: String::new(),
            youtube_api_key: String::new(),
            database_url: None,
            db_path: "fallback.db".into(),
            port: 8787,
        };
        assert_eq!(settings.resolved_db_path(), "fallback.db");
    }
}
