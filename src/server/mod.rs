//! HTTP server (C8 Controller Surface): thin handlers over the shared
//! State Manager / Progress Store / worker pair for each subsystem.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clients::discogs::{DiscogsClient, OAuthCredentials};
use crate::clients::lastfm::LastFmClient;
use crate::clients::musicbrainz::MusicBrainzClient;
use crate::clients::wikipedia::WikipediaClient;
use crate::clients::youtube::YouTubeClient;
use crate::clients::MetadataProvider;
use crate::config::Settings;
use crate::error::AppError;
use crate::progress::{DurationProgressStore, SyncProgressStore};
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::repository::{AlbumRepository, DurationRepository, SyncLogRepository};
use crate::state::StateManager;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub discogs: Arc<DiscogsClient>,
    pub albums: Arc<AlbumRepository>,
    pub sync_logs: Arc<SyncLogRepository>,
    pub sync_progress: Arc<SyncProgressStore>,
    pub sync_state: StateManager,
    pub sync_cancel: Arc<RwLock<Option<CancellationToken>>>,
    pub auth_limiter: RateLimiter,
    pub anon_limiter: RateLimiter,

    pub durations: Arc<DurationRepository>,
    pub duration_progress: Arc<DurationProgressStore>,
    pub duration_state: StateManager,
    pub duration_cancel: Arc<RwLock<Option<CancellationToken>>>,
    pub providers: Arc<Vec<Arc<dyn MetadataProvider>>>,
}

/// Build the duration-resolver provider fan-out list: MusicBrainz is limited
/// to 1 req/s unauthenticated (spec §6); the rest get a per-minute window
/// like the Discogs limiters. Shared between the server and the one-shot CLI
/// commands so both see the same provider set.
pub fn build_providers(settings: &Settings) -> Vec<Arc<dyn MetadataProvider>> {
    let musicbrainz_limiter = RateLimiter::new(RateLimiterConfig {
        window_s: 1,
        auth_capacity: 1,
        anon_capacity: 1,
        threshold: 0,
    });
    let provider_limiter = || RateLimiter::new(RateLimiterConfig::default());

    vec![
        Arc::new(MusicBrainzClient::new(musicbrainz_limiter)),
        Arc::new(LastFmClient::new(settings.lastfm_api_key.clone(), provider_limiter())),
        Arc::new(WikipediaClient::new(provider_limiter())),
        Arc::new(YouTubeClient::new(settings.youtube_api_key.clone(), provider_limiter())),
    ]
}

impl AppState {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let db_path = settings.resolved_db_path();
        let db_path = Path::new(&db_path);

        let auth_limiter = RateLimiter::new(RateLimiterConfig::default());
        let anon_limiter = RateLimiter::new(RateLimiterConfig::default());

        let credentials = OAuthCredentials {
            consumer_key: settings.discogs_consumer_key.clone(),
            consumer_secret: settings.discogs_consumer_secret.clone(),
            token: None,
            token_secret: None,
        };
        let discogs = Arc::new(DiscogsClient::new(credentials, auth_limiter.clone(), anon_limiter.clone()));
        let providers = build_providers(settings);

        Ok(Self {
            discogs,
            albums: Arc::new(AlbumRepository::new(db_path)?),
            sync_logs: Arc::new(SyncLogRepository::new(db_path)?),
            sync_progress: Arc::new(SyncProgressStore::new(db_path)?),
            sync_state: StateManager::new(),
            sync_cancel: Arc::new(RwLock::new(None)),
            auth_limiter,
            anon_limiter,

            durations: Arc::new(DurationRepository::new(db_path)?),
            duration_progress: Arc::new(DurationProgressStore::new(db_path)?),
            duration_state: StateManager::new(),
            duration_cancel: Arc::new(RwLock::new(None)),
            providers: Arc::new(providers),
        })
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::new(settings)?;
    let app = create_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", settings.port).parse()?;
    tracing::info!("starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Maps the engine error taxonomy to HTTP status per spec §7: `InvalidState`
/// is the controller's 409, rate limiting/provider faults surface as their
/// natural codes, everything else is a 500.
pub fn app_error_response(err: AppError) -> Response {
    let status = match &err {
        AppError::InvalidState => StatusCode::CONFLICT,
        AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AppError::ProviderHttp { .. } => StatusCode::BAD_GATEWAY,
        AppError::NoConsensus | AppError::NoResults => StatusCode::CONFLICT,
        AppError::ContextCancelled => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
