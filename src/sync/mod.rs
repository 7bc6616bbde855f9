//! Catalog Sync Worker (C5): paginated fetch, atomic album+tracks import,
//! cross-reference fallback.

mod position;

pub use position::{duration_to_seconds, parse_position, render_position, ParsedPosition};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::discogs::{DiscogsClient, DiscogsTrack, FolderRelease};
use crate::error::{AppError, Result};
use crate::models::{
    Album, DurationSourceTag, SyncErrorCategory, SyncLog, SyncMode, SyncProgress, SyncStatus, Track,
};
use crate::repository::{AlbumRepository, SyncLogRepository};
use crate::progress::SyncProgressStore;
use crate::similarity::similarity;
use crate::state::StateManager;

/// Cross-reference fallback budget (spec §4.5, §9): a pragmatic cap so one
/// poorly-indexed album can't burn a large fraction of daily quota.
const MAX_SEARCH_PAGES: i32 = 4;
const RESULTS_PER_PAGE: i32 = 12;
const MAX_RELEASE_FETCHES: usize = 10;
const TRACK_MATCH_THRESHOLD: f64 = 0.7;
const TRACKLIST_FETCH_RETRIES: u32 = 3;

pub struct SyncWorkerConfig {
    pub username: String,
    pub batch_size: i32,
    pub sync_mode: SyncMode,
    pub folder_id: Option<i64>,
}

pub struct CatalogSyncWorker {
    discogs: Arc<DiscogsClient>,
    albums: Arc<AlbumRepository>,
    sync_logs: Arc<SyncLogRepository>,
    progress_store: Arc<SyncProgressStore>,
    state: StateManager,
}

impl CatalogSyncWorker {
    pub fn new(
        discogs: Arc<DiscogsClient>,
        albums: Arc<AlbumRepository>,
        sync_logs: Arc<SyncLogRepository>,
        progress_store: Arc<SyncProgressStore>,
        state: StateManager,
    ) -> Self {
        Self {
            discogs,
            albums,
            sync_logs,
            progress_store,
            state,
        }
    }

    /// Entry point. Registers a worker id and runs the loop until `stopping`
    /// or exhaustion (spec §4.5).
    pub async fn run(&self, config: SyncWorkerConfig, ctx: CancellationToken) -> Result<()> {
        let worker_id = uuid::Uuid::new_v4().to_string();
        if !self.state.start(worker_id.clone()).await {
            return Err(AppError::InvalidState);
        }

        let folders = self.resolve_folders(&config).await?;

        let mut progress = SyncProgress {
            id: "current".into(),
            worker_id: worker_id.clone(),
            username: config.username.clone(),
            sync_mode: config.sync_mode,
            current_folder: folders.first().copied().unwrap_or(0),
            folders: folders.clone(),
            folder_index: 0,
            current_page: 1,
            processed: 0,
            total: 0,
            status: SyncStatus::Running,
            last_activity: chrono::Utc::now(),
        };
        self.progress_store.save(&progress)?;

        let result = self.run_loop(&config, &mut progress, &ctx).await;

        match &result {
            Ok(()) => {
                progress.total = progress.processed;
                progress.status = SyncStatus::Idle;
                self.progress_store.archive_to_history(&progress)?;
                info!(processed = progress.processed, "sync complete");
            }
            Err(AppError::ContextCancelled) => {
                info!("sync cancelled cooperatively");
            }
            Err(e) => {
                warn!(error = %e, "sync worker exiting with error");
            }
        }

        self.state.mark_exited(&worker_id).await;
        result
    }

    async fn resolve_folders(&self, config: &SyncWorkerConfig) -> Result<Vec<i64>> {
        match config.sync_mode {
            SyncMode::All => Ok(vec![0]),
            SyncMode::Specific => Ok(vec![config.folder_id.unwrap_or(0)]),
            SyncMode::AllFolders => {
                let folders = self.discogs.folders(&config.username).await?;
                Ok(folders.into_iter().map(|f| f.id).collect())
            }
        }
    }

    async fn run_loop(
        &self,
        config: &SyncWorkerConfig,
        progress: &mut SyncProgress,
        ctx: &CancellationToken,
    ) -> Result<()> {
        let mut batch: Vec<FolderRelease> = Vec::new();

        loop {
            if ctx.is_cancelled() {
                return Err(AppError::ContextCancelled);
            }

            self.state
                .update_state(|s| s.last_activity = chrono::Utc::now())
                .await;

            if self.state.get_state().await.status == crate::state::Status::Paused {
                self.state
                    .wait_for_resume(ctx)
                    .await
                    .map_err(|_| AppError::ContextCancelled)?;
                continue;
            }
            if self.state.get_state().await.status == crate::state::Status::Stopping {
                return Err(AppError::ContextCancelled);
            }

            if batch.is_empty() {
                match self.refill_batch(config, progress).await {
                    Ok(BatchOutcome::Done) => return Ok(()),
                    Ok(BatchOutcome::AdvancedFolder) => continue,
                    Ok(BatchOutcome::Filled(new_batch)) => batch = new_batch,
                    Err(AppError::RateLimited { retry_after_s }) => {
                        self.pause_for_rate_limit(retry_after_s, ctx).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            let release = batch.remove(0);
            match self.import_one(&release).await {
                Ok(()) => {}
                Err(AppError::TrackFetchFailed(msg)) => {
                    let title = release.basic_information.title.clone();
                    let artist = release
                        .basic_information
                        .artists
                        .first()
                        .map(|a| a.name.clone())
                        .unwrap_or_default();
                    self.sync_logs.append(&SyncLog::new(
                        Some(release.id.to_string()),
                        title,
                        artist,
                        SyncErrorCategory::Tracks,
                        msg,
                    ))?;
                }
                Err(AppError::RateLimited { retry_after_s }) => {
                    batch.insert(0, release);
                    self.pause_for_rate_limit(retry_after_s, ctx).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            progress.processed += 1;
            progress.last_activity = chrono::Utc::now();
            self.progress_store.save(progress)?;
        }
    }

    /// Transitions the worker to `paused`, schedules an automatic resume once
    /// the rate limit window clears, and blocks until resumed — either by
    /// that timer or an operator's explicit resume call (spec §4.5 step 5).
    async fn pause_for_rate_limit(&self, retry_after_s: u64, ctx: &CancellationToken) -> Result<()> {
        warn!(retry_after_s, "rate limited; pausing sync run");
        self.state.request_pause().await;

        let state = self.state.clone();
        let resume_after = retry_after_s.max(1);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(resume_after)).await;
            state.request_resume().await;
        });

        self.state
            .wait_for_resume(ctx)
            .await
            .map_err(|_| AppError::ContextCancelled)
    }

    async fn refill_batch(
        &self,
        config: &SyncWorkerConfig,
        progress: &mut SyncProgress,
    ) -> Result<BatchOutcome> {
        if progress.current_page > 1 && config.sync_mode == SyncMode::AllFolders {
            progress.folder_index += 1;
            if progress.folder_index >= progress.folders.len() {
                return Ok(BatchOutcome::Done);
            }
            progress.current_folder = progress.folders[progress.folder_index];
            progress.current_page = 1;
        }

        let page = match self
            .discogs
            .folder_releases(&config.username, progress.current_folder, progress.current_page, config.batch_size)
            .await
        {
            Ok(page) => page,
            Err(AppError::ProviderHttp { status, .. }) if status == 422 || status == 404 => {
                // "Page outside valid range": end of folder.
                if config.sync_mode == SyncMode::AllFolders {
                    progress.current_page = 2; // force folder advance next pass
                    return Ok(BatchOutcome::AdvancedFolder);
                }
                return Ok(BatchOutcome::Done);
            }
            Err(e) => return Err(e),
        };

        progress.current_page += 1;
        let complete = page.releases.len() < config.batch_size as usize;
        let releases = page.releases;

        if releases.is_empty() {
            if config.sync_mode == SyncMode::AllFolders {
                return Ok(BatchOutcome::AdvancedFolder);
            }
            return Ok(BatchOutcome::Done);
        }

        if complete && config.sync_mode != SyncMode::AllFolders {
            // Still process this final page; the next refill call will see
            // an empty page and finish.
        }

        Ok(BatchOutcome::Filled(releases))
    }

    /// Atomically imports one album + its tracks, or rolls back entirely.
    async fn import_one(&self, release: &FolderRelease) -> Result<()> {
        let info = &release.basic_information;
        let artist = info.artists.first().map(|a| a.name.clone()).unwrap_or_default();

        let release_id_str = release.id.to_string();

        if let Some(existing) = self
            .albums
            .find_by_release_id(&release_id_str)?
            .or(self.albums.find_by_title_artist(&info.title, &artist)?)
        {
            let cover = self.try_download_cover(info.cover_image.as_deref()).await;
            self.albums.upsert_existing(
                &existing.id,
                Some(release_id_str.as_str()),
                release.folder_id,
                info.year,
                cover.as_ref().map(|(bytes, mime)| (bytes.as_slice(), mime.as_str())),
            )?;
            return Ok(());
        }

        let mut album = Album::new(info.title.clone(), artist.clone(), release.folder_id);
        album.provider_release_id = Some(release.id.to_string());
        album.master_release_id = info.master_id.map(|m| m.to_string());
        album.year = info.year;
        album.genre = info.genres.as_ref().and_then(|g| g.first().cloned());
        album.label = info.labels.as_ref().and_then(|l| l.first().map(|x| x.name.clone()));

        if let Some((bytes, mime)) = self.try_download_cover(info.cover_image.as_deref()).await {
            album.cover_image = Some(bytes);
            album.cover_image_mime = Some(mime);
        } else {
            album.cover_image_failed = true;
        }

        let tracks = self
            .fetch_tracklist(&album.id, release.id, info.master_id, &info.title, &artist)
            .await?;

        self.albums
            .insert_album_with_tracks(&album, &tracks)
            .map_err(AppError::from)
    }

    async fn try_download_cover(&self, url: Option<&str>) -> Option<(Vec<u8>, String)> {
        let url = url?;
        for attempt in 0..3 {
            match reqwest::get(url).await {
                Ok(resp) if resp.status().is_success() => {
                    let mime = resp
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("image/jpeg")
                        .to_string();
                    if let Ok(bytes) = resp.bytes().await {
                        return Some((bytes.to_vec(), mime));
                    }
                }
                _ => {
                    warn!(attempt, url, "cover image download failed");
                }
            }
        }
        None
    }

    /// Fetch the tracklist with retry, falling back to cross-reference when
    /// empty or durationless (spec §4.5 step 6).
    async fn fetch_tracklist(
        &self,
        album_id: &str,
        release_id: i64,
        master_id: Option<i64>,
        title: &str,
        artist: &str,
    ) -> Result<Vec<Track>> {
        let discogs_tracks = self.fetch_tracklist_with_retry(release_id).await?;
        let tracks = convert_tracks(album_id.to_string(), &discogs_tracks);

        let has_durations = tracks.iter().any(|t| t.duration_s > 0);
        if !discogs_tracks.is_empty() && has_durations {
            return Ok(tracks);
        }

        if let Some(cross_ref) = self
            .cross_reference(album_id, release_id, master_id, title, artist)
            .await?
        {
            return Ok(cross_ref);
        }

        if discogs_tracks.is_empty() {
            return Err(AppError::TrackFetchFailed("empty tracklist, no cross-reference match".into()));
        }

        Ok(tracks)
    }

    /// Propagates `RateLimited` rather than swallowing it: a quota stall here
    /// must pause the run, not be mistaken for an empty tracklist.
    async fn fetch_tracklist_with_retry(&self, release_id: i64) -> Result<Vec<DiscogsTrack>> {
        let mut last_err = None;
        for attempt in 0..TRACKLIST_FETCH_RETRIES {
            match self.discogs.release(release_id).await {
                Ok(release) => return Ok(release.tracklist),
                Err(e @ AppError::RateLimited { .. }) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(u64::from(attempt + 1) * 500)).await;
                }
            }
        }
        Err(last_err.unwrap_or(AppError::TrackFetchFailed("tracklist fetch exhausted retries".into())))
    }

    /// Consult the master release's siblings, then fall back to a bounded
    /// catalog search, matching tracks by name similarity (spec §4.5,
    /// §9 "Cross-reference fallback budget").
    async fn cross_reference(
        &self,
        album_id: &str,
        release_id: i64,
        master_id: Option<i64>,
        title: &str,
        artist: &str,
    ) -> Result<Option<Vec<Track>>> {
        if let Some(master_id) = master_id {
            if let Ok(versions) = self.discogs.master_releases(master_id).await {
                for version in versions.into_iter().filter(|v| v.id != release_id).take(MAX_RELEASE_FETCHES) {
                    if let Ok(release) = self.discogs.release(version.id).await {
                        if !release.tracklist.is_empty()
                            && release.tracklist.iter().any(|t| duration_to_seconds(t.duration.as_deref().unwrap_or("")) > 0)
                        {
                            return Ok(Some(convert_tracks(album_id.to_string(), &release.tracklist)));
                        }
                    }
                }
            }
        }

        let query = format!("{artist} {title}");
        let mut fetched = 0usize;
        for page in 1..=MAX_SEARCH_PAGES {
            let Ok(results) = self.discogs.search_releases(&query, page).await else {
                break;
            };
            for hit in results.results.into_iter().take(RESULTS_PER_PAGE as usize) {
                if fetched >= MAX_RELEASE_FETCHES {
                    return Ok(None);
                }
                fetched += 1;

                let Ok(candidate) = self.discogs.release(hit.id).await else {
                    continue;
                };

                let matched: Vec<DiscogsTrack> = candidate
                    .tracklist
                    .iter()
                    .filter(|t| similarity(&t.title, title) >= TRACK_MATCH_THRESHOLD)
                    .cloned()
                    .collect();

                if !matched.is_empty() && matched.iter().any(|t| duration_to_seconds(t.duration.as_deref().unwrap_or("")) > 0) {
                    return Ok(Some(convert_tracks(album_id.to_string(), &matched)));
                }
            }
        }

        Ok(None)
    }
}

enum BatchOutcome {
    Done,
    AdvancedFolder,
    Filled(Vec<FolderRelease>),
}

fn convert_tracks(album_id: String, discogs_tracks: &[DiscogsTrack]) -> Vec<Track> {
    discogs_tracks
        .iter()
        .enumerate()
        .map(|(idx, dt)| {
            let parsed = parse_position(&dt.position);
            let mut track = Track::new(album_id.clone(), dt.title.clone(), dt.position.clone());
            track.track_number = if parsed.track_number > 0 { parsed.track_number } else { idx as i32 + 1 };
            track.disc_number = parsed.disc_number;
            track.side_code = parsed.side_code;
            track.duration_s = duration_to_seconds(dt.duration.as_deref().unwrap_or(""));
            if track.duration_s > 0 {
                track.duration_source = Some(DurationSourceTag::Discogs);
            }
            track
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::discogs::DiscogsTrack;

    #[test]
    fn test_convert_tracks_assigns_discogs_source_when_duration_present() {
        let discogs_tracks = vec![DiscogsTrack {
            position: "A1".into(),
            title: "Come Together".into(),
            duration: Some("4:19".into()),
        }];
        let tracks = convert_tracks("album-1".into(), &discogs_tracks);
        assert_eq!(tracks[0].duration_s, 259);
        assert_eq!(tracks[0].duration_source, Some(DurationSourceTag::Discogs));
    }

    #[test]
    fn test_convert_tracks_unknown_duration_has_no_source() {
        let discogs_tracks = vec![DiscogsTrack {
            position: "A1".into(),
            title: "Come Together".into(),
            duration: None,
        }];
        let tracks = convert_tracks("album-1".into(), &discogs_tracks);
        assert_eq!(tracks[0].duration_s, 0);
        assert_eq!(tracks[0].duration_source, None);
    }
}
