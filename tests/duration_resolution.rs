//! End-to-end duration resolution against fake providers and a real,
//! temp-file-backed SQLite database — no network involved.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use vinylkeeper::clients::{MetadataProvider, TrackSearchResult};
use vinylkeeper::error::Result;
use vinylkeeper::models::{Album, DurationSourceTag, ResolutionStatus, Track};
use vinylkeeper::progress::DurationProgressStore;
use vinylkeeper::repository::{AlbumRepository, DurationRepository};
use vinylkeeper::resolver::DurationResolverWorker;
use vinylkeeper::state::StateManager;

struct FakeProvider {
    name: &'static str,
    duration_s: Option<i32>,
}

#[async_trait]
impl MetadataProvider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search_track(
        &self,
        title: &str,
        _artist: &str,
        _album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>> {
        Ok(self.duration_s.map(|duration_s| TrackSearchResult {
            external_id: Some(format!("{}-id", self.name)),
            external_url: None,
            title: title.to_string(),
            artist: "The Beatles".to_string(),
            album: None,
            duration_s: Some(duration_s),
            match_score: 0.9,
            confidence: 0.9,
            raw_response: None,
        }))
    }
}

fn setup() -> (TempDir, Arc<AlbumRepository>, Arc<DurationRepository>) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let albums = Arc::new(AlbumRepository::new(&db_path).unwrap());
    let durations = Arc::new(DurationRepository::new(&db_path).unwrap());
    (dir, albums, durations)
}

#[tokio::test]
async fn two_agreeing_providers_reach_consensus_and_auto_apply() {
    let (_dir, albums, durations) = setup();

    let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
    let track = Track::new(album.id.clone(), "Come Together".into(), "A1".into());
    let track_id = track.id.clone();
    albums.insert_album_with_tracks(&album, &[track]).unwrap();

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(FakeProvider { name: "musicbrainz", duration_s: Some(259) }),
        Arc::new(FakeProvider { name: "lastfm", duration_s: Some(260) }),
    ];

    let progress_store = Arc::new(DurationProgressStore::new(&_dir.path().join("test.db")).unwrap());
    let worker = DurationResolverWorker::new(
        providers,
        albums.clone(),
        durations.clone(),
        progress_store,
        StateManager::new(),
    );

    let track = albums.get_track(&track_id).unwrap().unwrap();
    let resolution = worker
        .resolve_track(&track, &album.artist, Some(album.title.as_str()))
        .await
        .unwrap();

    assert_eq!(resolution.status, ResolutionStatus::Resolved);
    assert!(resolution.auto_applied);
    assert_eq!(resolution.consensus_count, 2);

    let updated_track = albums.get_track(&track_id).unwrap().unwrap();
    assert!((257..=262).contains(&updated_track.duration_s));
    assert_ne!(updated_track.duration_s, 0);
}

#[tokio::test]
async fn disagreeing_providers_land_in_needs_review() {
    let (_dir, albums, durations) = setup();

    let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
    let track = Track::new(album.id.clone(), "Something".into(), "A2".into());
    let track_id = track.id.clone();
    albums.insert_album_with_tracks(&album, &[track]).unwrap();

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(FakeProvider { name: "musicbrainz", duration_s: Some(183) }),
        Arc::new(FakeProvider { name: "wikipedia", duration_s: Some(400) }),
    ];

    let progress_store = Arc::new(DurationProgressStore::new(&_dir.path().join("test.db")).unwrap());
    let worker = DurationResolverWorker::new(
        providers,
        albums.clone(),
        durations.clone(),
        progress_store,
        StateManager::new(),
    );

    let track = albums.get_track(&track_id).unwrap().unwrap();
    let resolution = worker
        .resolve_track(&track, &album.artist, Some(album.title.as_str()))
        .await
        .unwrap();

    assert_eq!(resolution.status, ResolutionStatus::NeedsReview);
    assert!(!resolution.auto_applied);

    // Reviewer approves the lower-confidence candidate manually.
    worker
        .approve_review(&resolution.id, None, Some("confirmed against sleeve notes".into()))
        .unwrap();

    let updated = durations.get(&resolution.id).unwrap().unwrap();
    assert_eq!(updated.status, ResolutionStatus::Approved);
    assert_eq!(updated.review_notes.as_deref(), Some("confirmed against sleeve notes"));
}

#[tokio::test]
async fn no_providers_match_marks_failed_and_bulk_run_completes() {
    let (_dir, albums, durations) = setup();

    let album = Album::new("Bootleg Session".into(), "Unknown Artist".into(), 0);
    let track = Track::new(album.id.clone(), "Untitled".into(), "A1".into());
    albums.insert_album_with_tracks(&album, &[track]).unwrap();

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(FakeProvider { name: "musicbrainz", duration_s: None }),
        Arc::new(FakeProvider { name: "wikipedia", duration_s: None }),
    ];

    let progress_store = Arc::new(DurationProgressStore::new(&_dir.path().join("test.db")).unwrap());
    let worker = DurationResolverWorker::new(
        providers,
        albums.clone(),
        durations.clone(),
        progress_store.clone(),
        StateManager::new(),
    );

    worker.run_bulk(CancellationToken::new()).await.unwrap();

    let progress = progress_store.load().unwrap().unwrap();
    assert_eq!(progress.processed, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.resolved, 0);
}

#[tokio::test]
async fn raised_consensus_threshold_forces_review_and_apply_honors_posted_duration() {
    let (_dir, albums, durations) = setup();

    let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
    let track = Track::new(album.id.clone(), "Come Together".into(), "A1".into());
    let track_id = track.id.clone();
    albums.insert_album_with_tracks(&album, &[track]).unwrap();

    let providers: Vec<Arc<dyn MetadataProvider>> = vec![
        Arc::new(FakeProvider { name: "musicbrainz", duration_s: Some(259) }),
        Arc::new(FakeProvider { name: "lastfm", duration_s: Some(260) }),
    ];

    let progress_store = Arc::new(DurationProgressStore::new(&_dir.path().join("test.db")).unwrap());
    let worker = DurationResolverWorker::new(
        providers,
        albums.clone(),
        durations.clone(),
        progress_store,
        StateManager::new(),
    )
    .with_consensus_threshold(3);

    let track = albums.get_track(&track_id).unwrap().unwrap();
    let resolution = worker
        .resolve_track(&track, &album.artist, Some(album.title.as_str()))
        .await
        .unwrap();

    // Only 2 providers agree; a threshold of 3 can never be met, so the pair
    // that would otherwise auto-resolve instead lands in review.
    assert_eq!(resolution.status, ResolutionStatus::NeedsReview);
    assert!(!resolution.auto_applied);

    worker.approve_review(&resolution.id, Some(259), None).unwrap();

    let updated_track = albums.get_track(&track_id).unwrap().unwrap();
    assert_eq!(updated_track.duration_s, 259);
    assert_eq!(updated_track.duration_source, Some(DurationSourceTag::Manual));

    let updated_resolution = durations.get(&resolution.id).unwrap().unwrap();
    assert_eq!(updated_resolution.status, ResolutionStatus::Approved);
}
