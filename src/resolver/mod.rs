//! Duration Resolver Worker (C7): per-track provider fan-out with consensus,
//! bulk resolution over the backlog, and the review/manual-override surface.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::MetadataProvider;
use crate::error::{AppError, Result};
use crate::models::{
    DurationResolution, DurationSource, DurationSourceTag, ResolutionStatus, ReviewAction, SyncStatus, Track,
};
use crate::progress::DurationProgressStore;
use crate::repository::duration::DurationResolverProgress;
use crate::repository::{AlbumRepository, DurationRepository};
use crate::state::{StateManager, Status};

const MIN_MATCH_SCORE: f64 = 0.6;
const DEFAULT_CONSENSUS_THRESHOLD: i32 = 2;
const CONSENSUS_TOLERANCE_S: i32 = 3;

pub struct DurationResolverWorker {
    providers: Vec<Arc<dyn MetadataProvider>>,
    albums: Arc<AlbumRepository>,
    durations: Arc<DurationRepository>,
    progress_store: Arc<DurationProgressStore>,
    state: StateManager,
    auto_apply_on_consensus: bool,
    consensus_threshold: i32,
}

impl DurationResolverWorker {
    pub fn new(
        providers: Vec<Arc<dyn MetadataProvider>>,
        albums: Arc<AlbumRepository>,
        durations: Arc<DurationRepository>,
        progress_store: Arc<DurationProgressStore>,
        state: StateManager,
    ) -> Self {
        Self {
            providers,
            albums,
            durations,
            progress_store,
            state,
            auto_apply_on_consensus: true,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
        }
    }

    /// Override the number of agreeing providers required to auto-resolve
    /// (spec §4.7 step 3: configurable, not a fixed constant).
    pub fn with_consensus_threshold(mut self, threshold: i32) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    /// Resolve one track: existing-resolution check, provider fan-out with
    /// the consensus short-circuit, consensus computation, optional auto-apply
    /// (spec §4.7 steps 1-8).
    pub async fn resolve_track(
        &self,
        track: &Track,
        artist: &str,
        album_title: Option<&str>,
    ) -> Result<DurationResolution> {
        if let Some(existing) = self.durations.find_by_track(&track.id)? {
            if existing.status.is_retry_protected() {
                return Ok(existing);
            }
            self.durations.delete(&existing.id)?;
        }

        let mut resolution = DurationResolution::new(track.id.clone(), track.duration_s);
        self.durations.insert(&resolution)?;

        let mut counted: Vec<(String, i32, f64)> = Vec::new();
        let mut sources_queried = 0;
        let mut sources_successful = 0;
        let mut skipped: Vec<&'static str> = Vec::new();

        for (idx, provider) in self.providers.iter().enumerate() {
            if consensus_reached(&counted, CONSENSUS_TOLERANCE_S, self.consensus_threshold) {
                skipped.extend(self.providers[idx..].iter().map(|p| p.name()));
                break;
            }

            sources_queried += 1;
            match provider.search_track(&track.title, artist, album_title).await {
                Ok(Some(result)) => {
                    sources_successful += 1;
                    let duration_s = result.duration_s.unwrap_or(0);
                    let source = DurationSource::success(
                        resolution.id.clone(),
                        provider.name().to_string(),
                        duration_s,
                        result.match_score,
                        result.confidence,
                        result.external_id.clone(),
                        result.external_url.clone(),
                        result.raw_response.clone(),
                    );

                    if source.counts_toward_consensus(MIN_MATCH_SCORE) {
                        counted.push((provider.name().to_string(), duration_s, result.match_score));
                    }
                    self.durations.add_source(&source)?;
                }
                Ok(None) => {
                    let source = DurationSource::failure(
                        resolution.id.clone(),
                        provider.name().to_string(),
                        "no match".into(),
                    );
                    self.durations.add_source(&source)?;
                }
                Err(e) => {
                    let source =
                        DurationSource::failure(resolution.id.clone(), provider.name().to_string(), e.to_string());
                    self.durations.add_source(&source)?;
                }
            }
        }

        if !skipped.is_empty() {
            info!(track_id = %track.id, ?skipped, "consensus reached; skipped remaining providers");
        }

        resolution.sources_queried = sources_queried;
        resolution.sources_successful = sources_successful;

        match compute_consensus(&counted, CONSENSUS_TOLERANCE_S) {
            Some((value, count)) if count >= self.consensus_threshold => {
                resolution.status = ResolutionStatus::Resolved;
                resolution.resolved_duration = Some(value);
                resolution.consensus_count = count;
                if self.auto_apply_on_consensus {
                    self.albums
                        .update_track_duration(&track.id, value, DurationSourceTag::Resolved, false)?;
                    resolution.auto_applied = true;
                }
            }
            Some((value, count)) => {
                resolution.status = ResolutionStatus::NeedsReview;
                resolution.resolved_duration = Some(value);
                resolution.consensus_count = count;
            }
            None if sources_successful > 0 => {
                resolution.status = ResolutionStatus::NeedsReview;
            }
            None => {
                resolution.status = ResolutionStatus::Failed;
            }
        }

        self.durations.update(&resolution)?;
        Ok(resolution)
    }

    /// Bulk resolution over `AlbumRepository::tracks_needing_duration`, with
    /// pause/resume/cancel via the shared State Manager (spec §4.7 "Bulk
    /// resolution").
    pub async fn run_bulk(&self, ctx: CancellationToken) -> Result<()> {
        let worker_id = uuid::Uuid::new_v4().to_string();
        if !self.state.start(worker_id.clone()).await {
            return Err(AppError::InvalidState);
        }

        let tracks = self.albums.tracks_needing_duration()?;
        let mut progress = DurationResolverProgress {
            worker_id: worker_id.clone(),
            status: SyncStatus::Running,
            processed: 0,
            total: tracks.len() as i64,
            resolved: 0,
            needs_review: 0,
            failed: 0,
            skipped: 0,
            current_track_id: None,
            last_activity: chrono::Utc::now(),
        };
        self.progress_store.save(&progress)?;

        for track in tracks {
            if ctx.is_cancelled() {
                self.state.mark_exited(&worker_id).await;
                return Err(AppError::ContextCancelled);
            }

            if self.state.get_state().await.status == Status::Paused {
                self.state
                    .wait_for_resume(&ctx)
                    .await
                    .map_err(|_| AppError::ContextCancelled)?;
            }
            if self.state.get_state().await.status == Status::Stopping {
                break;
            }

            progress.current_track_id = Some(track.id.clone());

            let Some(album) = self.albums.get(&track.album_id)? else {
                progress.skipped += 1;
                progress.processed += 1;
                self.progress_store.save(&progress)?;
                continue;
            };

            match self
                .resolve_track(&track, &album.artist, Some(album.title.as_str()))
                .await
            {
                Ok(resolution) => match resolution.status {
                    ResolutionStatus::Resolved => progress.resolved += 1,
                    ResolutionStatus::NeedsReview => progress.needs_review += 1,
                    ResolutionStatus::Failed => progress.failed += 1,
                    _ => {}
                },
                Err(_) => progress.failed += 1,
            }

            progress.processed += 1;
            progress.last_activity = chrono::Utc::now();
            self.progress_store.save(&progress)?;
        }

        progress.status = SyncStatus::Idle;
        progress.current_track_id = None;
        self.progress_store.save(&progress)?;
        self.state.mark_exited(&worker_id).await;
        Ok(())
    }

    /// Approve a `needs_review` resolution. With no `override_duration`, applies
    /// the computed `resolved_duration` tagged `resolved`. When the reviewer
    /// posts an explicit duration instead, that value wins and is tagged
    /// `manual` (spec §8 "reviewer posts an explicit duration on apply").
    pub fn approve_review(
        &self,
        resolution_id: &str,
        override_duration: Option<i32>,
        notes: Option<String>,
    ) -> Result<()> {
        let mut resolution = self
            .durations
            .get(resolution_id)?
            .ok_or_else(|| AppError::Other("resolution not found".into()))?;

        if resolution.status != ResolutionStatus::NeedsReview {
            return Err(AppError::InvalidState);
        }

        let (value, source) = match override_duration {
            Some(value) => (value, DurationSourceTag::Manual),
            None => {
                let Some(value) = resolution.resolved_duration else {
                    return Err(AppError::NoConsensus);
                };
                (value, DurationSourceTag::Resolved)
            }
        };

        self.albums.update_track_duration(&resolution.track_id, value, source, false)?;

        if override_duration.is_some() {
            resolution.resolved_duration = Some(value);
        }
        resolution.status = ResolutionStatus::Approved;
        resolution.manually_reviewed = true;
        resolution.review_action = Some(ReviewAction::Apply);
        resolution.review_notes = notes;
        self.durations.update(&resolution)?;
        Ok(())
    }

    /// Reject a `needs_review` resolution. If any provider returned usable
    /// data, it's rerouted back to `needs_review` for a future retry pass
    /// rather than marked permanently dead (spec §4.7 "Review endpoints").
    pub fn reject_review(&self, resolution_id: &str, notes: Option<String>) -> Result<()> {
        let mut resolution = self
            .durations
            .get(resolution_id)?
            .ok_or_else(|| AppError::Other("resolution not found".into()))?;

        if resolution.status != ResolutionStatus::NeedsReview {
            return Err(AppError::InvalidState);
        }

        resolution.manually_reviewed = true;
        resolution.review_action = Some(ReviewAction::Reject);
        resolution.review_notes = notes;

        if resolution.sources_successful > 0 {
            resolution.status = ResolutionStatus::NeedsReview;
        } else {
            resolution.status = ResolutionStatus::Rejected;
            self.albums.clear_track_duration(&resolution.track_id, false)?;
        }

        self.durations.update(&resolution)?;
        Ok(())
    }

    /// Manual override: set a Track's duration directly, recording
    /// `review_action = manual`.
    pub fn manual_override(
        &self,
        track_id: &str,
        duration_s: i32,
        reviewer_id: Option<String>,
        notes: Option<String>,
    ) -> Result<()> {
        let existing = self.durations.find_by_track(track_id)?;
        let mut resolution = existing
            .clone()
            .unwrap_or_else(|| DurationResolution::new(track_id.to_string(), 0));

        resolution.resolved_duration = Some(duration_s);
        resolution.status = ResolutionStatus::Approved;
        resolution.manually_reviewed = true;
        resolution.auto_applied = false;
        resolution.review_action = Some(ReviewAction::Manual);
        resolution.reviewer_id = reviewer_id;
        resolution.review_notes = notes;

        self.albums
            .update_track_duration(track_id, duration_s, DurationSourceTag::Manual, false)?;

        if existing.is_some() {
            self.durations.update(&resolution)?;
        } else {
            self.durations.insert(&resolution)?;
        }

        Ok(())
    }
}

fn consensus_reached(counted: &[(String, i32, f64)], tolerance: i32, threshold: i32) -> bool {
    compute_consensus(counted, tolerance)
        .map(|(_, count)| count >= threshold)
        .unwrap_or(false)
}

/// Cluster counted durations within `tolerance` seconds of one another and
/// return `(value, count)` for the largest cluster, averaging its members
/// (spec §4.7 step 6). `None` if nothing was counted.
fn compute_consensus(counted: &[(String, i32, f64)], tolerance: i32) -> Option<(i32, i32)> {
    if counted.is_empty() {
        return None;
    }

    let mut best: Option<(i32, i32)> = None;
    for (_, candidate, _) in counted {
        let cluster: Vec<i32> = counted
            .iter()
            .map(|(_, d, _)| *d)
            .filter(|d| (d - candidate).abs() <= tolerance)
            .collect();
        let count = cluster.len() as i32;
        let avg = cluster.iter().sum::<i32>() / cluster.len() as i32;

        let better = match best {
            Some((_, best_count)) => count > best_count,
            None => true,
        };
        if better {
            best = Some((avg, count));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_consensus_finds_matching_pair() {
        let counted = vec![
            ("musicbrainz".to_string(), 259, 0.95),
            ("lastfm".to_string(), 260, 0.9),
        ];
        let (value, count) = compute_consensus(&counted, CONSENSUS_TOLERANCE_S).unwrap();
        assert_eq!(count, 2);
        assert!((257..=262).contains(&value));
    }

    #[test]
    fn test_compute_consensus_no_agreement_returns_best_single() {
        let counted = vec![
            ("musicbrainz".to_string(), 259, 0.95),
            ("wikipedia".to_string(), 400, 0.7),
        ];
        let (_, count) = compute_consensus(&counted, CONSENSUS_TOLERANCE_S).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_compute_consensus_empty_is_none() {
        assert!(compute_consensus(&[], CONSENSUS_TOLERANCE_S).is_none());
    }

    #[test]
    fn test_consensus_reached_true_when_threshold_met() {
        let counted = vec![
            ("musicbrainz".to_string(), 259, 0.95),
            ("lastfm".to_string(), 259, 0.9),
        ];
        assert!(consensus_reached(&counted, CONSENSUS_TOLERANCE_S, DEFAULT_CONSENSUS_THRESHOLD));
    }

    #[test]
    fn test_consensus_reached_false_with_single_source() {
        let counted = vec![("musicbrainz".to_string(), 259, 0.95)];
        assert!(!consensus_reached(&counted, CONSENSUS_TOLERANCE_S, DEFAULT_CONSENSUS_THRESHOLD));
    }
}
