//! Duration resolution + source persistence, and the resolver's progress row.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use super::{parse_datetime, to_option, Result};
use crate::models::{DurationResolution, DurationSource, ResolutionStatus, ReviewAction};

const RESOLVER_PROGRESS_ID: &str = "current";

/// The resolver's analogue of SyncProgress (spec §3 "DurationResolverProgress").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DurationResolverProgress {
    pub worker_id: String,
    pub status: crate::models::SyncStatus,
    pub processed: i64,
    pub total: i64,
    pub resolved: i64,
    pub needs_review: i64,
    pub failed: i64,
    pub skipped: i64,
    pub current_track_id: Option<String>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

pub struct DurationRepository {
    db_path: PathBuf,
}

impl DurationRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS duration_resolutions (
                id TEXT PRIMARY KEY,
                track_id TEXT NOT NULL,
                status TEXT NOT NULL,
                original_duration INTEGER NOT NULL,
                resolved_duration INTEGER,
                sources_queried INTEGER NOT NULL DEFAULT 0,
                sources_successful INTEGER NOT NULL DEFAULT 0,
                consensus_count INTEGER NOT NULL DEFAULT 0,
                auto_applied INTEGER NOT NULL DEFAULT 0,
                manually_reviewed INTEGER NOT NULL DEFAULT 0,
                reviewer_id TEXT,
                review_action TEXT,
                review_notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_resolutions_track ON duration_resolutions(track_id);

            CREATE TABLE IF NOT EXISTS duration_sources (
                id TEXT PRIMARY KEY,
                resolution_id TEXT NOT NULL REFERENCES duration_resolutions(id) ON DELETE CASCADE,
                source_name TEXT NOT NULL,
                duration_s INTEGER,
                match_score REAL,
                confidence REAL,
                external_id TEXT,
                external_url TEXT,
                raw_response TEXT,
                error_message TEXT,
                queried_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sources_resolution ON duration_sources(resolution_id);

            CREATE TABLE IF NOT EXISTS duration_resolver_progress (
                id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                status TEXT NOT NULL,
                processed INTEGER NOT NULL,
                total INTEGER NOT NULL,
                resolved INTEGER NOT NULL,
                needs_review INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                current_track_id TEXT,
                last_activity TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    pub fn find_by_track(&self, track_id: &str) -> Result<Option<DurationResolution>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM duration_resolutions WHERE track_id = ?")?;
        to_option(stmt.query_row(params![track_id], Self::row_to_resolution))
    }

    pub fn get(&self, id: &str) -> Result<Option<DurationResolution>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM duration_resolutions WHERE id = ?")?;
        to_option(stmt.query_row(params![id], Self::row_to_resolution))
    }

    /// Delete a resolution and its sources (used when retrying `failed` /
    /// `needs_review` rows; never called for resolved/approved — see
    /// `ResolutionStatus::is_retry_protected`).
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM duration_resolutions WHERE id = ?", params![id])?;
        Ok(())
    }

    pub fn insert(&self, resolution: &DurationResolution) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO duration_resolutions (
                id, track_id, status, original_duration, resolved_duration,
                sources_queried, sources_successful, consensus_count, auto_applied,
                manually_reviewed, reviewer_id, review_action, review_notes,
                created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        "#,
            params![
                resolution.id,
                resolution.track_id,
                resolution.status.as_str(),
                resolution.original_duration,
                resolution.resolved_duration,
                resolution.sources_queried,
                resolution.sources_successful,
                resolution.consensus_count,
                resolution.auto_applied as i64,
                resolution.manually_reviewed as i64,
                resolution.reviewer_id,
                resolution.review_action.map(|a| a.as_str()),
                resolution.review_notes,
                resolution.created_at.to_rfc3339(),
                resolution.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, resolution: &DurationResolution) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE duration_resolutions SET
                status = ?1, resolved_duration = ?2, sources_queried = ?3,
                sources_successful = ?4, consensus_count = ?5, auto_applied = ?6,
                manually_reviewed = ?7, reviewer_id = ?8, review_action = ?9,
                review_notes = ?10, updated_at = ?11
            WHERE id = ?12
        "#,
            params![
                resolution.status.as_str(),
                resolution.resolved_duration,
                resolution.sources_queried,
                resolution.sources_successful,
                resolution.consensus_count,
                resolution.auto_applied as i64,
                resolution.manually_reviewed as i64,
                resolution.reviewer_id,
                resolution.review_action.map(|a| a.as_str()),
                resolution.review_notes,
                chrono::Utc::now().to_rfc3339(),
                resolution.id,
            ],
        )?;
        Ok(())
    }

    pub fn add_source(&self, source: &DurationSource) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO duration_sources (
                id, resolution_id, source_name, duration_s, match_score, confidence,
                external_id, external_url, raw_response, error_message, queried_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
        "#,
            params![
                source.id,
                source.resolution_id,
                source.source_name,
                source.duration_s,
                source.match_score,
                source.confidence,
                source.external_id,
                source.external_url,
                source.raw_response,
                source.error_message,
                source.queried_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn sources_for(&self, resolution_id: &str) -> Result<Vec<DurationSource>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM duration_sources WHERE resolution_id = ? ORDER BY queried_at")?;
        let sources = stmt
            .query_map(params![resolution_id], Self::row_to_source)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    pub fn pending_review(&self) -> Result<Vec<DurationResolution>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM duration_resolutions WHERE status = 'needs_review' ORDER BY created_at",
        )?;
        let resolutions = stmt
            .query_map([], Self::row_to_resolution)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(resolutions)
    }

    pub fn save_progress(&self, progress: &DurationResolverProgress) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO duration_resolver_progress (
                id, worker_id, status, processed, total, resolved, needs_review,
                failed, skipped, current_track_id, last_activity
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            ON CONFLICT(id) DO UPDATE SET
                worker_id = excluded.worker_id,
                status = excluded.status,
                processed = excluded.processed,
                total = excluded.total,
                resolved = excluded.resolved,
                needs_review = excluded.needs_review,
                failed = excluded.failed,
                skipped = excluded.skipped,
                current_track_id = excluded.current_track_id,
                last_activity = excluded.last_activity
        "#,
            params![
                RESOLVER_PROGRESS_ID,
                progress.worker_id,
                progress.status.as_str(),
                progress.processed,
                progress.total,
                progress.resolved,
                progress.needs_review,
                progress.failed,
                progress.skipped,
                progress.current_track_id,
                progress.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_progress(&self) -> Result<Option<DurationResolverProgress>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM duration_resolver_progress WHERE id = ?")?;
        let loaded = to_option(stmt.query_row(params![RESOLVER_PROGRESS_ID], |row| {
            Ok(DurationResolverProgress {
                worker_id: row.get("worker_id")?,
                status: crate::models::SyncStatus::from_str(&row.get::<_, String>("status")?)
                    .unwrap_or(crate::models::SyncStatus::Idle),
                processed: row.get("processed")?,
                total: row.get("total")?,
                resolved: row.get("resolved")?,
                needs_review: row.get("needs_review")?,
                failed: row.get("failed")?,
                skipped: row.get("skipped")?,
                current_track_id: row.get("current_track_id")?,
                last_activity: parse_datetime(&row.get::<_, String>("last_activity")?),
            })
        }))?;

        let Some(mut progress) = loaded else {
            return Ok(None);
        };

        if progress.status == crate::models::SyncStatus::Running
            && chrono::Utc::now().signed_duration_since(progress.last_activity)
                > chrono::Duration::minutes(30)
        {
            progress.status = crate::models::SyncStatus::Paused;
            drop(stmt);
            self.save_progress(&progress)?;
        }

        Ok(Some(progress))
    }

    pub fn clear_progress(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM duration_resolver_progress WHERE id = ?",
            params![RESOLVER_PROGRESS_ID],
        )?;
        Ok(())
    }

    fn row_to_resolution(row: &rusqlite::Row) -> rusqlite::Result<DurationResolution> {
        Ok(DurationResolution {
            id: row.get("id")?,
            track_id: row.get("track_id")?,
            status: ResolutionStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(ResolutionStatus::Failed),
            original_duration: row.get("original_duration")?,
            resolved_duration: row.get("resolved_duration")?,
            sources_queried: row.get("sources_queried")?,
            sources_successful: row.get("sources_successful")?,
            consensus_count: row.get("consensus_count")?,
            auto_applied: row.get::<_, i64>("auto_applied")? != 0,
            manually_reviewed: row.get::<_, i64>("manually_reviewed")? != 0,
            reviewer_id: row.get("reviewer_id")?,
            review_action: row
                .get::<_, Option<String>>("review_action")?
                .and_then(|s| ReviewAction::from_str(&s)),
            review_notes: row.get("review_notes")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        })
    }

    fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<DurationSource> {
        Ok(DurationSource {
            id: row.get("id")?,
            resolution_id: row.get("resolution_id")?,
            source_name: row.get("source_name")?,
            duration_s: row.get("duration_s")?,
            match_score: row.get("match_score")?,
            confidence: row.get("confidence")?,
            external_id: row.get("external_id")?,
            external_url: row.get("external_url")?,
            raw_response: row.get("raw_response")?,
            error_message: row.get("error_message")?,
            queried_at: parse_datetime(&row.get::<_, String>("queried_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, DurationRepository) {
        let dir = TempDir::new().unwrap();
        let repo = DurationRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_insert_and_find_by_track() {
        let (_dir, repo) = repo();
        let resolution = DurationResolution::new("track-1".into(), 0);
        repo.insert(&resolution).unwrap();

        let found = repo.find_by_track("track-1").unwrap().unwrap();
        assert_eq!(found.status, ResolutionStatus::InProgress);
    }

    #[test]
    fn test_add_and_list_sources() {
        let (_dir, repo) = repo();
        let resolution = DurationResolution::new("track-1".into(), 0);
        repo.insert(&resolution).unwrap();

        let source = DurationSource::success(
            resolution.id.clone(),
            "musicbrainz".into(),
            259,
            0.95,
            0.9,
            None,
            None,
            None,
        );
        repo.add_source(&source).unwrap();

        let sources = repo.sources_for(&resolution.id).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].duration_s, Some(259));
    }

    #[test]
    fn test_delete_retry_protected_not_called_for_resolved() {
        let (_dir, repo) = repo();
        let mut resolution = DurationResolution::new("track-1".into(), 0);
        resolution.status = ResolutionStatus::Resolved;
        repo.insert(&resolution).unwrap();

        assert!(resolution.status.is_retry_protected());
        // retry logic in the resolver worker must not call delete() here.
        assert!(repo.find_by_track("track-1").unwrap().is_some());
    }
}
