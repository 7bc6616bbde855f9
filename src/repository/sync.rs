//! Sync progress/log persistence (C3 Progress Store, sync half).

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use super::{parse_datetime, to_option, Result};
use crate::models::{SyncErrorCategory, SyncLog, SyncMode, SyncProgress, SyncStatus};

const SYNC_PROGRESS_ID: &str = "current";

pub struct SyncProgressRepository {
    db_path: PathBuf,
}

impl SyncProgressRepository {
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
            CREATE TABLE IF NOT EXISTS sync_progress (
                id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                username TEXT NOT NULL,
                sync_mode TEXT NOT NULL,
                current_folder INTEGER NOT NULL,
                folders TEXT NOT NULL,
                folder_index INTEGER NOT NULL,
                current_page INTEGER NOT NULL,
                processed INTEGER NOT NULL,
                total INTEGER NOT NULL,
                status TEXT NOT NULL,
                last_activity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_progress_history (
                id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                username TEXT NOT NULL,
                sync_mode TEXT NOT NULL,
                processed INTEGER NOT NULL,
                total INTEGER NOT NULL,
                completed_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Upsert on the fixed primary key, called after every album (spec §4.3).
    pub fn save(&self, progress: &SyncProgress) -> Result<()> {
        let conn = self.connect()?;
        let folders_json = serde_json::to_string(&progress.folders)?;
        conn.execute(
            r#"
            INSERT INTO sync_progress (
                id, worker_id, username, sync_mode, current_folder, folders,
                folder_index, current_page, processed, total, status, last_activity
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
            ON CONFLICT(id) DO UPDATE SET
                worker_id = excluded.worker_id,
                username = excluded.username,
                sync_mode = excluded.sync_mode,
                current_folder = excluded.current_folder,
                folders = excluded.folders,
                folder_index = excluded.folder_index,
                current_page = excluded.current_page,
                processed = excluded.processed,
                total = excluded.total,
                status = excluded.status,
                last_activity = excluded.last_activity
        "#,
            params![
                SYNC_PROGRESS_ID,
                progress.worker_id,
                progress.username,
                progress.sync_mode.as_str(),
                progress.current_folder,
                folders_json,
                progress.folder_index as i64,
                progress.current_page,
                progress.processed,
                progress.total,
                progress.status.as_str(),
                progress.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Loads the single in-flight row, rewriting to `paused` in place if stale
    /// (spec §4.3 "Stale detection"). The correction is persisted before the
    /// value is returned.
    pub fn load(&self) -> Result<Option<SyncProgress>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM sync_progress WHERE id = ?")?;
        let loaded = to_option(stmt.query_row(params![SYNC_PROGRESS_ID], Self::row_to_progress))?;

        let Some(mut progress) = loaded else {
            return Ok(None);
        };

        if progress.reclassify_if_stale(chrono::Utc::now()) {
            drop(stmt);
            self.save(&progress)?;
        }

        Ok(Some(progress))
    }

    /// Archive a completed run to history and clear the in-flight row.
    pub fn archive_to_history(&self, progress: &SyncProgress) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO sync_progress_history (
                id, worker_id, username, sync_mode, processed, total, completed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7)
        "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                progress.worker_id,
                progress.username,
                progress.sync_mode.as_str(),
                progress.processed,
                progress.total,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        conn.execute("DELETE FROM sync_progress WHERE id = ?", params![SYNC_PROGRESS_ID])?;
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM sync_progress WHERE id = ?", params![SYNC_PROGRESS_ID])?;
        Ok(())
    }

    fn row_to_progress(row: &rusqlite::Row) -> rusqlite::Result<SyncProgress> {
        let folders_json: String = row.get("folders")?;
        let folders: Vec<i64> = serde_json::from_str(&folders_json).unwrap_or_default();
        Ok(SyncProgress {
            id: row.get("id")?,
            worker_id: row.get("worker_id")?,
            username: row.get("username")?,
            sync_mode: SyncMode::from_str(&row.get::<_, String>("sync_mode")?).unwrap_or(SyncMode::All),
            current_folder: row.get("current_folder")?,
            folders,
            folder_index: row.get::<_, i64>("folder_index")? as usize,
            current_page: row.get("current_page")?,
            processed: row.get("processed")?,
            total: row.get("total")?,
            status: SyncStatus::from_str(&row.get::<_, String>("status")?).unwrap_or(SyncStatus::Idle),
            last_activity: parse_datetime(&row.get::<_, String>("last_activity")?),
        })
    }
}

pub struct SyncLogRepository {
    db_path: PathBuf,
}

impl SyncLogRepository {
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
            CREATE TABLE IF NOT EXISTS sync_logs (
                id TEXT PRIMARY KEY,
                provider_id TEXT,
                album_title TEXT NOT NULL,
                artist TEXT NOT NULL,
                error_type TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    pub fn append(&self, log: &SyncLog) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO sync_logs (id, provider_id, album_title, artist, error_type, message, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7)
        "#,
            params![
                log.id,
                log.provider_id,
                log.album_title,
                log.artist,
                log.error_type.as_str(),
                log.message,
                log.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent(&self, limit: i64) -> Result<Vec<SyncLog>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM sync_logs ORDER BY created_at DESC LIMIT ?")?;
        let logs = stmt
            .query_map(params![limit], |row| {
                Ok(SyncLog {
                    id: row.get("id")?,
                    provider_id: row.get("provider_id")?,
                    album_title: row.get("album_title")?,
                    artist: row.get("artist")?,
                    error_type: SyncErrorCategory::from_str(&row.get::<_, String>("error_type")?)
                        .unwrap_or(SyncErrorCategory::Album),
                    message: row.get("message")?,
                    created_at: parse_datetime(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn progress_repo() -> (TempDir, SyncProgressRepository) {
        let dir = TempDir::new().unwrap();
        let repo = SyncProgressRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (_dir, repo) = progress_repo();
        let progress = SyncProgress {
            id: "current".into(),
            worker_id: "w1".into(),
            username: "alice".into(),
            sync_mode: SyncMode::AllFolders,
            current_folder: 3,
            folders: vec![0, 1, 3],
            folder_index: 2,
            current_page: 5,
            processed: 17,
            total: 0,
            status: SyncStatus::Running,
            last_activity: chrono::Utc::now(),
        };
        repo.save(&progress).unwrap();

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded.processed, 17);
        assert_eq!(loaded.folders, vec![0, 1, 3]);
        assert_eq!(loaded.status, SyncStatus::Running);
    }

    #[test]
    fn test_load_rewrites_stale_running_to_paused() {
        let (_dir, repo) = progress_repo();
        let progress = SyncProgress {
            id: "current".into(),
            worker_id: "w1".into(),
            username: "alice".into(),
            sync_mode: SyncMode::All,
            current_folder: 0,
            folders: vec![0],
            folder_index: 0,
            current_page: 1,
            processed: 5,
            total: 0,
            status: SyncStatus::Running,
            last_activity: chrono::Utc::now() - chrono::Duration::minutes(45),
        };
        repo.save(&progress).unwrap();

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded.status, SyncStatus::Paused);

        // Correction is persisted, not just returned.
        let reloaded = repo.load().unwrap().unwrap();
        assert_eq!(reloaded.status, SyncStatus::Paused);
    }

    #[test]
    fn test_archive_clears_in_flight_row() {
        let (_dir, repo) = progress_repo();
        let progress = SyncProgress {
            id: "current".into(),
            worker_id: "w1".into(),
            username: "alice".into(),
            sync_mode: SyncMode::All,
            current_folder: 0,
            folders: vec![0],
            folder_index: 0,
            current_page: 1,
            processed: 3,
            total: 3,
            status: SyncStatus::Idle,
            last_activity: chrono::Utc::now(),
        };
        repo.save(&progress).unwrap();
        repo.archive_to_history(&progress).unwrap();
        assert!(repo.load().unwrap().is_none());
    }
}
