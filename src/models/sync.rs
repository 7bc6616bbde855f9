//! Catalog sync progress and log entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    All,
    AllFolders,
    Specific,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::AllFolders => "all-folders",
            Self::Specific => "specific",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "all-folders" => Some(Self::AllFolders),
            "specific" => Some(Self::Specific),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Paused,
    Idle,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Idle => "idle",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }
}

/// One row per in-flight sync run. At most one active run per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub id: String,
    pub worker_id: String,
    pub username: String,
    pub sync_mode: SyncMode,
    pub current_folder: i64,
    pub folders: Vec<i64>,
    pub folder_index: usize,
    pub current_page: i32,
    pub processed: i64,
    pub total: i64,
    pub status: SyncStatus,
    pub last_activity: DateTime<Utc>,
}

impl SyncProgress {
    /// Stale-run rule: a `running` progress row whose `last_activity` is older
    /// than 30 minutes is reclassified `paused`. Idempotent and applied on load.
    pub fn reclassify_if_stale(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SyncStatus::Running
            && now.signed_duration_since(self.last_activity) > chrono::Duration::minutes(30)
        {
            self.status = SyncStatus::Paused;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorCategory {
    Album,
    Tracks,
    Transaction,
}

impl SyncErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Tracks => "tracks",
            Self::Transaction => "transaction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "album" => Some(Self::Album),
            "tracks" => Some(Self::Tracks),
            "transaction" => Some(Self::Transaction),
            _ => None,
        }
    }
}

/// Append-only error record per failed album/track import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: String,
    pub provider_id: Option<String>,
    pub album_title: String,
    pub artist: String,
    pub error_type: SyncErrorCategory,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SyncLog {
    pub fn new(
        provider_id: Option<String>,
        album_title: String,
        artist: String,
        error_type: SyncErrorCategory,
        message: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id,
            album_title,
            artist,
            error_type,
            message,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_roundtrip() {
        for mode in [SyncMode::All, SyncMode::AllFolders, SyncMode::Specific] {
            assert_eq!(SyncMode::from_str(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn test_stale_detection_boundary() {
        let mut progress = SyncProgress {
            id: "1".into(),
            worker_id: "w1".into(),
            username: "user".into(),
            sync_mode: SyncMode::All,
            current_folder: 0,
            folders: vec![0],
            folder_index: 0,
            current_page: 1,
            processed: 0,
            total: 0,
            status: SyncStatus::Running,
            last_activity: Utc::now() - chrono::Duration::minutes(31),
        };
        let now = Utc::now();
        assert!(progress.reclassify_if_stale(now));
        assert_eq!(progress.status, SyncStatus::Paused);
    }

    #[test]
    fn test_not_stale_under_threshold() {
        let mut progress = SyncProgress {
            id: "1".into(),
            worker_id: "w1".into(),
            username: "user".into(),
            sync_mode: SyncMode::All,
            current_folder: 0,
            folders: vec![0],
            folder_index: 0,
            current_page: 1,
            processed: 0,
            total: 0,
            status: SyncStatus::Running,
            last_activity: Utc::now() - chrono::Duration::minutes(10),
        };
        assert!(!progress.reclassify_if_stale(Utc::now()));
        assert_eq!(progress.status, SyncStatus::Running);
    }
}
