//! Progress Store (C3): durable checkpoint + stale-run detection.
//!
//! Thin wrappers over the repository layer. The stale-rewrite rule itself
//! lives in `repository::sync`/`repository::duration` (the load() call is
//! where the correction happens); these stores exist so workers have a
//! single call surface per subsystem, not a raw SQL layer.

use std::path::Path;

use crate::models::SyncProgress;
use crate::repository::duration::DurationResolverProgress;
use crate::repository::{DurationRepository, Result, SyncProgressRepository};

pub struct SyncProgressStore {
    repo: SyncProgressRepository,
}

impl SyncProgressStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self {
            repo: SyncProgressRepository::new(db_path)?,
        })
    }

    pub fn save(&self, snapshot: &SyncProgress) -> Result<()> {
        self.repo.save(snapshot)
    }

    pub fn load(&self) -> Result<Option<SyncProgress>> {
        self.repo.load()
    }

    pub fn archive_to_history(&self, snapshot: &SyncProgress) -> Result<()> {
        self.repo.archive_to_history(snapshot)
    }

    pub fn delete(&self) -> Result<()> {
        self.repo.delete()
    }
}

pub struct DurationProgressStore {
    repo: DurationRepository,
}

impl DurationProgressStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self {
            repo: DurationRepository::new(db_path)?,
        })
    }

    pub fn save(&self, snapshot: &DurationResolverProgress) -> Result<()> {
        self.repo.save_progress(snapshot)
    }

    pub fn load(&self) -> Result<Option<DurationResolverProgress>> {
        self.repo.load_progress()
    }

    pub fn delete(&self) -> Result<()> {
        self.repo.clear_progress()
    }
}
