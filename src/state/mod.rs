//! Status FSM + pause/resume/cancel signaling (C2).
//!
//! One `StateManager` instance is shared between a worker task and the
//! controller handlers that request transitions. Transitions are guarded by
//! a single RW lock; illegal transitions are rejected rather than panicking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub status: Status,
    pub worker_id: Option<String>,
    pub last_activity: DateTime<Utc>,
}

struct Inner {
    status: Status,
    worker_id: Option<String>,
    last_activity: DateTime<Utc>,
}

/// Shared FSM instance. Clone is cheap — all clones see the same state.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<RwLock<Inner>>,
    workers: Arc<RwLock<HashSet<String>>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                status: Status::Idle,
                worker_id: None,
                last_activity: Utc::now(),
            })),
            workers: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn get_state(&self) -> StateSnapshot {
        let inner = self.inner.read().await;
        StateSnapshot {
            status: inner.status,
            worker_id: inner.worker_id.clone(),
            last_activity: inner.last_activity,
        }
    }

    /// Apply an arbitrary mutation under the write lock — intended for
    /// counter bumps (`processed += 1`, `last_activity = now`, etc.), not
    /// transitions.
    pub async fn update_state<F>(&self, f: F)
    where
        F: FnOnce(&mut StateSnapshot),
    {
        let mut inner = self.inner.write().await;
        let mut snapshot = StateSnapshot {
            status: inner.status,
            worker_id: inner.worker_id.clone(),
            last_activity: inner.last_activity,
        };
        f(&mut snapshot);
        inner.status = snapshot.status;
        inner.worker_id = snapshot.worker_id;
        inner.last_activity = snapshot.last_activity;
    }

    pub async fn start(&self, worker_id: String) -> bool {
        let mut inner = self.inner.write().await;
        if inner.status != Status::Idle {
            return false;
        }
        inner.status = Status::Running;
        inner.worker_id = Some(worker_id.clone());
        inner.last_activity = Utc::now();
        drop(inner);
        self.workers.write().await.insert(worker_id);
        true
    }

    pub async fn request_pause(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.status != Status::Running {
            return false;
        }
        inner.status = Status::Paused;
        true
    }

    pub async fn request_resume(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.status != Status::Paused {
            return false;
        }
        inner.status = Status::Running;
        inner.last_activity = Utc::now();
        true
    }

    pub async fn request_cancel(&self) -> bool {
        let mut inner = self.inner.write().await;
        if !matches!(inner.status, Status::Running | Status::Paused) {
            return false;
        }
        inner.status = Status::Stopping;
        true
    }

    /// Worker exit: clears the worker id and returns to `idle` regardless of
    /// the prior status (running, paused, or stopping).
    pub async fn mark_exited(&self, worker_id: &str) {
        let mut inner = self.inner.write().await;
        inner.status = Status::Idle;
        inner.worker_id = None;
        drop(inner);
        self.workers.write().await.remove(worker_id);
    }

    pub async fn active_workers(&self) -> Vec<String> {
        self.workers.read().await.iter().cloned().collect()
    }

    /// Blocks until status leaves `paused`, polling at 100ms granularity.
    /// Returns `Err(())` if `ctx` is cancelled first.
    pub async fn wait_for_resume(&self, ctx: &CancellationToken) -> Result<(), ()> {
        loop {
            if ctx.is_cancelled() {
                return Err(());
            }
            if self.get_state().await.status != Status::Paused {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = ctx.cancelled() => return Err(()),
            }
        }
    }

    pub async fn wait_for_pause(&self, ctx: &CancellationToken) -> Result<(), ()> {
        loop {
            if ctx.is_cancelled() {
                return Err(());
            }
            if self.get_state().await.status == Status::Paused {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = ctx.cancelled() => return Err(()),
            }
        }
    }

    pub async fn wait_for_stop(&self, ctx: &CancellationToken) -> Result<(), ()> {
        loop {
            if ctx.is_cancelled() {
                return Err(());
            }
            if self.get_state().await.status == Status::Idle {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = ctx.cancelled() => return Err(()),
            }
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_illegal_pause_while_idle_is_noop() {
        let sm = StateManager::new();
        assert!(!sm.request_pause().await);
        assert_eq!(sm.get_state().await.status, Status::Idle);
    }

    #[tokio::test]
    async fn test_legal_transition_sequence() {
        let sm = StateManager::new();
        assert!(sm.start("w1".into()).await);
        assert_eq!(sm.get_state().await.status, Status::Running);

        assert!(sm.request_pause().await);
        assert_eq!(sm.get_state().await.status, Status::Paused);

        assert!(sm.request_resume().await);
        assert_eq!(sm.get_state().await.status, Status::Running);

        assert!(sm.request_cancel().await);
        assert_eq!(sm.get_state().await.status, Status::Stopping);

        sm.mark_exited("w1").await;
        assert_eq!(sm.get_state().await.status, Status::Idle);
        assert!(sm.active_workers().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_from_idle_rejected() {
        let sm = StateManager::new();
        assert!(!sm.request_cancel().await);
    }

    #[tokio::test]
    async fn test_wait_for_resume_unblocks_on_resume() {
        let sm = StateManager::new();
        sm.start("w1".into()).await;
        sm.request_pause().await;

        let sm2 = sm.clone();
        let handle = tokio::spawn(async move {
            let ctx = CancellationToken::new();
            sm2.wait_for_resume(&ctx).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        sm.request_resume().await;

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_resume_respects_cancellation() {
        let sm = StateManager::new();
        sm.start("w1".into()).await;
        sm.request_pause().await;

        let ctx = CancellationToken::new();
        let ctx2 = ctx.clone();
        ctx2.cancel();

        assert!(sm.wait_for_resume(&ctx).await.is_err());
    }
}
