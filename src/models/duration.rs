//! Duration resolution entities (C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    InProgress,
    Resolved,
    NeedsReview,
    Failed,
    Approved,
    Rejected,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::NeedsReview => "needs_review",
            Self::Failed => "failed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "needs_review" => Some(Self::NeedsReview),
            "failed" => Some(Self::Failed),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Resolutions in these terminal states are never deleted on retry
    /// (spec §3 "DurationResolution" lifecycle).
    pub fn is_retry_protected(&self) -> bool {
        matches!(self, Self::Resolved | Self::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Apply,
    Reject,
    Manual,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Reject => "reject",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "apply" => Some(Self::Apply),
            "reject" => Some(Self::Reject),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One row per track duration-resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationResolution {
    pub id: String,
    pub track_id: String,
    pub status: ResolutionStatus,
    pub original_duration: i32,
    pub resolved_duration: Option<i32>,
    pub sources_queried: i32,
    pub sources_successful: i32,
    pub consensus_count: i32,
    pub auto_applied: bool,
    pub manually_reviewed: bool,
    pub reviewer_id: Option<String>,
    pub review_action: Option<ReviewAction>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DurationResolution {
    pub fn new(track_id: String, original_duration: i32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            track_id,
            status: ResolutionStatus::InProgress,
            original_duration,
            resolved_duration: None,
            sources_queried: 0,
            sources_successful: 0,
            consensus_count: 0,
            auto_applied: false,
            manually_reviewed: false,
            reviewer_id: None,
            review_action: None,
            review_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Child of DurationResolution, one per queried provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationSource {
    pub id: String,
    pub resolution_id: String,
    pub source_name: String,
    pub duration_s: Option<i32>,
    pub match_score: Option<f64>,
    pub confidence: Option<f64>,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub raw_response: Option<String>,
    pub error_message: Option<String>,
    pub queried_at: DateTime<Utc>,
}

impl DurationSource {
    pub fn success(
        resolution_id: String,
        source_name: String,
        duration_s: i32,
        match_score: f64,
        confidence: f64,
        external_id: Option<String>,
        external_url: Option<String>,
        raw_response: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resolution_id,
            source_name,
            duration_s: Some(duration_s),
            match_score: Some(match_score),
            confidence: Some(confidence),
            external_id,
            external_url,
            raw_response,
            error_message: None,
            queried_at: Utc::now(),
        }
    }

    pub fn failure(resolution_id: String, source_name: String, error_message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resolution_id,
            source_name,
            duration_s: None,
            match_score: None,
            confidence: None,
            external_id: None,
            external_url: None,
            raw_response: None,
            error_message: Some(error_message),
            queried_at: Utc::now(),
        }
    }

    /// Counted toward consensus only if `match_score >= min_match_score` and
    /// `duration_s > 0` (spec §4.7 step 5).
    pub fn counts_toward_consensus(&self, min_match_score: f64) -> bool {
        match (self.duration_s, self.match_score) {
            (Some(d), Some(score)) => d > 0 && score >= min_match_score,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_status_roundtrip() {
        for status in [
            ResolutionStatus::InProgress,
            ResolutionStatus::Resolved,
            ResolutionStatus::NeedsReview,
            ResolutionStatus::Failed,
            ResolutionStatus::Approved,
            ResolutionStatus::Rejected,
        ] {
            assert_eq!(ResolutionStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_retry_protected_statuses() {
        assert!(ResolutionStatus::Resolved.is_retry_protected());
        assert!(ResolutionStatus::Approved.is_retry_protected());
        assert!(!ResolutionStatus::Failed.is_retry_protected());
        assert!(!ResolutionStatus::NeedsReview.is_retry_protected());
    }

    #[test]
    fn test_counts_toward_consensus() {
        let good = DurationSource::success(
            "r1".into(),
            "musicbrainz".into(),
            259,
            0.95,
            0.9,
            None,
            None,
            None,
        );
        assert!(good.counts_toward_consensus(0.6));

        let low_score = DurationSource::success(
            "r1".into(),
            "wikipedia".into(),
            259,
            0.4,
            0.4,
            None,
            None,
            None,
        );
        assert!(!low_score.counts_toward_consensus(0.6));

        let failed = DurationSource::failure("r1".into(), "youtube".into(), "no match".into());
        assert!(!failed.counts_toward_consensus(0.6));
    }
}
