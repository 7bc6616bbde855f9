//! Album and Track entities.
//!
//! An Album either has no tracks or all of its tracks: partial track lists
//! must never be committed (see `sync::CatalogSyncWorker`'s transactional
//! import).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a track's duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSourceTag {
    Discogs,
    Resolved,
    Manual,
}

impl DurationSourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discogs => "discogs",
            Self::Resolved => "resolved",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discogs" => Some(Self::Discogs),
            "resolved" => Some(Self::Resolved),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub provider_release_id: Option<String>,
    pub master_release_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub country: Option<String>,
    pub cover_image: Option<Vec<u8>>,
    pub cover_image_mime: Option<String>,
    pub cover_image_failed: bool,
    pub release_date: Option<String>,
    pub folder_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub fn new(title: String, artist: String, folder_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_release_id: None,
            master_release_id: None,
            title,
            artist,
            year: None,
            genre: None,
            label: None,
            country: None,
            cover_image: None,
            cover_image_mime: None,
            cover_image_failed: false,
            release_date: None,
            folder_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity match per spec §3: by provider release id first, else
    /// (title, artist).
    pub fn matches(&self, other: &Album) -> bool {
        match (&self.provider_release_id, &other.provider_release_id) {
            (Some(a), Some(b)) if a == b => return true,
            _ => {}
        }
        self.title.eq_ignore_ascii_case(&other.title) && self.artist.eq_ignore_ascii_case(&other.artist)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub album_id: String,
    pub title: String,
    pub track_number: i32,
    pub disc_number: i32,
    /// Single capital letter `A`..`F`, or empty if unknown.
    pub side_code: String,
    pub raw_position: String,
    /// Whole seconds; 0 means unknown.
    pub duration_s: i32,
    pub duration_source: Option<DurationSourceTag>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub needs_review: bool,
}

impl Track {
    pub fn new(album_id: String, title: String, raw_position: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            album_id,
            title,
            track_number: 0,
            disc_number: 1,
            side_code: String::new(),
            raw_position,
            duration_s: 0,
            duration_source: None,
            resolved_at: None,
            needs_review: false,
        }
    }

    pub fn needs_duration(&self) -> bool {
        self.duration_s == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_source_tag_roundtrip() {
        for tag in [
            DurationSourceTag::Discogs,
            DurationSourceTag::Resolved,
            DurationSourceTag::Manual,
        ] {
            assert_eq!(DurationSourceTag::from_str(tag.as_str()), Some(tag));
        }
        assert_eq!(DurationSourceTag::from_str("bogus"), None);
    }

    #[test]
    fn test_album_matches_by_release_id() {
        let mut a = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
        let mut b = Album::new("abbey road".into(), "the beatles".into(), 1);
        assert!(a.matches(&b), "case-insensitive title/artist fallback");

        a.provider_release_id = Some("1".into());
        b.provider_release_id = Some("2".into());
        b.title = "Something Else".into();
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_track_needs_duration() {
        let t = Track::new("album-1".into(), "Come Together".into(), "A1".into());
        assert!(t.needs_duration());
    }
}
