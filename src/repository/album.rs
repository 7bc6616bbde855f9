//! Album + Track persistence, including the atomic album+tracks transaction.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use super::{parse_datetime, parse_datetime_opt, to_option, Result};
use crate::models::{Album, DurationSourceTag, Track};

pub struct AlbumRepository {
    db_path: PathBuf,
}

impl AlbumRepository {
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
            CREATE TABLE IF NOT EXISTS albums (
                id TEXT PRIMARY KEY,
                provider_release_id TEXT,
                master_release_id TEXT,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                year INTEGER,
                genre TEXT,
                label TEXT,
                country TEXT,
                cover_image BLOB,
                cover_image_mime TEXT,
                cover_image_failed INTEGER NOT NULL DEFAULT 0,
                release_date TEXT,
                folder_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_albums_release_id ON albums(provider_release_id);
            CREATE INDEX IF NOT EXISTS idx_albums_title_artist ON albums(title, artist);

            CREATE TABLE IF NOT EXISTS tracks (
                id TEXT PRIMARY KEY,
                album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                track_number INTEGER NOT NULL,
                disc_number INTEGER NOT NULL,
                side_code TEXT NOT NULL DEFAULT '',
                raw_position TEXT NOT NULL DEFAULT '',
                duration_s INTEGER NOT NULL DEFAULT 0,
                duration_source TEXT,
                resolved_at TEXT,
                needs_review INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(album_id);
            CREATE INDEX IF NOT EXISTS idx_tracks_needs_duration ON tracks(duration_s);

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

    pub fn find_by_release_id(&self, release_id: &str) -> Result<Option<Album>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM albums WHERE provider_release_id = ?")?;
        to_option(stmt.query_row(params![release_id], Self::row_to_album))
    }

    pub fn find_by_title_artist(&self, title: &str, artist: &str) -> Result<Option<Album>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM albums WHERE title = ?1 COLLATE NOCASE AND artist = ?2 COLLATE NOCASE")?;
        to_option(stmt.query_row(params![title, artist], Self::row_to_album))
    }

    pub fn get(&self, id: &str) -> Result<Option<Album>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM albums WHERE id = ?")?;
        to_option(stmt.query_row(params![id], Self::row_to_album))
    }

    pub fn tracks_for_album(&self, album_id: &str) -> Result<Vec<Track>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM tracks WHERE album_id = ? ORDER BY disc_number, track_number")?;
        let tracks = stmt
            .query_map(params![album_id], Self::row_to_track)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    /// Insert a new album together with all of its tracks in one transaction.
    /// Either everything commits, or nothing does (spec §3 Album invariant).
    pub fn insert_album_with_tracks(&self, album: &Album, tracks: &[Track]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO albums (
                id, provider_release_id, master_release_id, title, artist, year,
                genre, label, country, cover_image, cover_image_mime,
                cover_image_failed, release_date, folder_id, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
        "#,
            params![
                album.id,
                album.provider_release_id,
                album.master_release_id,
                album.title,
                album.artist,
                album.year,
                album.genre,
                album.label,
                album.country,
                album.cover_image,
                album.cover_image_mime,
                album.cover_image_failed as i64,
                album.release_date,
                album.folder_id,
                album.created_at.to_rfc3339(),
                album.updated_at.to_rfc3339(),
            ],
        )?;

        for track in tracks {
            if track.album_id == album.id {
                Self::insert_track(&tx, track)?;
            } else {
                let mut stamped = track.clone();
                stamped.album_id = album.id.clone();
                Self::insert_track(&tx, &stamped)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_track(tx: &rusqlite::Transaction<'_>, track: &Track) -> Result<()> {
        tx.execute(
            r#"
            INSERT INTO tracks (
                id, album_id, title, track_number, disc_number, side_code,
                raw_position, duration_s, duration_source, resolved_at, needs_review
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
        "#,
            params![
                track.id,
                track.album_id,
                track.title,
                track.track_number,
                track.disc_number,
                track.side_code,
                track.raw_position,
                track.duration_s,
                track.duration_source.map(|t| t.as_str()),
                track.resolved_at.map(|dt| dt.to_rfc3339()),
                track.needs_review as i64,
            ],
        )?;
        Ok(())
    }

    /// Selective upsert for an existing album (spec §4.5 "Existing-album
    /// policy"): backfill missing provider id, update folder if changed,
    /// replace cover only on a successful new download, backfill missing year.
    /// Never mass-overwrites user data.
    pub fn upsert_existing(
        &self,
        existing_id: &str,
        new_release_id: Option<&str>,
        new_folder_id: i64,
        new_year: Option<i32>,
        new_cover: Option<(&[u8], &str)>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let existing = to_option(conn.query_row(
            "SELECT provider_release_id, folder_id, year FROM albums WHERE id = ?",
            params![existing_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i32>>(2)?,
                ))
            },
        ))?;

        let Some((old_release_id, old_folder_id, old_year)) = existing else {
            return Ok(());
        };

        let release_id = old_release_id.as_deref().or(new_release_id).map(str::to_string);
        let folder_id = if new_folder_id != old_folder_id {
            new_folder_id
        } else {
            old_folder_id
        };
        let year = old_year.or(new_year);

        if let Some((bytes, mime)) = new_cover {
            conn.execute(
                r#"UPDATE albums SET provider_release_id = ?1, folder_id = ?2, year = ?3,
                   cover_image = ?4, cover_image_mime = ?5, cover_image_failed = 0,
                   updated_at = ?6 WHERE id = ?7"#,
                params![
                    release_id,
                    folder_id,
                    year,
                    bytes,
                    mime,
                    chrono::Utc::now().to_rfc3339(),
                    existing_id
                ],
            )?;
        } else {
            conn.execute(
                r#"UPDATE albums SET provider_release_id = ?1, folder_id = ?2, year = ?3,
                   updated_at = ?4 WHERE id = ?5"#,
                params![release_id, folder_id, year, chrono::Utc::now().to_rfc3339(), existing_id],
            )?;
        }

        Ok(())
    }

    pub fn update_track_duration(
        &self,
        track_id: &str,
        duration_s: i32,
        source: DurationSourceTag,
        needs_review: bool,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"UPDATE tracks SET duration_s = ?1, duration_source = ?2, resolved_at = ?3,
               needs_review = ?4 WHERE id = ?5"#,
            params![
                duration_s,
                source.as_str(),
                chrono::Utc::now().to_rfc3339(),
                needs_review as i64,
                track_id
            ],
        )?;
        Ok(())
    }

    pub fn clear_track_duration(&self, track_id: &str, needs_review: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE tracks SET duration_s = 0, duration_source = NULL, resolved_at = NULL, needs_review = ?1 WHERE id = ?2",
            params![needs_review as i64, track_id],
        )?;
        Ok(())
    }

    /// Tracks with duration 0, a valid album FK, and a non-empty title
    /// (spec §4.7 Bulk resolution filter).
    pub fn tracks_needing_duration(&self) -> Result<Vec<Track>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"SELECT t.* FROM tracks t
               JOIN albums a ON a.id = t.album_id
               WHERE t.duration_s = 0 AND t.title != ''
               ORDER BY a.id, t.disc_number, t.track_number"#,
        )?;
        let tracks = stmt
            .query_map([], Self::row_to_track)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    pub fn get_track(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM tracks WHERE id = ?")?;
        to_option(stmt.query_row(params![id], Self::row_to_track))
    }

    fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<Album> {
        Ok(Album {
            id: row.get("id")?,
            provider_release_id: row.get("provider_release_id")?,
            master_release_id: row.get("master_release_id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            year: row.get("year")?,
            genre: row.get("genre")?,
            label: row.get("label")?,
            country: row.get("country")?,
            cover_image: row.get("cover_image")?,
            cover_image_mime: row.get("cover_image_mime")?,
            cover_image_failed: row.get::<_, i64>("cover_image_failed")? != 0,
            release_date: row.get("release_date")?,
            folder_id: row.get("folder_id")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
        })
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        Ok(Track {
            id: row.get("id")?,
            album_id: row.get("album_id")?,
            title: row.get("title")?,
            track_number: row.get("track_number")?,
            disc_number: row.get("disc_number")?,
            side_code: row.get("side_code")?,
            raw_position: row.get("raw_position")?,
            duration_s: row.get("duration_s")?,
            duration_source: row
                .get::<_, Option<String>>("duration_source")?
                .and_then(|s| DurationSourceTag::from_str(&s)),
            resolved_at: parse_datetime_opt(row.get::<_, Option<String>>("resolved_at")?),
            needs_review: row.get::<_, i64>("needs_review")? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, AlbumRepository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let repo = AlbumRepository::new(&path).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_insert_and_fetch_album_with_tracks() {
        let (_dir, repo) = repo();
        let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
        let track = Track::new(album.id.clone(), "Come Together".into(), "A1".into());

        repo.insert_album_with_tracks(&album, &[track.clone()]).unwrap();

        let fetched = repo.get(&album.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Abbey Road");

        let tracks = repo.tracks_for_album(&album.id).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Come Together");
    }

    #[test]
    fn test_find_by_title_artist_case_insensitive() {
        let (_dir, repo) = repo();
        let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
        repo.insert_album_with_tracks(&album, &[]).unwrap();

        let found = repo.find_by_title_artist("abbey road", "the beatles").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_tracks_needing_duration_filters_zero_only() {
        let (_dir, repo) = repo();
        let album = Album::new("Abbey Road".into(), "The Beatles".into(), 0);
        let mut t1 = Track::new(album.id.clone(), "Come Together".into(), "A1".into());
        let mut t2 = Track::new(album.id.clone(), "Something".into(), "A2".into());
        t2.duration_s = 183;
        t1.duration_s = 0;
        repo.insert_album_with_tracks(&album, &[t1, t2]).unwrap();

        let needing = repo.tracks_needing_duration().unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].title, "Come Together");
    }
}
