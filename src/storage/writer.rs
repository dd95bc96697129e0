//! Mutating catalog operations on the single writer connection.
//!
//! `CatalogWriter` is deliberately synchronous and `!Sync`; it is owned by
//! the catalog thread in [`crate::storage::catalog`], which serializes every
//! call onto one connection.

use crate::core::segment::{CandidateQuery, EvictionCandidate, Segment, SegmentId, SegmentStatus};
use crate::core::temporal::Timestamp;
use crate::error::CatalogError;
use crate::storage::reader::{map_segment, SEGMENT_COLUMNS};
use crate::storage::schema;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Owner of the one connection allowed to write the catalog
pub struct CatalogWriter {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CatalogWriter {
    /// Open (creating if needed) the catalog file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CatalogError::Open {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(&path).map_err(|e| CatalogError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        schema::configure_writer(&conn)?;
        schema::ensure_schema(&conn)?;
        info!(path = %path.display(), "catalog opened");
        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Catalog held entirely in memory (tests and dry runs)
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        schema::configure_writer(&conn)?;
        schema::ensure_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a camera or refresh its name and sub stream by main URL.
    pub fn ensure_camera(
        &self,
        main_url: &str,
        sub_url: &str,
        name: &str,
    ) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT INTO cameras(name, main_url, sub_url) VALUES (?1, ?2, ?3)
             ON CONFLICT(main_url) DO UPDATE SET name = excluded.name, sub_url = excluded.sub_url",
            params![name, main_url, sub_url],
        )?;
        Ok(())
    }

    pub fn begin_session(
        &self,
        session_id: &str,
        archive_root: &Path,
        segment_seconds: u32,
    ) -> Result<(), CatalogError> {
        self.conn.execute(
            // An upsert rather than REPLACE: deleting the session row would
            // cascade to its segments.
            "INSERT INTO sessions(id, started_at, archive_dir, segment_sec)
             VALUES (?1, strftime('%s','now'), ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET archive_dir = excluded.archive_dir,
                                           segment_sec = excluded.segment_sec",
            params![session_id, archive_root.to_string_lossy(), segment_seconds],
        )?;
        Ok(())
    }

    fn camera_id_for_url(&self, url: &str) -> Result<Option<i64>, CatalogError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM cameras WHERE main_url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Record a newly opened segment. Returns `false` when the path is
    /// already catalogued, which leaves the existing row untouched.
    pub fn open_segment(
        &self,
        session_id: &str,
        camera_url: &str,
        file_path: &Path,
        start: Timestamp,
    ) -> Result<bool, CatalogError> {
        let camera_id = self.camera_id_for_url(camera_url)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO segments(session_id, camera_id, camera_url, file_path, start_utc_ns, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                camera_id,
                camera_url,
                file_path.to_string_lossy(),
                start.as_nanos(),
                SegmentStatus::Open.as_code(),
            ],
        )?;
        if inserted == 0 {
            debug!(path = %file_path.display(), "duplicate segment open ignored");
        }
        Ok(inserted > 0)
    }

    /// Close an open segment, capturing its size from disk.
    ///
    /// Returns `false` when the path is unknown or was already finalized.
    pub fn finalize_segment(
        &self,
        file_path: &Path,
        end: Timestamp,
        duration_ms: i64,
    ) -> Result<bool, CatalogError> {
        let size = fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
        let updated = self.conn.execute(
            "UPDATE segments
                SET end_utc_ns = ?1, duration_ms = ?2, size_bytes = ?3, status = ?4
              WHERE file_path = ?5 AND status = ?6",
            params![
                end.as_nanos(),
                duration_ms,
                size as i64,
                SegmentStatus::Finalized.as_code(),
                file_path.to_string_lossy(),
                SegmentStatus::Open.as_code(),
            ],
        )?;
        Ok(updated > 0)
    }

    /// Oldest finalized, unpinned segments first.
    pub fn list_eviction_candidates(
        &self,
        query: &CandidateQuery,
        now: Timestamp,
    ) -> Result<Vec<EvictionCandidate>, CatalogError> {
        let cutoff = (query.min_age_days > 0).then(|| now.days_before(query.min_age_days).as_nanos());
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_path, start_utc_ns
               FROM segments
              WHERE status = ?1 AND pinned = 0
                AND (?2 IS NULL
                     OR camera_id = ?2
                     OR camera_url = (SELECT main_url FROM cameras WHERE id = ?2))
                AND (?3 IS NULL OR start_utc_ns < ?3)
              ORDER BY start_utc_ns ASC
              LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                SegmentStatus::Finalized.as_code(),
                query.camera_id,
                cutoff,
                query.limit as i64,
            ],
            |row| {
                Ok(EvictionCandidate {
                    id: row.get(0)?,
                    file_path: PathBuf::from(row.get::<_, String>(1)?),
                    start: Timestamp::from_nanos(row.get(2)?),
                })
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Remove a segment row. `false` means no row had that id.
    pub fn delete_segment_row(&self, id: SegmentId) -> Result<bool, CatalogError> {
        let deleted = self
            .conn
            .execute("DELETE FROM segments WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Protect or release a segment. `false` means the path is unknown.
    pub fn set_pinned(&self, file_path: &Path, pinned: bool) -> Result<bool, CatalogError> {
        let updated = self.conn.execute(
            "UPDATE segments SET pinned = ?1 WHERE file_path = ?2",
            params![pinned as i64, file_path.to_string_lossy()],
        )?;
        Ok(updated > 0)
    }

    pub fn segment_by_path(&self, file_path: &Path) -> Result<Option<Segment>, CatalogError> {
        let segment = self
            .conn
            .query_row(
                &format!("SELECT {SEGMENT_COLUMNS} FROM segments WHERE file_path = ?1"),
                params![file_path.to_string_lossy()],
                map_segment,
            )
            .optional()?;
        Ok(segment)
    }

    /// Merge the write-ahead log back into the main database file.
    pub fn checkpoint(&self) -> Result<(), CatalogError> {
        let (busy, log_frames, checkpointed): (i64, i64, i64) = self.conn.query_row(
            "PRAGMA wal_checkpoint(TRUNCATE)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        debug!(busy, log_frames, checkpointed, "catalog checkpoint");
        Ok(())
    }
}
