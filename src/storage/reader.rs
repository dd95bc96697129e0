//! Read-only catalog queries for reporting and playback lookup.
//!
//! A `CatalogReader` opens its own read-only connection, so reports never
//! queue behind the writer thread. Under WAL a reader sees the last
//! committed state.

use crate::core::segment::{Camera, CameraId, Segment, SegmentId, SegmentStatus};
use crate::core::temporal::Timestamp;
use crate::error::CatalogError;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Column list matching [`map_segment`]
pub(crate) const SEGMENT_COLUMNS: &str = "id, session_id, camera_id, camera_url, file_path, \
     start_utc_ns, end_utc_ns, duration_ms, size_bytes, status, pinned";

pub(crate) fn map_segment(row: &Row) -> rusqlite::Result<Segment> {
    let status_code = row.get::<_, Option<i64>>(9)?.unwrap_or(0);
    Ok(Segment {
        id: row.get(0)?,
        session_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        camera_id: row.get(2)?,
        camera_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        file_path: PathBuf::from(row.get::<_, String>(4)?),
        start: Timestamp::from_nanos(row.get::<_, Option<i64>>(5)?.unwrap_or(0)),
        end: row.get::<_, Option<i64>>(6)?.map(Timestamp::from_nanos),
        duration_ms: row.get(7)?,
        size_bytes: row.get::<_, Option<i64>>(8)?.unwrap_or(0).max(0) as u64,
        status: SegmentStatus::from_code(status_code).unwrap_or(SegmentStatus::Open),
        pinned: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
    })
}

/// Effective end expression: close time, else start + duration, else start.
const EFFECTIVE_END: &str = "CASE
    WHEN end_utc_ns IS NOT NULL AND end_utc_ns > 0 THEN end_utc_ns
    WHEN COALESCE(duration_ms, 0) > 0 THEN start_utc_ns + duration_ms * 1000000
    ELSE start_utc_ns
END";

/// Segment joined with its camera's display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentSegment {
    pub file_path: PathBuf,
    pub camera_name: Option<String>,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub duration_ms: Option<i64>,
}

/// Aggregate counts for status reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub total_cameras: u64,
    /// Cameras with at least one open or finalized segment
    pub recording_cameras: u64,
    pub open_segments: u64,
    pub finalized_segments: u64,
    pub pinned_segments: u64,
    pub catalogued_bytes: u64,
}

/// Read-only view of the catalog
pub struct CatalogReader {
    conn: Connection,
}

impl CatalogReader {
    /// Open a read-only connection to an existing catalog file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| CatalogError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { conn })
    }

    /// Cameras ordered by id
    pub fn list_cameras(&self) -> Result<Vec<Camera>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, main_url, sub_url, created_at FROM cameras ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Camera {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                main_url: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                sub_url: row.get::<_, Option<String>>(3)?.filter(|s| !s.is_empty()),
                created_at: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Segments of one camera overlapping `[from, to)`, oldest first.
    ///
    /// Open segments are included; their extent is estimated from the
    /// duration when no close time has been written yet.
    pub fn list_segments(
        &self,
        camera_id: CameraId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Segment>, CatalogError> {
        if camera_id <= 0 {
            return Err(CatalogError::NotFound(format!("camera {camera_id}")));
        }
        let sql = format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments
              WHERE status IN (0, 1)
                AND (camera_id = ?1 OR camera_url = (SELECT main_url FROM cameras WHERE id = ?1))
                AND start_utc_ns < ?3
                AND ({EFFECTIVE_END}) > ?2
              ORDER BY start_utc_ns"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![camera_id, from.as_nanos(), to.as_nanos()], map_segment)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct UTC days on which a camera has recordings, oldest first
    pub fn list_days(&self, camera_id: CameraId) -> Result<Vec<NaiveDate>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT start_utc_ns FROM segments
              WHERE camera_id = ?1 OR camera_url = (SELECT main_url FROM cameras WHERE id = ?1)
              ORDER BY start_utc_ns",
        )?;
        let rows = stmt.query_map(params![camera_id], |row| row.get::<_, i64>(0))?;
        let mut days: Vec<NaiveDate> = Vec::new();
        for start in rows {
            let day = Timestamp::from_nanos(start?).utc_day();
            if days.last() != Some(&day) {
                days.push(day);
            }
        }
        Ok(days)
    }

    /// Most recently started segments across all cameras
    pub fn list_recent_segments(&self, limit: usize) -> Result<Vec<RecentSegment>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.file_path, c.name, s.start_utc_ns, s.end_utc_ns, s.duration_ms
               FROM segments s
               LEFT JOIN cameras c ON c.id = s.camera_id
              ORDER BY s.start_utc_ns DESC
              LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RecentSegment {
                file_path: PathBuf::from(row.get::<_, String>(0)?),
                camera_name: row.get(1)?,
                start: Timestamp::from_nanos(row.get(2)?),
                end: row.get::<_, Option<i64>>(3)?.map(Timestamp::from_nanos),
                duration_ms: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// File path for a segment id, as used by playback and export
    pub fn resolve_segment_path(&self, id: SegmentId) -> Result<PathBuf, CatalogError> {
        self.conn
            .query_row(
                "SELECT file_path FROM segments WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(PathBuf::from)
            .ok_or_else(|| CatalogError::NotFound(format!("segment {id}")))
    }

    pub fn summary(&self) -> Result<CatalogSummary, CatalogError> {
        let total_cameras: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM cameras", [], |r| r.get(0))?;
        let recording_cameras: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT camera_id) FROM segments
              WHERE status IN (0, 1) AND camera_id IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let (open, finalized, pinned, bytes): (i64, i64, i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(status = 0), 0),
                    COALESCE(SUM(status = 1), 0),
                    COALESCE(SUM(pinned != 0), 0),
                    COALESCE(SUM(size_bytes), 0)
               FROM segments",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
        Ok(CatalogSummary {
            total_cameras: total_cameras.max(0) as u64,
            recording_cameras: recording_cameras.max(0) as u64,
            open_segments: open.max(0) as u64,
            finalized_segments: finalized.max(0) as u64,
            pinned_segments: pinned.max(0) as u64,
            catalogued_bytes: bytes.max(0) as u64,
        })
    }
}
