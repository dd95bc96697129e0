//! Catalog schema creation and in-place upgrades

use crate::error::CatalogError;
use rusqlite::Connection;
use tracing::{info, warn};

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS cameras (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT,
    main_url    TEXT UNIQUE,
    sub_url     TEXT,
    created_at  INTEGER DEFAULT (strftime('%s','now'))
);
CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    started_at  INTEGER,
    archive_dir TEXT,
    segment_sec INTEGER
);
CREATE TABLE IF NOT EXISTS segments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   TEXT,
    camera_id    INTEGER,
    camera_url   TEXT,
    file_path    TEXT UNIQUE,
    start_utc_ns INTEGER,
    end_utc_ns   INTEGER,
    duration_ms  INTEGER,
    size_bytes   INTEGER,
    status       INTEGER DEFAULT 0,
    pinned       INTEGER DEFAULT 0,
    FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE,
    FOREIGN KEY(camera_id) REFERENCES cameras(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_segments_camera_time ON segments(camera_id, start_utc_ns);
CREATE INDEX IF NOT EXISTS idx_segments_path ON segments(file_path);
CREATE INDEX IF NOT EXISTS idx_segments_camera_url_time ON segments(camera_url, start_utc_ns);
CREATE INDEX IF NOT EXISTS idx_segments_start_desc ON segments(start_utc_ns DESC);
CREATE INDEX IF NOT EXISTS idx_segments_status_time ON segments(status, start_utc_ns);
";

/// Apply connection pragmas used by the single writer.
pub fn configure_writer(conn: &Connection) -> Result<(), CatalogError> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // In-memory catalogs report "memory".
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        warn!(journal_mode = %mode, "catalog is not running in WAL mode");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Create every table and index, then upgrade older layouts.
pub fn ensure_schema(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(CREATE_TABLES)
        .map_err(|e| CatalogError::Migration(format!("create tables: {e}")))?;
    migrate(conn)
}

/// Catalogs written before segments could be pinned lack the column.
fn migrate(conn: &Connection) -> Result<(), CatalogError> {
    if !has_column(conn, "segments", "pinned")? {
        info!("migrating catalog: adding segments.pinned");
        conn.execute_batch(
            "ALTER TABLE segments ADD COLUMN pinned INTEGER DEFAULT 0;
             UPDATE segments SET pinned = 0 WHERE pinned IS NULL;",
        )
        .map_err(|e| CatalogError::Migration(format!("add pinned column: {e}")))?;
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_segments_pinned ON segments(pinned);")
        .map_err(|e| CatalogError::Migration(format!("create pinned index: {e}")))?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, CatalogError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
