//! CLI commands

use crate::core::segment::{CameraId, CameraProfile, CandidateQuery, SegmentId};
use crate::core::temporal::Timestamp;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil archive CLI
#[derive(Debug, Parser)]
#[command(name = "vigil-archive")]
#[command(about = "Segment catalog and disk-space retention for camera recordings")]
#[command(version)]
pub struct Cli {
    /// Archive directory (overrides ARCHIVE_ROOT)
    #[arg(long, global = true)]
    pub archive_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Record: read recorder events as JSON lines from stdin
    Run {
        /// Camera stream, repeatable: MAIN_URL[,SUB_URL[,NAME]]
        #[arg(long = "camera", value_name = "MAIN[,SUB[,NAME]]")]
        cameras: Vec<CameraProfile>,
        /// Segment length recorded on the session
        #[arg(long)]
        segment_seconds: Option<u32>,
    },
    /// Print disk usage, watermarks and catalog counts as JSON
    Status,
    /// Run one retention cycle now
    Purge,
    /// Protect a segment from eviction
    Pin { path: PathBuf },
    /// Make a pinned segment evictable again
    Unpin { path: PathBuf },
    /// List the segments eviction would take next
    Candidates {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Restrict to one camera
        #[arg(long)]
        camera_id: Option<CameraId>,
        /// Only segments at least this many days old
        #[arg(long, default_value_t = 0)]
        min_age_days: u32,
    },
    /// Merge the catalog write-ahead log into the database file
    Checkpoint,
    /// List known cameras
    Cameras,
    /// Segments of one camera overlapping a time window
    Segments {
        #[arg(long)]
        camera_id: CameraId,
        /// Window start, RFC 3339 (default: one hour before --to)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Window end, RFC 3339 (default: now)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// UTC days with recordings for one camera
    Days {
        #[arg(long)]
        camera_id: CameraId,
    },
    /// Most recently started segments
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the file path of a segment id
    Resolve { id: SegmentId },
}

impl Commands {
    /// Candidate filter for `candidates`, if this is that command
    pub fn candidate_query(&self) -> Option<CandidateQuery> {
        match self {
            Self::Candidates {
                limit,
                camera_id,
                min_age_days,
            } => {
                let query = CandidateQuery::oldest(*limit).older_than_days(*min_age_days);
                Some(match camera_id {
                    Some(id) => query.for_camera(*id),
                    None => query,
                })
            }
            _ => None,
        }
    }
}

/// Resolve an optional `[from, to)` window; defaults to the hour before `now`.
pub fn segment_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Timestamp, Timestamp) {
    let to = to.unwrap_or(now);
    let from = from.unwrap_or(to - Duration::hours(1));
    (Timestamp::from(from), Timestamp::from(to))
}
