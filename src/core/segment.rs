//! Catalog records: cameras, recording sessions and video segments

use crate::core::temporal::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Row id of a segment in the catalog
pub type SegmentId = i64;

/// Row id of a camera in the catalog
pub type CameraId = i64;

/// Lifecycle state of a segment file.
///
/// Stored as an integer column: `0` while the recorder is still writing,
/// `1` once the file has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Open,
    Finalized,
}

impl SegmentStatus {
    pub fn as_code(self) -> i64 {
        match self {
            Self::Open => 0,
            Self::Finalized => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Finalized),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Camera known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub main_url: String,
    pub sub_url: Option<String>,
    /// Seconds since Unix epoch
    pub created_at: i64,
}

/// Stream identity a recorder worker was started with.
///
/// Parsed from `main_url[,sub_url[,name]]` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraProfile {
    pub main_url: String,
    pub sub_url: String,
    pub name: String,
}

impl CameraProfile {
    pub fn new(
        main_url: impl Into<String>,
        sub_url: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            main_url: main_url.into(),
            sub_url: sub_url.into(),
            name: name.into(),
        }
    }
}

impl FromStr for CameraProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ',').map(str::trim);
        let main_url = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| {
            format!("camera '{s}' must start with a main stream URL")
        })?;
        let sub_url = parts.next().unwrap_or_default();
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(main_url);
        Ok(Self::new(main_url, sub_url, name))
    }
}

/// One recording run of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Seconds since Unix epoch
    pub started_at: i64,
    pub archive_root: PathBuf,
    pub segment_seconds: u32,
}

/// A recorded video file plus its catalog metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub session_id: String,
    pub camera_id: Option<CameraId>,
    pub camera_url: String,
    pub file_path: PathBuf,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub size_bytes: u64,
    pub status: SegmentStatus,
    pub pinned: bool,
}

impl Segment {
    /// End of the recorded span: the closing time when known, otherwise
    /// start plus duration, otherwise the start itself.
    pub fn effective_end(&self) -> Timestamp {
        match (self.end, self.duration_ms) {
            (Some(end), _) if end.as_nanos() > 0 => end,
            (_, Some(ms)) if ms > 0 => self.start.add_millis(ms),
            _ => self.start,
        }
    }
}

/// Segment selected for eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionCandidate {
    pub id: SegmentId,
    pub file_path: PathBuf,
    pub start: Timestamp,
}

/// Filter for `list_eviction_candidates`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateQuery {
    pub limit: usize,
    /// Restrict to one camera (matched by id or by its main URL)
    pub camera_id: Option<CameraId>,
    /// Only segments that started at least this many days ago; 0 disables
    pub min_age_days: u32,
}

impl CandidateQuery {
    pub fn oldest(limit: usize) -> Self {
        Self {
            limit,
            camera_id: None,
            min_age_days: 0,
        }
    }

    pub fn for_camera(mut self, camera_id: CameraId) -> Self {
        self.camera_id = (camera_id > 0).then_some(camera_id);
        self
    }

    pub fn older_than_days(mut self, days: u32) -> Self {
        self.min_age_days = days;
        self
    }
}
