//! Events exchanged with recorder workers and archive observers

use crate::core::temporal::Timestamp;
use crate::retention::CycleReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Notification emitted by a recorder worker.
///
/// `camera_index` is the position of the camera in the profile list the
/// recording session was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    /// A worker began writing a new segment file
    SegmentOpened {
        camera_index: usize,
        path: PathBuf,
        start_ns: i64,
    },
    /// A worker closed a segment file
    SegmentClosed {
        camera_index: usize,
        path: PathBuf,
        end_ns: i64,
        duration_ms: i64,
    },
}

impl RecorderEvent {
    pub fn camera_index(&self) -> usize {
        match self {
            Self::SegmentOpened { camera_index, .. } | Self::SegmentClosed { camera_index, .. } => {
                *camera_index
            }
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::SegmentOpened { path, .. } | Self::SegmentClosed { path, .. } => path,
        }
    }
}

/// Notification published to archive observers (UI refresh, exporters)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArchiveEvent {
    /// A segment was finalized in the catalog
    SegmentWritten { path: PathBuf, at: Timestamp },
    /// A retention cycle evicted segments
    PurgeFinished(CycleReport),
}
