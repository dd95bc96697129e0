//! vigil-archive: segment catalog and disk-space retention for camera recordings
//!
//! Recorder workers write fixed-length video segments to an archive mount.
//! This crate catalogs those segments in SQLite and keeps the mount from
//! filling up by evicting the oldest finalized, unpinned segments whenever
//! free space drops below a watermark.
//!
//! # Core Concepts
//!
//! - **Segments**: one video file per camera and time slice, `open` while
//!   being written and `finalized` once closed
//! - **Watermarks**: a minimum free-space level that triggers eviction and a
//!   higher target level eviction runs toward
//! - **Pinning**: pinned segments are never evicted
//! - **Catalog actor**: a single thread owns the SQLite writer; everything
//!   else talks to it over channels
//!
//! # Example
//!
//! ```no_run
//! use vigil_archive::prelude::*;
//!
//! # async fn example() -> vigil_archive::error::Result<()> {
//! let archive = Archive::open(ArchiveConfig::from_env()?)?;
//!
//! // Protect a clip, then run a retention pass
//! archive.pin("/archive/cam1/0001.ts".as_ref()).await?;
//! let outcome = archive.purge().await;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod recording;
pub mod retention;
pub mod storage;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::archive::{Archive, StatusReport};
    pub use crate::config::ArchiveConfig;
    pub use crate::core::*;
    pub use crate::error::{Error, Result};
    pub use crate::recording::RecordingSession;
    pub use crate::retention::{CycleOutcome, CycleReport, RetentionEngine};
    pub use crate::storage::*;
}
