//! Deletes the oldest evictable segments, one batch at a time.
//!
//! A candidate's file is removed before its catalog row. If the file cannot
//! be deleted the row is kept so the segment is retried on a later pass; a
//! file that is already missing counts as evicted and only its row is
//! dropped.

use crate::core::segment::{CandidateQuery, EvictionCandidate};
use crate::error::{CatalogError, FilesystemError};
use crate::retention::policy::RetentionConfig;
use crate::storage::catalog::SegmentStore;
use crate::storage::probe::StorageProbe;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Pause before the single unlink retry
pub const UNLINK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Result of one `run_batch` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Candidates returned by the catalog
    pub candidates: usize,
    /// Files deleted or found already missing
    pub evicted: usize,
    /// Candidates whose file could not be deleted
    pub skipped: usize,
    pub rows_removed: usize,
    /// Evicted files whose row could not be deleted
    pub rows_left: usize,
    pub freed_bytes: u64,
    /// Free space after the last candidate, when the probe answered
    pub available_after: Option<u64>,
    pub target_reached: bool,
}

impl BatchOutcome {
    /// Whether another batch could change anything.
    pub fn made_progress(&self) -> bool {
        self.candidates > 0 && (self.freed_bytes > 0 || self.rows_removed > 0)
    }
}

pub struct EvictionExecutor {
    probe: Arc<dyn StorageProbe>,
    store: Arc<dyn SegmentStore>,
    archive_root: PathBuf,
}

impl EvictionExecutor {
    pub fn new(
        probe: Arc<dyn StorageProbe>,
        store: Arc<dyn SegmentStore>,
        archive_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            probe,
            store,
            archive_root: archive_root.into(),
        }
    }

    /// Evict up to `purge_batch_size` of the oldest candidates, stopping as
    /// soon as free space reaches the target.
    pub async fn run_batch(&self, cfg: &RetentionConfig) -> Result<BatchOutcome, CatalogError> {
        let query =
            CandidateQuery::oldest(cfg.purge_batch_size).older_than_days(cfg.per_camera_min_days);
        let candidates = self.store.list_eviction_candidates(query).await?;

        let mut outcome = BatchOutcome {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            debug!("no eviction candidates");
            return Ok(outcome);
        }

        for candidate in &candidates {
            let size = file_size(&candidate.file_path).await;
            if let Err(e) = remove_with_retry(&candidate.file_path).await {
                warn!(
                    id = candidate.id,
                    error = %e,
                    "could not delete segment file, keeping its row"
                );
                outcome.skipped += 1;
                continue;
            }
            outcome.evicted += 1;
            outcome.freed_bytes += size;

            self.drop_row(candidate, &mut outcome).await;

            match self.probe.stats(&self.archive_root) {
                Ok(stats) => {
                    outcome.available_after = Some(stats.available_bytes);
                    if cfg.target_reached(stats.available_bytes) {
                        outcome.target_reached = true;
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "free space probe failed during eviction"),
            }
        }

        info!(
            candidates = outcome.candidates,
            evicted = outcome.evicted,
            skipped = outcome.skipped,
            freed_bytes = outcome.freed_bytes,
            target_reached = outcome.target_reached,
            "eviction batch finished"
        );
        Ok(outcome)
    }

    async fn drop_row(&self, candidate: &EvictionCandidate, outcome: &mut BatchOutcome) {
        match self.store.delete_segment_row(candidate.id).await {
            Ok(removed) => {
                if !removed {
                    debug!(id = candidate.id, "segment row already gone");
                }
                outcome.rows_removed += 1;
            }
            Err(e) => {
                warn!(id = candidate.id, error = %e, "failed to delete segment row");
                outcome.rows_left += 1;
            }
        }
    }
}

async fn file_size(path: &Path) -> u64 {
    match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "could not stat segment file");
            }
            0
        }
    }
}

/// Delete a file, retrying once. A missing file is not an error.
async fn remove_with_retry(path: &Path) -> Result<(), FilesystemError> {
    match remove_file(path).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(path = %path.display(), error = %e, "unlink failed, retrying"),
    }
    tokio::time::sleep(UNLINK_RETRY_DELAY).await;
    remove_file(path).await.map_err(|source| FilesystemError::Unlink {
        path: path.to_path_buf(),
        source,
    })
}

async fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "deleted segment file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "segment file already missing");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
