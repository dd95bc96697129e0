//! Archive facade: wires the catalog, disk probe and retention engine

use crate::config::ArchiveConfig;
use crate::core::segment::{CameraProfile, CandidateQuery, EvictionCandidate};
use crate::error::{Error, Result};
use crate::recording::RecordingSession;
use crate::retention::{CycleOutcome, RetentionConfig, RetentionEngine};
use crate::storage::{
    CatalogHandle, CatalogReader, CatalogSummary, SegmentStore, StatvfsProbe, StorageProbe,
    StorageReport,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything `status` reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub storage: StorageReport,
    pub retention: RetentionConfig,
    pub catalog: CatalogSummary,
}

/// A segment archive on one mount point
pub struct Archive {
    config: ArchiveConfig,
    catalog: CatalogHandle,
    probe: Arc<dyn StorageProbe>,
    engine: Arc<RetentionEngine>,
}

impl Archive {
    /// Open the archive at `config.archive_root`, creating the directory and
    /// catalog if needed.
    pub fn open(config: ArchiveConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(StatvfsProbe))
    }

    /// Open with a custom disk statistics source.
    pub fn with_probe(config: ArchiveConfig, probe: Arc<dyn StorageProbe>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.archive_root)?;

        let catalog = CatalogHandle::open(config.catalog_path())?;
        let store: Arc<dyn SegmentStore> = Arc::new(catalog.clone());
        let engine = Arc::new(RetentionEngine::new(
            config.clone(),
            Arc::clone(&probe),
            store,
        ));
        info!(
            archive_root = %config.archive_root.display(),
            catalog = %config.catalog_path().display(),
            "archive opened"
        );
        Ok(Self {
            config,
            catalog,
            probe,
            engine,
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub fn engine(&self) -> &Arc<RetentionEngine> {
        &self.engine
    }

    /// Separate read-only connection for reports and lookups
    pub fn reader(&self) -> Result<CatalogReader> {
        Ok(CatalogReader::open(self.config.catalog_path())?)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let stats = self.probe.stats(&self.config.archive_root)?;
        Ok(StatusReport {
            storage: StorageReport::new(&self.config.archive_root, stats),
            retention: RetentionConfig::derive(stats.total_bytes, &self.config),
            catalog: self.reader()?.summary()?,
        })
    }

    /// Log a warning when free space is under the configured threshold.
    ///
    /// Returns `true` if the warning was emitted.
    pub fn warn_if_low_space(&self) -> bool {
        match self.probe.stats(&self.config.archive_root) {
            Ok(stats) if stats.available_bytes < self.config.low_space_warn_bytes => {
                warn!(
                    available_bytes = stats.available_bytes,
                    threshold_bytes = self.config.low_space_warn_bytes,
                    "archive storage is low on free space"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "cannot read free space of archive storage");
                false
            }
        }
    }

    /// Register cameras and begin a recording session.
    pub fn start_recording(&self, cameras: Vec<CameraProfile>) -> RecordingSession {
        self.warn_if_low_space();
        RecordingSession::start(
            &self.config,
            cameras,
            self.catalog.clone(),
            Arc::clone(&self.engine),
        )
    }

    /// Run one retention cycle now.
    pub async fn purge(&self) -> CycleOutcome {
        self.engine.run_cycle().await
    }

    pub async fn pin(&self, file_path: &Path) -> Result<bool> {
        Ok(self.catalog.set_pinned(file_path, true).await?)
    }

    pub async fn unpin(&self, file_path: &Path) -> Result<bool> {
        Ok(self.catalog.set_pinned(file_path, false).await?)
    }

    pub async fn candidates(&self, query: CandidateQuery) -> Result<Vec<EvictionCandidate>> {
        if query.limit == 0 {
            return Err(Error::Configuration("candidate limit must be positive".into()));
        }
        Ok(self.catalog.list_eviction_candidates(query).await?)
    }

    pub async fn checkpoint(&self) -> Result<()> {
        Ok(self.catalog.checkpoint().await?)
    }

    /// Checkpoint and stop the catalog writer.
    pub async fn close(&self) {
        self.catalog.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::temporal::Timestamp;
    use crate::retention::test_support::{FailingProbe, FixedProbe};
    use crate::storage::DiskStats;
    use tempfile::TempDir;

    const GB: u64 = 1_000_000_000;

    fn open(dir: &TempDir, stats: DiskStats) -> Archive {
        let config = ArchiveConfig::default().with_archive_root(dir.path().join("archive"));
        Archive::with_probe(config, Arc::new(FixedProbe(stats))).unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_root_and_catalog() {
        let dir = TempDir::new().unwrap();
        let archive = open(&dir, DiskStats::new(100 * GB, 50 * GB));
        assert!(dir.path().join("archive").is_dir());
        assert!(archive.config().catalog_path().exists());
        archive.close().await;
    }

    #[tokio::test]
    async fn test_status_combines_disk_and_catalog() {
        let dir = TempDir::new().unwrap();
        let archive = open(&dir, DiskStats::new(100 * GB, 30 * GB));
        let session = archive.start_recording(vec![CameraProfile::new("rtsp://a", "", "A")]);
        let path = archive.config().archive_root.join("a.ts");
        std::fs::write(&path, b"segment").unwrap();
        session.handle(crate::core::event::RecorderEvent::SegmentOpened {
            camera_index: 0,
            path: path.clone(),
            start_ns: Timestamp::from_secs(10).as_nanos(),
        });
        archive.pin(&path).await.unwrap();

        let status = archive.status().unwrap();
        assert_eq!(status.storage.used_bytes, 70 * GB);
        assert_eq!(status.retention.min_free_bytes, 10 * GB);
        assert_eq!(status.retention.target_free_bytes, 12 * GB);
        assert_eq!(status.catalog.total_cameras, 1);
        assert_eq!(status.catalog.open_segments, 1);
        assert_eq!(status.catalog.pinned_segments, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["storage"]["available_bytes"], 30 * GB);
        archive.close().await;
    }

    #[tokio::test]
    async fn test_pin_unknown_path_reports_false() {
        let dir = TempDir::new().unwrap();
        let archive = open(&dir, DiskStats::new(100 * GB, 50 * GB));
        assert!(!archive.pin(Path::new("/nowhere.ts")).await.unwrap());
        assert!(!archive.unpin(Path::new("/nowhere.ts")).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_candidates_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = open(&dir, DiskStats::new(100 * GB, 50 * GB));
        assert!(matches!(
            archive.candidates(CandidateQuery::oldest(0)).await,
            Err(Error::Configuration(_))
        ));
        assert!(archive.candidates(CandidateQuery::oldest(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_low_space_warning_threshold() {
        let dir = TempDir::new().unwrap();
        assert!(open(&dir, DiskStats::new(100 * GB, GB)).warn_if_low_space());

        let dir = TempDir::new().unwrap();
        assert!(!open(&dir, DiskStats::new(100 * GB, 50 * GB)).warn_if_low_space());
    }

    #[tokio::test]
    async fn test_status_fails_without_disk_stats() {
        let dir = TempDir::new().unwrap();
        let config = ArchiveConfig::default().with_archive_root(dir.path());
        let archive = Archive::with_probe(config, Arc::new(FailingProbe)).unwrap();
        assert!(matches!(archive.status(), Err(Error::Filesystem(_))));
        assert!(matches!(archive.purge().await, CycleOutcome::Aborted { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = ArchiveConfig::default().with_archive_root(dir.path());
        config.purge_batch_size = 0;
        assert!(matches!(
            Archive::open(config),
            Err(Error::Configuration(_))
        ));
    }
}
