//! Bridge from recorder worker events to the catalog and retention engine

use crate::config::ArchiveConfig;
use crate::core::event::{ArchiveEvent, RecorderEvent};
use crate::core::segment::CameraProfile;
use crate::core::temporal::Timestamp;
use crate::retention::RetentionEngine;
use crate::storage::catalog::CatalogHandle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One recording run: the cameras it was started with and its session id.
pub struct RecordingSession {
    id: String,
    cameras: Vec<CameraProfile>,
    catalog: CatalogHandle,
    engine: Arc<RetentionEngine>,
}

impl RecordingSession {
    /// Register the cameras and open a new session in the catalog.
    pub fn start(
        config: &ArchiveConfig,
        cameras: Vec<CameraProfile>,
        catalog: CatalogHandle,
        engine: Arc<RetentionEngine>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        for camera in &cameras {
            catalog.ensure_camera(&camera.main_url, &camera.sub_url, &camera.name);
        }
        catalog.begin_session(&id, &config.archive_root, config.segment_seconds);
        info!(
            session = %id,
            cameras = cameras.len(),
            segment_seconds = config.segment_seconds,
            "recording session started"
        );
        Self {
            id,
            cameras,
            catalog,
            engine,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cameras(&self) -> &[CameraProfile] {
        &self.cameras
    }

    /// Apply one recorder event. Returns `false` if it was ignored.
    pub fn handle(&self, event: RecorderEvent) -> bool {
        let Some(camera) = self.cameras.get(event.camera_index()) else {
            warn!(
                camera_index = event.camera_index(),
                path = %event.path().display(),
                "event for unknown camera index ignored"
            );
            return false;
        };

        match event {
            RecorderEvent::SegmentOpened { path, start_ns, .. } => {
                debug!(camera = %camera.name, path = %path.display(), "segment opened");
                self.catalog.open_segment(
                    &self.id,
                    &camera.main_url,
                    &path,
                    Timestamp::from_nanos(start_ns),
                );
            }
            RecorderEvent::SegmentClosed {
                path,
                end_ns,
                duration_ms,
                ..
            } => {
                let at = Timestamp::from_nanos(end_ns);
                debug!(camera = %camera.name, path = %path.display(), duration_ms, "segment closed");
                self.catalog.finalize_segment(&path, at, duration_ms);
                self.engine.trigger().notify_segment_finalized();
                self.engine.publish(ArchiveEvent::SegmentWritten { path, at });
            }
        }
        true
    }

    /// Consume events until every sender is dropped.
    pub fn spawn(self, mut events: mpsc::Receiver<RecorderEvent>) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut applied = 0;
            while let Some(event) = events.recv().await {
                if self.handle(event) {
                    applied += 1;
                }
            }
            info!(session = %self.id, applied, "recorder event stream closed");
            applied
        })
    }
}
