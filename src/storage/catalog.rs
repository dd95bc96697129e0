//! Catalog actor: one thread owns the writer connection.
//!
//! Every mutation is sent to that thread as a [`Command`]. Recorder paths
//! (`open_segment`, `finalize_segment`, ...) are fire-and-forget; calls whose
//! outcome drives a decision carry a oneshot reply and are awaited. Commands
//! are applied strictly in submission order, so a finalize queued before a
//! candidate listing is visible to that listing.

use crate::core::segment::{CandidateQuery, EvictionCandidate, Segment, SegmentId};
use crate::core::temporal::Timestamp;
use crate::error::CatalogError;
use crate::storage::writer::CatalogWriter;
use async_trait::async_trait;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T, CatalogError>>;

enum Command {
    EnsureCamera {
        main_url: String,
        sub_url: String,
        name: String,
    },
    BeginSession {
        id: String,
        archive_root: PathBuf,
        segment_seconds: u32,
    },
    OpenSegment {
        session_id: String,
        camera_url: String,
        file_path: PathBuf,
        start: Timestamp,
    },
    FinalizeSegment {
        file_path: PathBuf,
        end: Timestamp,
        duration_ms: i64,
    },
    ListCandidates {
        query: CandidateQuery,
        reply: Reply<Vec<EvictionCandidate>>,
    },
    DeleteRow {
        id: SegmentId,
        reply: Reply<bool>,
    },
    SetPinned {
        file_path: PathBuf,
        pinned: bool,
        reply: Reply<bool>,
    },
    Lookup {
        file_path: PathBuf,
        reply: Reply<Option<Segment>>,
    },
    Checkpoint {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Catalog operations the eviction path depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Oldest finalized, unpinned segments matching `query`
    async fn list_eviction_candidates(
        &self,
        query: CandidateQuery,
    ) -> Result<Vec<EvictionCandidate>, CatalogError>;

    /// Delete one segment row; `false` if it was already gone
    async fn delete_segment_row(&self, id: SegmentId) -> Result<bool, CatalogError>;

    /// Merge the write-ahead log into the database file
    async fn checkpoint(&self) -> Result<(), CatalogError>;
}

/// Cloneable handle to the catalog thread
#[derive(Clone)]
pub struct CatalogHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CatalogHandle {
    /// Open the catalog file and start its writer thread.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let writer = CatalogWriter::open(path)?;
        Self::spawn(writer)
    }

    /// Start the writer thread around an already opened writer.
    pub fn spawn(writer: CatalogWriter) -> Result<Self, CatalogError> {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("catalog-writer".to_string())
            .spawn(move || run(writer, rx))
            .map_err(|e| CatalogError::Open {
                path: PathBuf::from("<catalog-writer thread>"),
                reason: e.to_string(),
            })?;
        Ok(Self { tx })
    }

    fn submit(&self, op: &'static str, command: Command) {
        if self.tx.send(command).is_err() {
            warn!(op, "catalog writer is gone, dropping request");
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CatalogError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| CatalogError::Unavailable)?;
        rx.await.map_err(|_| CatalogError::Unavailable)?
    }

    pub fn ensure_camera(&self, main_url: &str, sub_url: &str, name: &str) {
        self.submit(
            "ensure_camera",
            Command::EnsureCamera {
                main_url: main_url.to_string(),
                sub_url: sub_url.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn begin_session(&self, id: &str, archive_root: &Path, segment_seconds: u32) {
        self.submit(
            "begin_session",
            Command::BeginSession {
                id: id.to_string(),
                archive_root: archive_root.to_path_buf(),
                segment_seconds,
            },
        );
    }

    pub fn open_segment(&self, session_id: &str, camera_url: &str, file_path: &Path, start: Timestamp) {
        self.submit(
            "open_segment",
            Command::OpenSegment {
                session_id: session_id.to_string(),
                camera_url: camera_url.to_string(),
                file_path: file_path.to_path_buf(),
                start,
            },
        );
    }

    pub fn finalize_segment(&self, file_path: &Path, end: Timestamp, duration_ms: i64) {
        self.submit(
            "finalize_segment",
            Command::FinalizeSegment {
                file_path: file_path.to_path_buf(),
                end,
                duration_ms,
            },
        );
    }

    /// Protect a segment from eviction (or release it).
    pub async fn set_pinned(&self, file_path: &Path, pinned: bool) -> Result<bool, CatalogError> {
        let file_path = file_path.to_path_buf();
        self.request(|reply| Command::SetPinned {
            file_path,
            pinned,
            reply,
        })
        .await
    }

    /// Current row for a path, read through the writer connection.
    pub async fn segment(&self, file_path: &Path) -> Result<Option<Segment>, CatalogError> {
        let file_path = file_path.to_path_buf();
        self.request(|reply| Command::Lookup { file_path, reply })
            .await
    }

    /// Checkpoint and stop the writer thread. Later requests fail with
    /// `CatalogError::Unavailable`.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

#[async_trait]
impl SegmentStore for CatalogHandle {
    async fn list_eviction_candidates(
        &self,
        query: CandidateQuery,
    ) -> Result<Vec<EvictionCandidate>, CatalogError> {
        self.request(|reply| Command::ListCandidates { query, reply })
            .await
    }

    async fn delete_segment_row(&self, id: SegmentId) -> Result<bool, CatalogError> {
        self.request(|reply| Command::DeleteRow { id, reply }).await
    }

    async fn checkpoint(&self) -> Result<(), CatalogError> {
        self.request(|reply| Command::Checkpoint { reply }).await
    }
}

fn run(writer: CatalogWriter, mut rx: mpsc::UnboundedReceiver<Command>) {
    debug!("catalog writer thread started");
    while let Some(command) = rx.blocking_recv() {
        // A panicking statement drops its reply sender; the caller sees
        // `Unavailable` and later commands still run.
        match panic::catch_unwind(AssertUnwindSafe(|| apply(&writer, command))) {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => error!("catalog command panicked, writer continues"),
        }
    }
    info!("catalog writer thread stopped");
}

/// Execute one command. Returns `false` once the thread should stop.
fn apply(writer: &CatalogWriter, command: Command) -> bool {
    match command {
        Command::EnsureCamera {
            main_url,
            sub_url,
            name,
        } => log_failure("ensure_camera", writer.ensure_camera(&main_url, &sub_url, &name)),
        Command::BeginSession {
            id,
            archive_root,
            segment_seconds,
        } => log_failure(
            "begin_session",
            writer.begin_session(&id, &archive_root, segment_seconds),
        ),
        Command::OpenSegment {
            session_id,
            camera_url,
            file_path,
            start,
        } => log_failure(
            "open_segment",
            writer.open_segment(&session_id, &camera_url, &file_path, start),
        ),
        Command::FinalizeSegment {
            file_path,
            end,
            duration_ms,
        } => match writer.finalize_segment(&file_path, end, duration_ms) {
            Ok(true) => debug!(path = %file_path.display(), "segment finalized"),
            Ok(false) => debug!(path = %file_path.display(), "finalize ignored: unknown or already closed"),
            Err(e) => warn!(op = "finalize_segment", error = %e, "catalog statement failed"),
        },
        Command::ListCandidates { query, reply } => {
            let _ = reply.send(writer.list_eviction_candidates(&query, Timestamp::now()));
        }
        Command::DeleteRow { id, reply } => {
            let _ = reply.send(writer.delete_segment_row(id));
        }
        Command::SetPinned {
            file_path,
            pinned,
            reply,
        } => {
            let _ = reply.send(writer.set_pinned(&file_path, pinned));
        }
        Command::Lookup { file_path, reply } => {
            let _ = reply.send(writer.segment_by_path(&file_path));
        }
        Command::Checkpoint { reply } => {
            let _ = reply.send(writer.checkpoint());
        }
        Command::Shutdown { reply } => {
            log_failure("checkpoint", writer.checkpoint());
            let _ = reply.send(());
            return false;
        }
    }
    true
}

fn log_failure<T>(op: &'static str, result: Result<T, CatalogError>) {
    if let Err(e) = result {
        warn!(op, error = %e, "catalog statement failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> CatalogHandle {
        let handle = CatalogHandle::spawn(CatalogWriter::open_in_memory().unwrap()).unwrap();
        handle.ensure_camera("rtsp://cam/main", "", "Cam");
        handle.begin_session("s1", Path::new("/archive"), 300);
        handle
    }

    #[tokio::test]
    async fn test_fire_and_forget_writes_are_ordered_before_queries() {
        let catalog = handle();
        let path = Path::new("/archive/0001.ts");
        catalog.open_segment("s1", "rtsp://cam/main", path, Timestamp::from_secs(5));
        catalog.finalize_segment(path, Timestamp::from_secs(305), 300_000);

        let candidates = catalog
            .list_eviction_candidates(CandidateQuery::oldest(10))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].file_path, path);
    }

    #[tokio::test]
    async fn test_duplicate_open_events_leave_one_row() {
        let catalog = handle();
        let path = Path::new("/archive/dup.ts");
        catalog.open_segment("s1", "rtsp://cam/main", path, Timestamp::from_secs(1));
        catalog.open_segment("s1", "rtsp://cam/main", path, Timestamp::from_secs(2));

        let seg = catalog.segment(path).await.unwrap().unwrap();
        assert_eq!(seg.start, Timestamp::from_secs(1));
        catalog.finalize_segment(path, Timestamp::from_secs(9), 8000);
        let rows = catalog
            .list_eviction_candidates(CandidateQuery::oldest(10))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_pin_round_trip_and_delete() {
        let catalog = handle();
        let path = Path::new("/archive/p.ts");
        catalog.open_segment("s1", "rtsp://cam/main", path, Timestamp::from_secs(1));
        catalog.finalize_segment(path, Timestamp::from_secs(2), 1000);

        assert!(catalog.set_pinned(path, true).await.unwrap());
        assert!(catalog
            .list_eviction_candidates(CandidateQuery::oldest(10))
            .await
            .unwrap()
            .is_empty());
        assert!(catalog.set_pinned(path, false).await.unwrap());

        let id = catalog.segment(path).await.unwrap().unwrap().id;
        assert!(catalog.delete_segment_row(id).await.unwrap());
        assert!(catalog.segment(path).await.unwrap().is_none());
        catalog.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn test_huge_min_age_keeps_catalog_usable() {
        let catalog = handle();
        let path = Path::new("/archive/old.ts");
        catalog.open_segment("s1", "rtsp://cam/main", path, Timestamp::from_secs(5));
        catalog.finalize_segment(path, Timestamp::from_secs(305), 300_000);

        let aged = catalog
            .list_eviction_candidates(CandidateQuery::oldest(10).older_than_days(200_000))
            .await
            .unwrap();
        assert!(aged.is_empty());
        let aged = catalog
            .list_eviction_candidates(CandidateQuery::oldest(10).older_than_days(u32::MAX))
            .await
            .unwrap();
        assert!(aged.is_empty());

        let all = catalog
            .list_eviction_candidates(CandidateQuery::oldest(10))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        catalog.open_segment("s1", "rtsp://cam/main", Path::new("/archive/new.ts"), Timestamp::from_secs(9));
        assert!(catalog.segment(Path::new("/archive/new.ts")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_are_unavailable() {
        let catalog = handle();
        catalog.shutdown().await;
        let err = catalog
            .list_eviction_candidates(CandidateQuery::oldest(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable));
        // Fire-and-forget calls only log.
        catalog.open_segment("s1", "rtsp://cam/main", Path::new("/late.ts"), Timestamp::now());
    }
}
