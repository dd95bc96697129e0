//! Probes and catalog fixtures shared by retention tests

use crate::core::temporal::Timestamp;
use crate::error::FilesystemError;
use crate::storage::catalog::CatalogHandle;
use crate::storage::probe::{DiskStats, StorageProbe};
use crate::storage::writer::CatalogWriter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub(crate) const CAMERA_URL: &str = "rtsp://cam/main";
pub(crate) const SESSION: &str = "session-1";

/// Fixed-size disk whose free space shrinks with the bytes stored under
/// the probed directory.
pub(crate) struct DirUsageProbe {
    pub total: u64,
    /// Bytes used by everything outside the probed directory
    pub reserved: u64,
}

impl StorageProbe for DirUsageProbe {
    fn stats(&self, path: &Path) -> Result<DiskStats, FilesystemError> {
        let used = dir_size(path).map_err(|source| FilesystemError::Probe {
            path: path.to_path_buf(),
            source,
        })?;
        let available = self.total.saturating_sub(self.reserved + used);
        Ok(DiskStats::new(self.total, available))
    }
}

fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

/// Always reports the same numbers.
pub(crate) struct FixedProbe(pub DiskStats);

impl StorageProbe for FixedProbe {
    fn stats(&self, _path: &Path) -> Result<DiskStats, FilesystemError> {
        Ok(self.0)
    }
}

/// Mount point that never answers.
pub(crate) struct FailingProbe;

impl StorageProbe for FailingProbe {
    fn stats(&self, path: &Path) -> Result<DiskStats, FilesystemError> {
        Err(FilesystemError::MissingMount(path.to_path_buf()))
    }
}

/// In-memory catalog with one camera and one session registered.
pub(crate) fn catalog() -> CatalogHandle {
    let catalog = CatalogHandle::spawn(CatalogWriter::open_in_memory().unwrap()).unwrap();
    catalog.ensure_camera(CAMERA_URL, "", "Test camera");
    catalog.begin_session(SESSION, Path::new("/archive"), 300);
    catalog
}

/// Write a segment file of `size` bytes and record it as finalized.
pub(crate) fn seed_segment(
    catalog: &CatalogHandle,
    dir: &Path,
    name: &str,
    start_secs: i64,
    size: usize,
) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![0u8; size]).unwrap();
    catalog.open_segment(SESSION, CAMERA_URL, &path, Timestamp::from_secs(start_secs));
    catalog.finalize_segment(&path, Timestamp::from_secs(start_secs + 300), 300_000);
    path
}
