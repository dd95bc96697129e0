//! Free-space statistics for the archive mount point

use crate::error::FilesystemError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Capacity snapshot of one filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    pub total_bytes: u64,
    /// Bytes available to unprivileged writers
    pub available_bytes: u64,
}

impl DiskStats {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total_bytes,
            available_bytes,
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn free_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.available_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Source of disk statistics, injected into the retention engine.
pub trait StorageProbe: Send + Sync {
    fn stats(&self, path: &Path) -> Result<DiskStats, FilesystemError>;
}

/// Probe backed by `statvfs(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl StorageProbe for StatvfsProbe {
    #[cfg(unix)]
    fn stats(&self, path: &Path) -> Result<DiskStats, FilesystemError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        if !path.exists() {
            return Err(FilesystemError::MissingMount(path.to_path_buf()));
        }
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            FilesystemError::Probe {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            }
        })?;

        // SAFETY: `stat` is a plain C struct that statvfs fully initializes
        // on success; `c_path` is a valid NUL-terminated string.
        let stat = unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(FilesystemError::Probe {
                    path: path.to_path_buf(),
                    source: std::io::Error::last_os_error(),
                });
            }
            stat
        };

        #[allow(clippy::unnecessary_cast)]
        let block_size = stat.f_frsize as u64;
        #[allow(clippy::unnecessary_cast)]
        let stats = DiskStats {
            total_bytes: stat.f_blocks as u64 * block_size,
            available_bytes: stat.f_bavail as u64 * block_size,
        };
        Ok(stats)
    }

    #[cfg(not(unix))]
    fn stats(&self, path: &Path) -> Result<DiskStats, FilesystemError> {
        Err(FilesystemError::Probe {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "disk statistics are only available on unix",
            ),
        })
    }
}

/// Storage section of the status report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageReport {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub free_percent: f64,
}

impl StorageReport {
    pub fn new(mount_point: impl Into<PathBuf>, stats: DiskStats) -> Self {
        Self {
            mount_point: mount_point.into(),
            total_bytes: stats.total_bytes,
            used_bytes: stats.used_bytes(),
            available_bytes: stats.available_bytes,
            free_percent: stats.free_percent(),
        }
    }
}
