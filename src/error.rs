//! Error types for Vigil-Archive

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Vigil-Archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the segment catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A SQL statement failed
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schema creation or upgrade failed
    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// The catalog file or its directory could not be opened
    #[error("Cannot open catalog at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// The writer thread has stopped and no longer accepts requests
    #[error("Catalog writer is unavailable")]
    Unavailable,
}

/// Failures touching the archive filesystem
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Segment file could not be removed
    #[error("Failed to unlink {path}: {source}")]
    Unlink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Space statistics could not be read for the mount
    #[error("Storage probe failed for {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive root is missing or not mounted
    #[error("Archive mount is missing: {0}")]
    MissingMount(PathBuf),
}

/// The retention policy cannot be evaluated
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// The probe reported a zero or otherwise unusable capacity
    #[error("Invalid storage capacity: total={total} available={available}")]
    InvalidCapacity { total: u64, available: u64 },
}

/// Main error type for Vigil-Archive
#[derive(Error, Debug)]
pub enum Error {
    /// Catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Filesystem errors
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Retention policy errors
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Catalog(CatalogError::Sql(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
