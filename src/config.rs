//! Process configuration read from the environment.
//!
//! Every key is optional. Values that fail to parse fall back to their
//! default with a warning so a typo never prevents recording from starting.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Free-space percentage below which eviction starts
pub const DEFAULT_MIN_FREE_PCT: f64 = 10.0;
/// Free-space percentage eviction works toward
pub const DEFAULT_TARGET_FREE_PCT: f64 = 12.0;
/// Used-space percentage that triggers eviction regardless of free bytes
pub const DEFAULT_HIGH_WATER_PCT: u8 = 90;
pub const DEFAULT_PURGE_BATCH_SIZE: usize = 64;
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SEGMENT_SECONDS: u32 = 300;
pub const DEFAULT_LOW_SPACE_WARN_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_CHECKPOINT_EVERY_TICKS: u32 = 12;
/// Largest accepted `PER_CAMERA_MIN_DAYS` (a century)
pub const MAX_MIN_AGE_DAYS: u32 = 36_500;

const STORAGE_PARTITION_DIR: &str = "CamVigil_StoragePartition";
const ARCHIVE_DIR: &str = "CamVigilArchives";
const CATALOG_FILE: &str = "camvigil.sqlite";

/// Archive and retention settings
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveConfig {
    /// Directory segment files and the catalog live in
    pub archive_root: PathBuf,
    /// Percent of total capacity that must stay free (e.g. `10.0`)
    pub min_free_percent: f64,
    /// Percent of total capacity eviction frees up to
    pub target_free_percent: f64,
    pub high_water_percent: u8,
    pub purge_batch_size: usize,
    /// Minimum segment age in days before it may be evicted; 0 disables
    pub per_camera_min_days: u32,
    pub check_interval: Duration,
    pub segment_seconds: u32,
    pub low_space_warn_bytes: u64,
    pub checkpoint_every_ticks: u32,
    /// Directory for rolling log files, if file logging is wanted
    pub log_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_root: default_archive_root(std::env::var_os("HOME").map(PathBuf::from)),
            min_free_percent: DEFAULT_MIN_FREE_PCT,
            target_free_percent: DEFAULT_TARGET_FREE_PCT,
            high_water_percent: DEFAULT_HIGH_WATER_PCT,
            purge_batch_size: DEFAULT_PURGE_BATCH_SIZE,
            per_camera_min_days: 0,
            check_interval: DEFAULT_CHECK_INTERVAL,
            segment_seconds: DEFAULT_SEGMENT_SECONDS,
            low_space_warn_bytes: DEFAULT_LOW_SPACE_WARN_BYTES,
            checkpoint_every_ticks: DEFAULT_CHECKPOINT_EVERY_TICKS,
            log_dir: None,
        }
    }
}

impl ArchiveConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(root) = get("ARCHIVE_ROOT") {
            cfg.archive_root = PathBuf::from(root);
        } else if let Some(partition) = get("CAMVIGIL_ARCHIVE_ROOT") {
            cfg.archive_root = Path::new(&partition).join(ARCHIVE_DIR);
        }

        if let Some(raw) = get("MIN_FREE_PCT").or_else(|| get("CAMVIGIL_MIN_FREE_PCT")) {
            cfg.min_free_percent = parse_or("MIN_FREE_PCT", &raw, DEFAULT_MIN_FREE_PCT);
        }
        if let Some(raw) = get("TARGET_FREE_PCT").or_else(|| get("CAMVIGIL_TARGET_FREE_PCT")) {
            cfg.target_free_percent = parse_or("TARGET_FREE_PCT", &raw, DEFAULT_TARGET_FREE_PCT);
        }
        if let Some(raw) = get("HIGH_WATER_PCT") {
            cfg.high_water_percent = parse_or("HIGH_WATER_PCT", &raw, DEFAULT_HIGH_WATER_PCT);
        }
        if let Some(raw) = get("PURGE_BATCH_SIZE") {
            cfg.purge_batch_size = parse_or("PURGE_BATCH_SIZE", &raw, DEFAULT_PURGE_BATCH_SIZE);
        }
        if let Some(raw) = get("PER_CAMERA_MIN_DAYS") {
            cfg.per_camera_min_days = parse_or("PER_CAMERA_MIN_DAYS", &raw, 0);
        }
        if let Some(raw) = get("CHECK_INTERVAL_SECS") {
            let secs = parse_or("CHECK_INTERVAL_SECS", &raw, DEFAULT_CHECK_INTERVAL.as_secs());
            cfg.check_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = get("SEGMENT_SECONDS") {
            cfg.segment_seconds = parse_or("SEGMENT_SECONDS", &raw, DEFAULT_SEGMENT_SECONDS);
        }
        if let Some(raw) = get("LOW_SPACE_WARN_BYTES") {
            cfg.low_space_warn_bytes =
                parse_or("LOW_SPACE_WARN_BYTES", &raw, DEFAULT_LOW_SPACE_WARN_BYTES);
        }
        cfg.log_dir = get("LOG_DIR").map(PathBuf::from);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Override the archive root (command-line flag)
    pub fn with_archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive_root = root.into();
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.purge_batch_size == 0 {
            return Err(Error::Configuration(
                "PURGE_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(Error::Configuration(
                "CHECK_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.high_water_percent) {
            return Err(Error::Configuration(format!(
                "HIGH_WATER_PCT must be within 1..=100, got {}",
                self.high_water_percent
            )));
        }
        if self.per_camera_min_days > MAX_MIN_AGE_DAYS {
            return Err(Error::Configuration(format!(
                "PER_CAMERA_MIN_DAYS must be at most {MAX_MIN_AGE_DAYS}, got {}",
                self.per_camera_min_days
            )));
        }
        Ok(())
    }

    /// Location of the catalog database inside the archive root
    pub fn catalog_path(&self) -> PathBuf {
        self.archive_root.join(CATALOG_FILE)
    }

    /// Minimum free fraction (`10.0` percent becomes `0.10`), unclamped
    pub fn min_free_fraction(&self) -> f64 {
        self.min_free_percent / 100.0
    }

    /// Target free fraction, unclamped
    pub fn target_free_fraction(&self) -> f64 {
        self.target_free_percent / 100.0
    }
}

fn default_archive_root(home: Option<PathBuf>) -> PathBuf {
    home.unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_PARTITION_DIR)
        .join(ARCHIVE_DIR)
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, fallback: T) -> T {
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = raw, %fallback, "unparseable configuration value, using default");
            fallback
        }
    }
}
