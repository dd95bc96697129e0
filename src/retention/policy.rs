//! Watermark arithmetic and the eviction decision.
//!
//! Eviction starts once free space drops below the minimum watermark (or
//! used space crosses the high-water mark) and continues until free space
//! reaches the higher target watermark.

use crate::config::ArchiveConfig;
use crate::error::PolicyError;
use crate::storage::probe::DiskStats;
use serde::Serialize;

/// Largest fraction of the disk the watermarks may reserve
pub const MAX_FREE_FRACTION: f64 = 0.95;

const BASIS_POINTS: u128 = 10_000;

/// Free-space thresholds in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermarks {
    pub min_free_bytes: u64,
    pub target_free_bytes: u64,
}

/// Derive byte watermarks from the disk size.
///
/// Fractions are clamped to `[0, 0.95]` and the target is never below the
/// minimum.
pub fn compute_watermarks(
    total_bytes: u64,
    min_free_fraction: f64,
    target_free_fraction: f64,
) -> Watermarks {
    let min_bp = to_basis_points(min_free_fraction);
    let target_bp = to_basis_points(target_free_fraction).max(min_bp);
    Watermarks {
        min_free_bytes: share_of(total_bytes, min_bp),
        target_free_bytes: share_of(total_bytes, target_bp),
    }
}

fn to_basis_points(fraction: f64) -> u128 {
    let clamped = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, MAX_FREE_FRACTION)
    };
    (clamped * BASIS_POINTS as f64).round() as u128
}

fn share_of(total_bytes: u64, basis_points: u128) -> u64 {
    (total_bytes as u128 * basis_points / BASIS_POINTS) as u64
}

/// Effective retention parameters for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionConfig {
    pub min_free_bytes: u64,
    pub target_free_bytes: u64,
    pub high_water_percent: u8,
    pub purge_batch_size: usize,
    pub per_camera_min_days: u32,
}

impl RetentionConfig {
    /// Recompute watermarks for the current capacity.
    pub fn derive(total_bytes: u64, cfg: &ArchiveConfig) -> Self {
        let marks = compute_watermarks(
            total_bytes,
            cfg.min_free_fraction(),
            cfg.target_free_fraction(),
        );
        Self {
            min_free_bytes: marks.min_free_bytes,
            target_free_bytes: marks.target_free_bytes,
            high_water_percent: cfg.high_water_percent,
            purge_batch_size: cfg.purge_batch_size,
            per_camera_min_days: cfg.per_camera_min_days,
        }
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            min_free_bytes: self.min_free_bytes,
            target_free_bytes: self.target_free_bytes,
        }
    }

    pub fn target_reached(&self, available_bytes: u64) -> bool {
        available_bytes >= self.target_free_bytes
    }
}

/// Bytes that must be freed, or `None` when no eviction is needed.
pub fn should_evict(stats: DiskStats, cfg: &RetentionConfig) -> Result<Option<u64>, PolicyError> {
    let DiskStats {
        total_bytes: total,
        available_bytes: available,
    } = stats;
    if total == 0 {
        return Err(PolicyError::InvalidCapacity { total, available });
    }

    let used_percent = u128::from(total.saturating_sub(available)) * 100 / u128::from(total);
    let triggered =
        available < cfg.min_free_bytes || used_percent >= u128::from(cfg.high_water_percent);
    if !triggered {
        return Ok(None);
    }

    let need = cfg.target_free_bytes.saturating_sub(available);
    Ok((need > 0).then_some(need))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GB: u64 = 1_000_000_000;

    fn cfg(total: u64) -> RetentionConfig {
        RetentionConfig::derive(total, &ArchiveConfig::default())
    }

    #[test]
    fn test_scenario_a_watermarks_and_need() {
        let marks = compute_watermarks(100 * GB, 0.10, 0.12);
        assert_eq!(marks.min_free_bytes, 10 * GB);
        assert_eq!(marks.target_free_bytes, 12 * GB);

        let need = should_evict(DiskStats::new(100 * GB, 9 * GB), &cfg(100 * GB)).unwrap();
        assert_eq!(need, Some(3 * GB));
    }

    #[test]
    fn test_plenty_of_space_is_not_triggered() {
        assert_eq!(
            should_evict(DiskStats::new(100 * GB, 50 * GB), &cfg(100 * GB)).unwrap(),
            None
        );
    }

    #[test]
    fn test_high_water_alone_triggers() {
        let mut c = cfg(100 * GB);
        c.min_free_bytes = 0;
        c.target_free_bytes = 15 * GB;
        // 90% used with 10 GB free: only the high-water rule fires.
        assert_eq!(
            should_evict(DiskStats::new(100 * GB, 10 * GB), &c).unwrap(),
            Some(5 * GB)
        );
    }

    #[test]
    fn test_triggered_but_already_at_target_is_nothing_to_do() {
        let mut c = cfg(100 * GB);
        c.high_water_percent = 50;
        // 60% used triggers, but 40 GB free already exceeds the 12 GB target.
        assert_eq!(should_evict(DiskStats::new(100 * GB, 40 * GB), &c).unwrap(), None);
    }

    #[test]
    fn test_zero_capacity_cannot_be_evaluated() {
        let err = should_evict(DiskStats::new(0, 0), &cfg(0)).unwrap_err();
        assert_eq!(err, PolicyError::InvalidCapacity { total: 0, available: 0 });
    }

    #[test]
    fn test_fractions_are_clamped() {
        let marks = compute_watermarks(1000, 2.0, -1.0);
        assert_eq!(marks.min_free_bytes, 950);
        // target below min is raised to min
        assert_eq!(marks.target_free_bytes, 950);

        let marks = compute_watermarks(1000, f64::NAN, 0.5);
        assert_eq!(marks.min_free_bytes, 0);
        assert_eq!(marks.target_free_bytes, 500);
    }

    #[test]
    fn test_legacy_seventy_percent_values_still_clamp() {
        let marks = compute_watermarks(100 * GB, 0.70, 0.72);
        assert_eq!(marks.min_free_bytes, 70 * GB);
        assert_eq!(marks.target_free_bytes, 72 * GB);
    }

    proptest! {
        #[test]
        fn prop_min_never_exceeds_target(
            total in 0u64..=u64::MAX / 2,
            min in -1.0f64..2.0,
            target in -1.0f64..2.0,
        ) {
            let marks = compute_watermarks(total, min, target);
            prop_assert!(marks.min_free_bytes <= marks.target_free_bytes);
            prop_assert!(marks.target_free_bytes <= total);
        }

        #[test]
        fn prop_need_closes_gap_to_target(
            total in 1u64..=1u64 << 50,
            avail_share in 0.0f64..=1.0,
        ) {
            let available = (total as f64 * avail_share) as u64;
            let c = cfg(total);
            if let Some(need) = should_evict(DiskStats::new(total, available), &c).unwrap() {
                prop_assert!(need > 0);
                prop_assert_eq!(available + need, c.target_free_bytes);
            }
        }
    }
}
