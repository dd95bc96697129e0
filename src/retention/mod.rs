//! Disk-space retention: watermark policy, batch eviction and the engine
//! that schedules both.

pub mod engine;
pub mod executor;
pub mod guard;
pub mod policy;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{CycleOutcome, CycleReport, EngineTrigger, RetentionEngine};
pub use executor::{BatchOutcome, EvictionExecutor};
pub use guard::{FlightGuard, SingleFlight};
pub use policy::{compute_watermarks, should_evict, RetentionConfig, Watermarks};
