//! Retention engine: decides when to evict and drives the executor.
//!
//! A cycle probes the archive mount, recomputes watermarks from the current
//! capacity and, when free space is short, runs eviction batches until the
//! target watermark is reached or a batch can no longer make progress. Cycles
//! are started by a periodic timer and by segment-finalize triggers; at most
//! one runs at a time.

use crate::config::ArchiveConfig;
use crate::core::event::ArchiveEvent;
use crate::retention::executor::{BatchOutcome, EvictionExecutor};
use crate::retention::guard::SingleFlight;
use crate::retention::policy::{should_evict, RetentionConfig};
use crate::storage::catalog::SegmentStore;
use crate::storage::probe::StorageProbe;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between consecutive eviction batches
pub const BATCH_PAUSE: Duration = Duration::from_millis(20);

const EVENT_CAPACITY: usize = 64;

/// Totals for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub need_bytes: u64,
    pub batches: usize,
    pub evicted: usize,
    pub skipped: usize,
    pub rows_left: usize,
    pub freed_bytes: u64,
    pub available_after: u64,
    pub target_reached: bool,
}

impl CycleReport {
    fn absorb(&mut self, batch: &BatchOutcome) {
        self.batches += 1;
        self.evicted += batch.evicted;
        self.skipped += batch.skipped;
        self.rows_left += batch.rows_left;
        self.freed_bytes += batch.freed_bytes;
        if let Some(available) = batch.available_after {
            self.available_after = available;
        }
        self.target_reached |= batch.target_reached;
    }
}

/// What a call to [`RetentionEngine::run_cycle`] did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle was already running
    Busy,
    /// Disk statistics were unavailable or unusable
    Aborted { reason: String },
    /// Free space is above the watermarks
    NotNeeded { available_bytes: u64 },
    Completed(CycleReport),
}

/// Cloneable sender for finalize triggers.
///
/// Triggers coalesce: while one is pending further ones are dropped.
#[derive(Debug, Clone)]
pub struct EngineTrigger {
    tx: mpsc::Sender<()>,
}

impl EngineTrigger {
    pub fn notify_segment_finalized(&self) {
        if self.tx.try_send(()).is_err() {
            debug!("retention trigger already pending");
        }
    }
}

pub struct RetentionEngine {
    settings: ArchiveConfig,
    probe: Arc<dyn StorageProbe>,
    store: Arc<dyn SegmentStore>,
    executor: EvictionExecutor,
    flight: SingleFlight,
    current: Mutex<Option<RetentionConfig>>,
    events: broadcast::Sender<ArchiveEvent>,
    trigger: EngineTrigger,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RetentionEngine {
    pub fn new(
        settings: ArchiveConfig,
        probe: Arc<dyn StorageProbe>,
        store: Arc<dyn SegmentStore>,
    ) -> Self {
        let executor = EvictionExecutor::new(
            Arc::clone(&probe),
            Arc::clone(&store),
            settings.archive_root.clone(),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (tx, rx) = mpsc::channel(1);
        Self {
            settings,
            probe,
            store,
            executor,
            flight: SingleFlight::new(),
            current: Mutex::new(None),
            events,
            trigger: EngineTrigger { tx },
            trigger_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn trigger(&self) -> EngineTrigger {
        self.trigger.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveEvent> {
        self.events.subscribe()
    }

    /// Publish an event to archive observers. Dropped when nobody listens.
    pub fn publish(&self, event: ArchiveEvent) {
        let _ = self.events.send(event);
    }

    /// Watermarks computed by the most recent check
    pub fn current_config(&self) -> Option<RetentionConfig> {
        self.current.lock().ok().and_then(|cfg| *cfg)
    }

    pub fn is_cycle_running(&self) -> bool {
        self.flight.is_busy()
    }

    /// Run one check and, if needed, evict until the target is reached.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_flight) = self.flight.try_acquire() else {
            debug!("retention cycle already running");
            return CycleOutcome::Busy;
        };

        let root = &self.settings.archive_root;
        let stats = match self.probe.stats(root) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "cannot read free space, skipping retention cycle");
                return CycleOutcome::Aborted {
                    reason: e.to_string(),
                };
            }
        };

        let cfg = RetentionConfig::derive(stats.total_bytes, &self.settings);
        if let Ok(mut current) = self.current.lock() {
            *current = Some(cfg);
        }

        let need_bytes = match should_evict(stats, &cfg) {
            Ok(Some(need)) => need,
            Ok(None) => {
                return CycleOutcome::NotNeeded {
                    available_bytes: stats.available_bytes,
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping retention cycle");
                return CycleOutcome::Aborted {
                    reason: e.to_string(),
                };
            }
        };

        info!(
            total_bytes = stats.total_bytes,
            available_bytes = stats.available_bytes,
            min_free_bytes = cfg.min_free_bytes,
            target_free_bytes = cfg.target_free_bytes,
            need_bytes,
            "free space below watermark, evicting oldest segments"
        );

        let mut report = CycleReport {
            need_bytes,
            available_after: stats.available_bytes,
            ..Default::default()
        };

        loop {
            let batch = match self.executor.run_batch(&cfg).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "could not list eviction candidates");
                    break;
                }
            };
            report.absorb(&batch);
            if batch.target_reached || !batch.made_progress() {
                break;
            }

            match self.probe.stats(root) {
                Ok(now) => {
                    report.available_after = now.available_bytes;
                    if cfg.target_reached(now.available_bytes) {
                        report.target_reached = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "free space probe failed, ending cycle");
                    break;
                }
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }

        if report.target_reached {
            info!(
                evicted = report.evicted,
                freed_bytes = report.freed_bytes,
                available_bytes = report.available_after,
                "retention cycle reached target"
            );
        } else {
            warn!(
                evicted = report.evicted,
                skipped = report.skipped,
                available_bytes = report.available_after,
                target_free_bytes = cfg.target_free_bytes,
                "nothing left to evict, free space still below target"
            );
        }

        self.publish(ArchiveEvent::PurgeFinished(report.clone()));
        CycleOutcome::Completed(report)
    }

    /// Start the maintenance loop. The first check runs immediately.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, shutdown: CancellationToken) {
        let mut trigger_rx = self.trigger_rx.lock().ok().and_then(|mut rx| rx.take());
        if trigger_rx.is_none() {
            warn!("retention engine already started, finalize triggers go to the first loop");
        }

        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;

        info!(
            archive_root = %self.settings.archive_root.display(),
            interval_secs = self.settings.check_interval.as_secs(),
            "retention engine started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    ticks = ticks.wrapping_add(1);
                    self.on_tick(ticks).await;
                }
                Some(()) = next_trigger(&mut trigger_rx) => {
                    log_outcome("finalize", &self.run_cycle().await);
                }
            }
        }
        info!("retention engine stopped");
    }

    async fn on_tick(&self, ticks: u32) {
        let outcome = self.run_cycle().await;
        log_outcome("timer", &outcome);
        if let Some(cfg) = self.current_config() {
            info!(
                min_free_bytes = cfg.min_free_bytes,
                target_free_bytes = cfg.target_free_bytes,
                high_water_percent = cfg.high_water_percent,
                "retention watermarks"
            );
        }

        let every = self.settings.checkpoint_every_ticks;
        if every > 0 && ticks % every == 0 {
            if let Err(e) = self.store.checkpoint().await {
                warn!(error = %e, "catalog checkpoint failed");
            }
        }
    }
}

async fn next_trigger(rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_outcome(source: &'static str, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Busy => debug!(source, "retention cycle skipped, one is already running"),
        CycleOutcome::NotNeeded { available_bytes } => {
            debug!(source, available_bytes, "free space above watermarks")
        }
        CycleOutcome::Aborted { reason } => debug!(source, %reason, "retention cycle aborted"),
        CycleOutcome::Completed(report) => debug!(source, batches = report.batches, "retention cycle completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::segment::{CandidateQuery, EvictionCandidate, SegmentId};
    use crate::error::CatalogError;
    use crate::retention::test_support::{
        catalog, seed_segment, DirUsageProbe, FailingProbe, FixedProbe,
    };
    use crate::storage::catalog::MockSegmentStore;
    use crate::storage::probe::DiskStats;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const KB: u64 = 1000;

    fn settings(root: &std::path::Path) -> ArchiveConfig {
        ArchiveConfig::default().with_archive_root(root)
    }

    fn quiet_store() -> Arc<dyn SegmentStore> {
        let mut store = MockSegmentStore::new();
        store.expect_list_eviction_candidates().returning(|_| Ok(vec![]));
        store.expect_checkpoint().returning(|| Ok(()));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_plenty_of_space_needs_nothing() {
        let engine = RetentionEngine::new(
            settings("/archive".as_ref()),
            Arc::new(FixedProbe(DiskStats::new(100 * KB, 60 * KB))),
            quiet_store(),
        );
        assert_eq!(
            engine.run_cycle().await,
            CycleOutcome::NotNeeded {
                available_bytes: 60 * KB
            }
        );
        let cfg = engine.current_config().unwrap();
        assert_eq!(cfg.min_free_bytes, 10 * KB);
        assert_eq!(cfg.target_free_bytes, 12 * KB);
    }

    #[tokio::test]
    async fn test_probe_failure_aborts() {
        let engine = RetentionEngine::new(
            settings("/missing".as_ref()),
            Arc::new(FailingProbe),
            quiet_store(),
        );
        assert!(matches!(engine.run_cycle().await, CycleOutcome::Aborted { .. }));
        assert!(!engine.is_cycle_running());
    }

    #[tokio::test]
    async fn test_zero_capacity_aborts() {
        let engine = RetentionEngine::new(
            settings("/archive".as_ref()),
            Arc::new(FixedProbe(DiskStats::new(0, 0))),
            quiet_store(),
        );
        assert!(matches!(engine.run_cycle().await, CycleOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn test_cycle_spans_batches_until_target() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let paths: Vec<_> = (0..6)
            .map(|i| seed_segment(&catalog, dir.path(), &format!("{i}.ts"), 100 + i, KB as usize))
            .collect();

        let mut cfg = settings(dir.path());
        cfg.purge_batch_size = 2;
        // 100 - 89 - 6 = 5 KB free, target 12 KB: seven would be needed, so
        // every segment goes and the cycle stops when the catalog is empty.
        let engine = RetentionEngine::new(
            cfg,
            Arc::new(DirUsageProbe {
                total: 100 * KB,
                reserved: 89 * KB,
            }),
            Arc::new(catalog.clone()),
        );
        let mut events = engine.subscribe();

        let CycleOutcome::Completed(report) = engine.run_cycle().await else {
            panic!("expected a completed cycle");
        };
        assert_eq!(report.need_bytes, 7 * KB);
        assert_eq!(report.batches, 4);
        assert_eq!(report.evicted, 6);
        assert_eq!(report.freed_bytes, 6 * KB);
        assert_eq!(report.available_after, 11 * KB);
        assert!(!report.target_reached);
        assert!(paths.iter().all(|p| !p.exists()));

        match events.recv().await.unwrap() {
            ArchiveEvent::PurgeFinished(published) => assert_eq!(published, report),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cycle_stops_at_target() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        let paths: Vec<_> = (0..4)
            .map(|i| seed_segment(&catalog, dir.path(), &format!("{i}.ts"), 100 + i, 2 * KB as usize))
            .collect();

        // 100 - 81 - 8 = 11 KB free (below 12 KB target, above 10 KB min),
        // so lower the high-water mark to trigger.
        let mut cfg = settings(dir.path());
        cfg.high_water_percent = 80;
        let engine = RetentionEngine::new(
            cfg,
            Arc::new(DirUsageProbe {
                total: 100 * KB,
                reserved: 81 * KB,
            }),
            Arc::new(catalog.clone()),
        );

        let CycleOutcome::Completed(report) = engine.run_cycle().await else {
            panic!("expected a completed cycle");
        };
        assert!(report.target_reached);
        assert_eq!(report.evicted, 1);
        assert!(!paths[0].exists());
        assert!(paths[1..].iter().all(|p| p.exists()));
    }

    /// Store whose candidate listing blocks until released.
    struct GatedStore {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SegmentStore for GatedStore {
        async fn list_eviction_candidates(
            &self,
            _query: CandidateQuery,
        ) -> Result<Vec<EvictionCandidate>, CatalogError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }

        async fn delete_segment_row(&self, _id: SegmentId) -> Result<bool, CatalogError> {
            Ok(false)
        }

        async fn checkpoint(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_cycles_are_single_flight() {
        let store = Arc::new(GatedStore {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(RetentionEngine::new(
            settings("/archive".as_ref()),
            Arc::new(FixedProbe(DiskStats::new(100 * KB, KB))),
            store.clone(),
        ));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_cycle().await }
        });
        store.entered.notified().await;
        assert!(engine.is_cycle_running());

        for _ in 0..5 {
            assert_eq!(engine.run_cycle().await, CycleOutcome::Busy);
        }

        store.release.notify_one();
        let outcome = first.await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(ref r) if r.batches == 1 && r.evicted == 0));
        assert!(!engine.is_cycle_running());
    }

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let engine = RetentionEngine::new(
            settings("/archive".as_ref()),
            Arc::new(FixedProbe(DiskStats::new(100 * KB, 60 * KB))),
            quiet_store(),
        );
        let trigger = engine.trigger();
        for _ in 0..10 {
            trigger.notify_segment_finalized();
        }
        let mut rx = engine.trigger_rx.lock().unwrap().take().unwrap();
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_loop_checks_at_startup_and_on_trigger() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog();
        seed_segment(&catalog, dir.path(), "a.ts", 1, KB as usize);

        let mut cfg = settings(dir.path());
        cfg.check_interval = Duration::from_secs(3600);
        let engine = Arc::new(RetentionEngine::new(
            cfg,
            Arc::new(DirUsageProbe {
                total: 100 * KB,
                reserved: 90 * KB,
            }),
            Arc::new(catalog.clone()),
        ));
        let mut events = engine.subscribe();
        let shutdown = CancellationToken::new();
        let task = Arc::clone(&engine).spawn(shutdown.clone());

        let startup = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(startup, ArchiveEvent::PurgeFinished(ref r) if r.evicted == 1));

        let late = seed_segment(&catalog, dir.path(), "b.ts", 2, 3 * KB as usize);
        engine.trigger().notify_segment_finalized();
        let triggered = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(triggered, ArchiveEvent::PurgeFinished(ref r) if r.evicted == 1));
        assert!(!late.exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_timer_checkpoints_catalog() {
        let mut store = MockSegmentStore::new();
        store.expect_checkpoint().times(2..).returning(|| Ok(()));

        let mut cfg = settings("/archive".as_ref());
        cfg.check_interval = Duration::from_millis(10);
        cfg.checkpoint_every_ticks = 1;
        let engine = Arc::new(RetentionEngine::new(
            cfg,
            Arc::new(FixedProbe(DiskStats::new(100 * KB, 60 * KB))),
            Arc::new(store),
        ));
        let shutdown = CancellationToken::new();
        let task = Arc::clone(&engine).spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();
    }
}
