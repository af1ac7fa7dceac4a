//! Parallel indexing run.
//!
//! Producer threads claim units from a shared cursor, turn each one into an
//! [`IntermediateStorage`] and hand it to the [`StorageProvider`]. The calling
//! thread acts as consolidator: while producers run it merges the two largest
//! pending storages, and once they are done it injects what is left into the
//! persistent destination.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use codetrail_core::config::DEFAULT_MAX_PENDING_STORAGES;
use codetrail_core::consolidate::{inject_largest, merge_largest_pair};
use codetrail_core::error::StorageResult;
use codetrail_core::intermediate::IntermediateStorage;
use codetrail_core::provider::StorageProvider;
use codetrail_core::storage::{InjectionStats, LockedStorage, Storage};
use codetrail_core::types::ErrorRecord;

/// How long producers and the consolidator sleep while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One unit of work for a producer.
pub trait IndexingUnit: Sync {
    /// Translation unit name reported in error records.
    fn name(&self) -> String;
}

impl IndexingUnit for PathBuf {
    fn name(&self) -> String {
        self.display().to_string()
    }
}

impl IndexingUnit for String {
    fn name(&self) -> String {
        self.clone()
    }
}

// ============================================================================
// Report
// ============================================================================

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
    pub units_total: usize,
    pub units_indexed: usize,
    pub units_failed: usize,
    pub interrupted: bool,
    pub merges: usize,
    /// Counts of the in-memory pairwise merges.
    pub merging: InjectionStats,
    /// Counts of the injections into the persistent destination.
    pub injection: InjectionStats,
}

// ============================================================================
// IndexingRun
// ============================================================================

/// Configuration and cancellation state of one run.
#[derive(Debug)]
pub struct IndexingRun {
    threads: usize,
    max_pending_storages: usize,
    interrupt: Arc<AtomicBool>,
}

impl Default for IndexingRun {
    fn default() -> Self {
        IndexingRun::new(1, DEFAULT_MAX_PENDING_STORAGES)
    }
}

impl IndexingRun {
    /// A run with `threads` producers. Producers wait while
    /// `max_pending_storages` storages are pending (at least two, so the
    /// consolidator always has a pair to merge).
    pub fn new(threads: usize, max_pending_storages: usize) -> Self {
        IndexingRun {
            threads: threads.max(1),
            max_pending_storages: max_pending_storages.max(2),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run between units when set.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Produce every unit and merge the results into `destination`.
    ///
    /// Producer failures become fatal error records; only a failing
    /// destination makes the run return `Err`. After an interrupt, units
    /// already produced are still injected.
    pub fn run<U, P, S>(
        &self,
        units: &[U],
        producer: P,
        destination: &LockedStorage<S>,
    ) -> StorageResult<IndexingReport>
    where
        U: IndexingUnit,
        P: Fn(&U) -> Result<IntermediateStorage, String> + Sync,
        S: Storage,
    {
        let provider = StorageProvider::new();
        let next_unit = AtomicUsize::new(0);
        let active_producers = AtomicUsize::new(self.threads);
        let indexed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let mut report = IndexingReport {
            units_total: units.len(),
            ..IndexingReport::default()
        };

        info!(
            units = units.len(),
            threads = self.threads,
            max_pending = self.max_pending_storages,
            "indexing run started"
        );

        let consolidated: StorageResult<()> = thread::scope(|scope| {
            for worker in 0..self.threads {
                let provider = &provider;
                let producer = &producer;
                let next_unit = &next_unit;
                let active_producers = &active_producers;
                let indexed = &indexed;
                let failed = &failed;

                scope.spawn(move || {
                    loop {
                        if self.interrupted() {
                            break;
                        }
                        let index = next_unit.fetch_add(1, Ordering::SeqCst);
                        let Some(unit) = units.get(index) else {
                            break;
                        };

                        self.wait_for_capacity(provider);
                        let (storage, ok) = self.produce(unit, producer);
                        if ok {
                            indexed.fetch_add(1, Ordering::SeqCst);
                        } else {
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                        provider.insert(storage);
                    }
                    debug!(worker, "producer finished");
                    active_producers.fetch_sub(1, Ordering::SeqCst);
                });
            }

            let merged = self.merge_while_producing(&provider, &active_producers, &mut report);
            if merged.is_err() {
                // Stop the producers; the scope still joins them.
                self.interrupt();
            }
            merged
        });
        consolidated?;

        provider.log_current_state();
        while let Some(stats) = inject_largest(&provider, destination)? {
            report.injection.absorb(&stats);
        }

        report.units_indexed = indexed.load(Ordering::SeqCst);
        report.units_failed = failed.load(Ordering::SeqCst);
        report.interrupted = self.interrupted();
        info!(
            indexed = report.units_indexed,
            failed = report.units_failed,
            interrupted = report.interrupted,
            merges = report.merges,
            dropped = report.injection.dropped(),
            "indexing run finished"
        );
        Ok(report)
    }

    fn merge_while_producing(
        &self,
        provider: &StorageProvider,
        active_producers: &AtomicUsize,
        report: &mut IndexingReport,
    ) -> StorageResult<()> {
        loop {
            let producing = active_producers.load(Ordering::SeqCst) > 0;
            if let Some(stats) = merge_largest_pair(provider)? {
                report.merges += 1;
                report.merging.absorb(&stats);
                continue;
            }
            if !producing {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_capacity(&self, provider: &StorageProvider) {
        while provider.storage_count() >= self.max_pending_storages && !self.interrupted() {
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Run the producer on one unit. The flag is false if it failed.
    fn produce<U, P>(&self, unit: &U, producer: &P) -> (IntermediateStorage, bool)
    where
        U: IndexingUnit,
        P: Fn(&U) -> Result<IntermediateStorage, String>,
    {
        match catch_unwind(AssertUnwindSafe(|| producer(unit))) {
            Ok(Ok(mut storage)) => {
                storage.set_files_with_errors_incomplete();
                if self.interrupted() {
                    storage.set_all_files_incomplete();
                }
                debug!(unit = %unit.name(), nodes = storage.node_count(), "unit indexed");
                (storage, true)
            }
            Ok(Err(message)) => {
                warn!(unit = %unit.name(), error = %message, "unit failed");
                (failed_unit(unit, &message), false)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(unit = %unit.name(), panic = %message, "producer panicked");
                (failed_unit(unit, &format!("producer panicked: {}", message)), false)
            }
        }
    }
}

/// A storage reporting that `unit` could not be indexed.
fn failed_unit<U: IndexingUnit>(unit: &U, message: &str) -> IntermediateStorage {
    let name = unit.name();
    let mut storage = IntermediateStorage::new();
    storage.add_error(
        &ErrorRecord::new(format!("indexing failed: {}", message), name.clone())
            .with_location(name, 0, 0)
            .with_fatal(true),
    );
    storage
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
