//! Thread-safe hand-off of finished intermediate storages.
//!
//! Producer threads `insert` completed storages; one consolidator withdraws
//! them for merging. Pending storages are kept sorted by source-location
//! count, largest first.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::intermediate::IntermediateStorage;

/// Per-string overhead assumed when estimating storage sizes for logs.
const STRING_SIZE_ESTIMATE: usize = 24;

/// Mutex-guarded pool of pending storages, largest first.
#[derive(Debug, Default)]
pub struct StorageProvider {
    /// (source-location count, storage), sorted descending by count.
    storages: Mutex<Vec<(usize, IntermediateStorage)>>,
}

impl StorageProvider {
    pub fn new() -> Self {
        StorageProvider::default()
    }

    /// Add a storage, keeping the pool sorted.
    ///
    /// A storage goes after every pending storage of at least its size.
    pub fn insert(&self, storage: IntermediateStorage) {
        let size = storage.source_location_count();
        let mut storages = self.lock();
        let position = storages
            .iter()
            .position(|(pending, _)| *pending < size)
            .unwrap_or(storages.len());
        storages.insert(position, (size, storage));
        debug!(size, pending = storages.len(), "storage inserted");
    }

    /// Withdraw the largest pending storage.
    pub fn consume_largest_storage(&self) -> Option<IntermediateStorage> {
        let mut storages = self.lock();
        if storages.is_empty() {
            return None;
        }
        Some(storages.remove(0).1)
    }

    /// Withdraw the second-largest pending storage, leaving the largest.
    pub fn consume_second_largest_storage(&self) -> Option<IntermediateStorage> {
        let mut storages = self.lock();
        if storages.len() < 2 {
            return None;
        }
        Some(storages.remove(1).1)
    }

    pub fn storage_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Log the size of every pending storage.
    pub fn log_current_state(&self) {
        let storages = self.lock();
        let sizes: Vec<String> = storages
            .iter()
            .map(|(count, storage)| {
                format!(
                    "{} locations / ~{} bytes",
                    count,
                    storage.get_byte_size(STRING_SIZE_ESTIMATE)
                )
            })
            .collect();
        info!(pending = storages.len(), sizes = ?sizes, "storage provider state");
    }

    // The pool only holds whole storages; a panicking holder cannot leave
    // a half-inserted entry behind.
    fn lock(&self) -> MutexGuard<'_, Vec<(usize, IntermediateStorage)>> {
        self.storages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
