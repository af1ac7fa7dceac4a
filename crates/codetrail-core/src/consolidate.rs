//! Merge and inject steps run by the consolidator.
//!
//! The provider only exposes primitives; these functions fix the schedule:
//! pending storages are merged largest-with-second-largest, and the largest
//! one is what gets injected into the persistent destination.

use tracing::debug;

use crate::error::StorageResult;
use crate::provider::StorageProvider;
use crate::storage::{InjectionStats, LockedStorage, Storage};

/// Merge the second-largest pending storage into the largest one.
///
/// Returns `Ok(None)` and leaves the pool unchanged when fewer than two
/// storages are pending.
pub fn merge_largest_pair(provider: &StorageProvider) -> StorageResult<Option<InjectionStats>> {
    let Some(second) = provider.consume_second_largest_storage() else {
        return Ok(None);
    };
    let Some(mut largest) = provider.consume_largest_storage() else {
        provider.insert(second);
        return Ok(None);
    };

    let stats = largest.inject(&second)?;
    debug!(
        size = largest.source_location_count(),
        dropped = stats.dropped(),
        "merged storages"
    );
    provider.insert(largest);
    Ok(Some(stats))
}

/// Inject the largest pending storage into `destination`.
///
/// Returns `Ok(None)` when nothing is pending. On a backend failure the
/// storage is lost along with the run; the destination is rolled back.
pub fn inject_largest<S: Storage>(
    provider: &StorageProvider,
    destination: &LockedStorage<S>,
) -> StorageResult<Option<InjectionStats>> {
    let Some(storage) = provider.consume_largest_storage() else {
        return Ok(None);
    };
    let stats = destination.inject(&storage)?;
    debug!(
        remaining = provider.storage_count(),
        dropped = stats.dropped(),
        "injected storage into destination"
    );
    Ok(Some(stats))
}

// ============================================================================
// Tests
// ============================================================================
