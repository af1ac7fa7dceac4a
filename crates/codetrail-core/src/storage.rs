//! The storage capability trait and the `inject` merge.
//!
//! [`Storage`] is what producers and merges write through. Both the
//! in-memory [`IntermediateStorage`] and the persistent
//! [`SqliteIndexStorage`](crate::sqlite::SqliteIndexStorage) implement it.
//!
//! [`Storage::inject`] copies every record of an intermediate storage into
//! the destination. Source ids are storage-local, so the merge rebuilds
//! every cross-reference through two remapping tables scoped to the call:
//! one for elements (nodes, edges, local symbols, errors) and one for source
//! locations. A record whose reference did not map is dropped, never stored
//! dangling. Phases run in dependency order:
//!
//! 1. errors
//! 2. nodes
//! 3. files (owning node must map)
//! 4. symbols (node must map)
//! 5. edges (both endpoints must map)
//! 6. local symbols
//! 7. source locations (file must map)
//! 8. occurrences (element and location must map), in batches
//! 9. component accesses (node must map)
//! 10. comment locations (file must map)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::intermediate::IntermediateStorage;
use crate::types::{
    CommentLocation, ComponentAccess, Edge, ErrorRecord, File, Id, LocalSymbol, Node, Occurrence,
    SourceLocation, Symbol,
};

/// Number of occurrences handed to the destination per call during a merge.
pub const OCCURRENCE_BATCH_SIZE: usize = 100;

// ============================================================================
// Storage Trait
// ============================================================================

/// Write capability shared by every storage backend.
///
/// `add_*` methods that return an [`Id`] follow one contract: the id of the
/// existing record with the same identity key, or a newly allocated id, or
/// [`Id::NONE`] when the record was not stored.
pub trait Storage {
    fn add_node(&mut self, node: &Node) -> StorageResult<Id>;

    fn add_file(&mut self, file: &File) -> StorageResult<()>;

    fn add_symbol(&mut self, symbol: &Symbol) -> StorageResult<()>;

    fn add_edge(&mut self, edge: &Edge) -> StorageResult<Id>;

    fn add_local_symbol(&mut self, symbol: &LocalSymbol) -> StorageResult<Id>;

    fn add_source_location(&mut self, location: &SourceLocation) -> StorageResult<Id>;

    fn add_occurrences(&mut self, occurrences: &[Occurrence]) -> StorageResult<()>;

    fn add_occurrence(&mut self, occurrence: &Occurrence) -> StorageResult<()> {
        self.add_occurrences(std::slice::from_ref(occurrence))
    }

    fn add_component_access(&mut self, access: &ComponentAccess) -> StorageResult<()>;

    fn add_comment_location(&mut self, location: &CommentLocation) -> StorageResult<()>;

    fn add_error(&mut self, error: &ErrorRecord) -> StorageResult<Id>;

    /// Runs before the first merge phase (e.g. begin a transaction).
    fn start_injection(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Runs after the last merge phase (e.g. commit).
    fn finish_injection(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Runs instead of `finish_injection` when a phase failed (e.g. rollback).
    fn abort_injection(&mut self) {}

    /// Merge every record of `injected` into this storage.
    ///
    /// Records with unresolvable references are dropped and counted in the
    /// returned stats. An `Err` means the backend failed; `abort_injection`
    /// has run and the destination is left as it was before the call.
    fn inject(&mut self, injected: &IntermediateStorage) -> StorageResult<InjectionStats> {
        self.start_injection()?;
        match inject_records(self, injected) {
            Ok(stats) => {
                if let Err(err) = self.finish_injection() {
                    warn!(error = %err, "finishing injection failed, rolling back");
                    self.abort_injection();
                    return Err(err);
                }
                debug!(
                    nodes = stats.nodes.offered,
                    edges = stats.edges.offered,
                    occurrences = stats.occurrences.offered,
                    dropped = stats.dropped(),
                    "injected storage"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(error = %err, "injection failed, rolling back");
                self.abort_injection();
                Err(err)
            }
        }
    }
}

fn inject_records<S: Storage + ?Sized>(
    storage: &mut S,
    injected: &IntermediateStorage,
) -> StorageResult<InjectionStats> {
    let mut stats = InjectionStats::default();
    let mut element_ids: HashMap<Id, Id> = HashMap::new();
    let mut location_ids: HashMap<Id, Id> = HashMap::new();

    for error in injected.errors() {
        stats.errors.offered += 1;
        let own_id = storage.add_error(error)?;
        remember(&mut element_ids, error.id, own_id);
    }

    for node in injected.nodes() {
        stats.nodes.offered += 1;
        let own_id = storage.add_node(node)?;
        if !remember(&mut element_ids, node.id, own_id) {
            stats.nodes.dropped += 1;
        }
    }

    for file in injected.files() {
        stats.files.offered += 1;
        match element_ids.get(&file.id) {
            Some(&own_id) => {
                let mut own = file.clone();
                own.id = own_id;
                storage.add_file(&own)?;
            }
            None => stats.files.dropped += 1,
        }
    }

    for symbol in injected.symbols() {
        stats.symbols.offered += 1;
        match element_ids.get(&symbol.id) {
            Some(&own_id) => storage.add_symbol(&Symbol::new(own_id, symbol.definition_kind))?,
            None => stats.symbols.dropped += 1,
        }
    }

    for edge in injected.edges() {
        stats.edges.offered += 1;
        let endpoints = (
            element_ids.get(&edge.source_id).copied(),
            element_ids.get(&edge.target_id).copied(),
        );
        let (Some(source_id), Some(target_id)) = endpoints else {
            stats.edges.dropped += 1;
            continue;
        };
        let own_id = storage.add_edge(&Edge::new(edge.kind, source_id, target_id))?;
        if !remember(&mut element_ids, edge.id, own_id) {
            stats.edges.dropped += 1;
        }
    }

    for symbol in injected.local_symbols() {
        stats.local_symbols.offered += 1;
        let own_id = storage.add_local_symbol(symbol)?;
        if !remember(&mut element_ids, symbol.id, own_id) {
            stats.local_symbols.dropped += 1;
        }
    }

    for location in injected.source_locations() {
        stats.source_locations.offered += 1;
        let Some(&file_id) = element_ids.get(&location.file_id) else {
            stats.source_locations.dropped += 1;
            continue;
        };
        let mut own = *location;
        own.file_id = file_id;
        let own_id = storage.add_source_location(&own)?;
        if !remember(&mut location_ids, location.id, own_id) {
            stats.source_locations.dropped += 1;
        }
    }

    let mut batch = Vec::with_capacity(OCCURRENCE_BATCH_SIZE);
    for occurrence in injected.occurrences() {
        stats.occurrences.offered += 1;
        let mapped = (
            element_ids.get(&occurrence.element_id),
            location_ids.get(&occurrence.source_location_id),
        );
        let (Some(&element_id), Some(&location_id)) = mapped else {
            stats.occurrences.dropped += 1;
            continue;
        };
        batch.push(Occurrence::new(element_id, location_id));
        if batch.len() == OCCURRENCE_BATCH_SIZE {
            storage.add_occurrences(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        storage.add_occurrences(&batch)?;
    }

    for access in injected.component_accesses() {
        stats.component_accesses.offered += 1;
        match element_ids.get(&access.node_id) {
            Some(&node_id) => {
                storage.add_component_access(&ComponentAccess::new(node_id, access.kind))?
            }
            None => stats.component_accesses.dropped += 1,
        }
    }

    for comment in injected.comment_locations() {
        stats.comment_locations.offered += 1;
        match element_ids.get(&comment.file_id) {
            Some(&file_id) => {
                let mut own = *comment;
                own.file_id = file_id;
                storage.add_comment_location(&own)?;
            }
            None => stats.comment_locations.dropped += 1,
        }
    }

    Ok(stats)
}

/// Record `injected → own` unless the destination did not store the record.
fn remember(map: &mut HashMap<Id, Id>, injected: Id, own: Id) -> bool {
    if own.is_valid() {
        map.insert(injected, own);
        true
    } else {
        false
    }
}

// ============================================================================
// Injection Stats
// ============================================================================

/// How many records of one type a merge saw, and how many it dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub offered: usize,
    pub dropped: usize,
}

impl RecordStats {
    /// Records that reached the destination (new or deduplicated).
    pub fn kept(&self) -> usize {
        self.offered - self.dropped
    }

    fn absorb(&mut self, other: RecordStats) {
        self.offered += other.offered;
        self.dropped += other.dropped;
    }
}

/// Per-record-type counts for one or more merges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionStats {
    pub errors: RecordStats,
    pub nodes: RecordStats,
    pub files: RecordStats,
    pub symbols: RecordStats,
    pub edges: RecordStats,
    pub local_symbols: RecordStats,
    pub source_locations: RecordStats,
    pub occurrences: RecordStats,
    pub component_accesses: RecordStats,
    pub comment_locations: RecordStats,
}

impl InjectionStats {
    /// Total number of records dropped for a missing reference.
    pub fn dropped(&self) -> usize {
        self.all().iter().map(|stats| stats.dropped).sum()
    }

    /// Add another merge's counts to these.
    pub fn absorb(&mut self, other: &InjectionStats) {
        self.errors.absorb(other.errors);
        self.nodes.absorb(other.nodes);
        self.files.absorb(other.files);
        self.symbols.absorb(other.symbols);
        self.edges.absorb(other.edges);
        self.local_symbols.absorb(other.local_symbols);
        self.source_locations.absorb(other.source_locations);
        self.occurrences.absorb(other.occurrences);
        self.component_accesses.absorb(other.component_accesses);
        self.comment_locations.absorb(other.comment_locations);
    }

    fn all(&self) -> [RecordStats; 10] {
        [
            self.errors,
            self.nodes,
            self.files,
            self.symbols,
            self.edges,
            self.local_symbols,
            self.source_locations,
            self.occurrences,
            self.component_accesses,
            self.comment_locations,
        ]
    }
}

// ============================================================================
// Locked Storage
// ============================================================================

/// A storage shared between threads behind one coarse-grained lock.
///
/// `inject` holds the lock for the whole multi-phase merge; `read` and
/// `write` hold it for one logical operation.
#[derive(Debug, Default)]
pub struct LockedStorage<S> {
    inner: Mutex<S>,
}

impl<S> LockedStorage<S> {
    pub fn new(storage: S) -> Self {
        LockedStorage {
            inner: Mutex::new(storage),
        }
    }

    /// Run `f` with shared access to the storage.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with exclusive access to the storage.
    pub fn write<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    // A panic in another holder leaves the storage consistent at the last
    // completed statement, so the guard is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Storage> LockedStorage<S> {
    /// Merge `injected` while holding the lock across every phase.
    pub fn inject(&self, injected: &IntermediateStorage) -> StorageResult<InjectionStats> {
        let mut guard = self.lock();
        guard.inject(injected)
    }
}

// ============================================================================
// Tests
// ============================================================================
