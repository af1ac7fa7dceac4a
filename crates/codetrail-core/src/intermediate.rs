//! In-memory, write-optimized accumulator of index facts.
//!
//! An [`IntermediateStorage`] is filled by exactly one producer (an indexer
//! worker) or one merge step. It owns a sequential id space starting at 1 and
//! deduplicates every record by its identity key as it is added, so adding
//! the same fact twice returns the same [`Id`] and stores it once.
//!
//! Storages travel between processes (or are kept on disk between runs) as a
//! [`StorageSnapshot`], which restores ids verbatim and moves the id cursor
//! past every stored id.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::storage::Storage;
use crate::types::{
    AccessKind, CommentLocation, ComponentAccess, Edge, EdgeKey, ErrorKey, ErrorRecord, File, Id,
    LocalSymbol, LocationKind, Node, NodeKind, Occurrence, SourceLocation, SourceLocationKey,
    Symbol,
};

/// Deduplicating in-memory index storage for one producer or merge result.
///
/// Not internally synchronized: it is owned by exactly one holder at a time
/// and handed over whole (see [`StorageProvider`](crate::provider::StorageProvider)).
#[derive(Debug, Clone)]
pub struct IntermediateStorage {
    next_id: u64,

    // Primary storage (insertion order)
    nodes: Vec<Node>,
    files: Vec<File>,
    symbols: Vec<Symbol>,
    edges: Vec<Edge>,
    local_symbols: Vec<LocalSymbol>,
    source_locations: Vec<SourceLocation>,
    errors: Vec<ErrorRecord>,

    // Primary storage (sorted, deduplicated by value)
    occurrences: BTreeSet<Occurrence>,
    comment_locations: BTreeSet<CommentLocation>,
    /// node_id → access kind; the first reported kind wins.
    component_accesses: BTreeMap<Id, AccessKind>,

    // Identity indexes
    /// serialized name → index into `nodes`.
    node_by_name: HashMap<String, usize>,
    /// node id → index into `nodes`.
    node_by_id: HashMap<Id, usize>,
    /// file (node) id → index into `files`.
    file_by_id: HashMap<Id, usize>,
    symbol_ids: HashSet<Id>,
    /// edge key → index into `edges`.
    edge_by_key: HashMap<EdgeKey, usize>,
    local_symbol_by_name: HashMap<String, Id>,
    source_location_by_key: HashMap<SourceLocationKey, Id>,
    /// error key → index into `errors`.
    error_by_key: HashMap<ErrorKey, usize>,
}

impl Default for IntermediateStorage {
    fn default() -> Self {
        IntermediateStorage::new()
    }
}

impl IntermediateStorage {
    /// Create an empty storage whose first allocated id is 1.
    pub fn new() -> Self {
        IntermediateStorage {
            next_id: 1,
            nodes: Vec::new(),
            files: Vec::new(),
            symbols: Vec::new(),
            edges: Vec::new(),
            local_symbols: Vec::new(),
            source_locations: Vec::new(),
            errors: Vec::new(),
            occurrences: BTreeSet::new(),
            comment_locations: BTreeSet::new(),
            component_accesses: BTreeMap::new(),
            node_by_name: HashMap::new(),
            node_by_id: HashMap::new(),
            file_by_id: HashMap::new(),
            symbol_ids: HashSet::new(),
            edge_by_key: HashMap::new(),
            local_symbol_by_name: HashMap::new(),
            source_location_by_key: HashMap::new(),
            error_by_key: HashMap::new(),
        }
    }

    /// Remove every record and reset the id cursor to 1.
    pub fn clear(&mut self) {
        *self = IntermediateStorage::new();
    }

    // ========================================================================
    // ID Generation
    // ========================================================================

    /// The id the next new record will receive.
    pub fn next_id(&self) -> Id {
        Id(self.next_id)
    }

    /// Move the id cursor, e.g. after restoring records with known ids.
    ///
    /// The cursor stays within `1..=Id::MAX + 1`; at `Id::MAX + 1` the id
    /// space is exhausted and new records are not stored.
    pub fn set_next_id(&mut self, id: Id) {
        self.next_id = id.get().clamp(1, Id::MAX.get() + 1);
    }

    fn allocate_id(&mut self) -> Option<Id> {
        if self.next_id > Id::MAX.get() {
            return None;
        }
        let id = Id(self.next_id);
        self.next_id += 1;
        Some(id)
    }

    // ========================================================================
    // Insert Operations
    // ========================================================================

    /// Add a node, or return the id of the node with the same serialized name.
    ///
    /// A repeated name with a higher [`NodeKind`] upgrades the stored kind.
    pub fn add_node(&mut self, node: &Node) -> Id {
        if let Some(&index) = self.node_by_name.get(&node.serialized_name) {
            let stored = &mut self.nodes[index];
            if stored.kind < node.kind {
                stored.kind = node.kind;
            }
            return stored.id;
        }

        let Some(id) = self.allocate_id() else {
            return Id::NONE;
        };
        self.push_node(node.clone().with_id(id));
        id
    }

    /// Add several nodes, returning their ids in input order.
    pub fn add_nodes(&mut self, nodes: &[Node]) -> Vec<Id> {
        nodes.iter().map(|node| self.add_node(node)).collect()
    }

    /// Raise the kind of an existing node. Lower kinds are ignored.
    pub fn set_node_kind(&mut self, id: Id, kind: NodeKind) {
        if let Some(&index) = self.node_by_id.get(&id) {
            let stored = &mut self.nodes[index];
            if stored.kind < kind {
                stored.kind = kind;
            }
        }
    }

    /// Add a file record for the node `file.id`.
    ///
    /// A second record for the same node is merged into the first (see
    /// [`File::merge_from`]).
    pub fn add_file(&mut self, file: &File) {
        if !file.id.is_valid() {
            return;
        }
        if let Some(&index) = self.file_by_id.get(&file.id) {
            self.files[index].merge_from(file);
            return;
        }
        self.push_file(file.clone());
    }

    /// Set the language identifier of an existing file.
    pub fn set_file_language(&mut self, id: Id, language: &str) {
        if let Some(&index) = self.file_by_id.get(&id) {
            self.files[index].language = language.to_string();
        }
    }

    /// Add a symbol marker. The first marker for a node wins.
    pub fn add_symbol(&mut self, symbol: &Symbol) {
        if symbol.id.is_valid() && self.symbol_ids.insert(symbol.id) {
            self.symbols.push(*symbol);
        }
    }

    /// Add an edge, or return the id of the edge with the same key.
    pub fn add_edge(&mut self, edge: &Edge) -> Id {
        let key = edge.key();
        if let Some(&index) = self.edge_by_key.get(&key) {
            return self.edges[index].id;
        }

        let Some(id) = self.allocate_id() else {
            return Id::NONE;
        };
        self.push_edge(edge.with_id(id));
        id
    }

    /// Add a local symbol, or return the id of the one with the same name.
    pub fn add_local_symbol(&mut self, symbol: &LocalSymbol) -> Id {
        if let Some(&id) = self.local_symbol_by_name.get(&symbol.name) {
            return id;
        }

        let Some(id) = self.allocate_id() else {
            return Id::NONE;
        };
        self.push_local_symbol(symbol.clone().with_id(id));
        id
    }

    /// Add a source location, or return the id of the one with the same key.
    pub fn add_source_location(&mut self, location: &SourceLocation) -> Id {
        if let Some(&id) = self.source_location_by_key.get(&location.key()) {
            return id;
        }

        let Some(id) = self.allocate_id() else {
            return Id::NONE;
        };
        self.push_source_location(location.with_id(id));
        id
    }

    pub fn add_occurrence(&mut self, occurrence: Occurrence) {
        self.occurrences.insert(occurrence);
    }

    pub fn add_occurrences(&mut self, occurrences: &[Occurrence]) {
        self.occurrences.extend(occurrences.iter().copied());
    }

    /// Add an access level. The first access level for a node wins.
    pub fn add_component_access(&mut self, access: ComponentAccess) {
        if access.node_id.is_valid() {
            self.component_accesses
                .entry(access.node_id)
                .or_insert(access.kind);
        }
    }

    pub fn add_comment_location(&mut self, location: CommentLocation) {
        self.comment_locations.insert(location);
    }

    /// Add an error, or return the id of the error with the same key.
    pub fn add_error(&mut self, error: &ErrorRecord) -> Id {
        if let Some(&index) = self.error_by_key.get(&error.key()) {
            return self.errors[index].id;
        }

        let Some(id) = self.allocate_id() else {
            return Id::NONE;
        };
        self.push_error(error.clone().with_id(id));
        id
    }

    // Raw inserts: the record already carries its final id and the caller
    // has checked that its identity key is new.

    fn push_node(&mut self, node: Node) {
        let index = self.nodes.len();
        self.node_by_name.insert(node.serialized_name.clone(), index);
        self.node_by_id.insert(node.id, index);
        self.nodes.push(node);
    }

    fn push_file(&mut self, file: File) {
        self.file_by_id.insert(file.id, self.files.len());
        self.files.push(file);
    }

    fn push_edge(&mut self, edge: Edge) {
        self.edge_by_key.insert(edge.key(), self.edges.len());
        self.edges.push(edge);
    }

    fn push_local_symbol(&mut self, symbol: LocalSymbol) {
        self.local_symbol_by_name
            .insert(symbol.name.clone(), symbol.id);
        self.local_symbols.push(symbol);
    }

    fn push_source_location(&mut self, location: SourceLocation) {
        self.source_location_by_key
            .insert(location.key(), location.id);
        self.source_locations.push(location);
    }

    fn push_error(&mut self, error: ErrorRecord) {
        self.error_by_key.insert(error.key(), self.errors.len());
        self.errors.push(error);
    }

    // ========================================================================
    // Bulk Flag Updates
    // ========================================================================

    /// Mark every file incomplete (the run producing them was interrupted).
    pub fn set_all_files_incomplete(&mut self) {
        for file in &mut self.files {
            file.complete = false;
        }
    }

    /// Mark files that produced errors incomplete.
    ///
    /// A file counts as erroneous when an error-kind source location points
    /// into it or an error record names its path.
    pub fn set_files_with_errors_incomplete(&mut self) {
        let error_file_ids: HashSet<Id> = self
            .source_locations
            .iter()
            .filter(|location| location.kind == LocationKind::Error)
            .map(|location| location.file_id)
            .collect();
        let error_paths: HashSet<&str> = self
            .errors
            .iter()
            .map(|error| error.file_path.as_str())
            .filter(|path| !path.is_empty())
            .collect();

        for file in &mut self.files {
            if error_file_ids.contains(&file.id) || error_paths.contains(file.path.as_str()) {
                file.complete = false;
            }
        }
    }

    // ========================================================================
    // Query Operations
    // ========================================================================

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn local_symbols(&self) -> impl Iterator<Item = &LocalSymbol> {
        self.local_symbols.iter()
    }

    pub fn source_locations(&self) -> impl Iterator<Item = &SourceLocation> {
        self.source_locations.iter()
    }

    pub fn occurrences(&self) -> impl Iterator<Item = &Occurrence> {
        self.occurrences.iter()
    }

    pub fn component_accesses(&self) -> impl Iterator<Item = ComponentAccess> + '_ {
        self.component_accesses
            .iter()
            .map(|(&node_id, &kind)| ComponentAccess::new(node_id, kind))
    }

    pub fn comment_locations(&self) -> impl Iterator<Item = &CommentLocation> {
        self.comment_locations.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    /// Look up a node by its serialized name.
    pub fn node_by_name(&self, serialized_name: &str) -> Option<&Node> {
        self.node_by_name
            .get(serialized_name)
            .map(|&index| &self.nodes[index])
    }

    /// Look up a node by id.
    pub fn node(&self, id: Id) -> Option<&Node> {
        self.node_by_id.get(&id).map(|&index| &self.nodes[index])
    }

    /// Look up a file by its node id.
    pub fn file(&self, id: Id) -> Option<&File> {
        self.file_by_id.get(&id).map(|&index| &self.files[index])
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|error| error.fatal)
    }

    // ========================================================================
    // Counts
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn local_symbol_count(&self) -> usize {
        self.local_symbols.len()
    }

    /// Size proxy used to order pending storages.
    pub fn source_location_count(&self) -> usize {
        self.source_locations.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.occurrences.len()
    }

    pub fn component_access_count(&self) -> usize {
        self.component_accesses.len()
    }

    pub fn comment_location_count(&self) -> usize {
        self.comment_locations.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.files.is_empty()
            && self.symbols.is_empty()
            && self.edges.is_empty()
            && self.local_symbols.is_empty()
            && self.source_locations.is_empty()
            && self.occurrences.is_empty()
            && self.component_accesses.is_empty()
            && self.comment_locations.is_empty()
            && self.errors.is_empty()
    }

    /// Approximate memory footprint, used only to rank storages.
    ///
    /// Each record contributes its fixed size; each owned string contributes
    /// `string_size` (per-string overhead) plus its length.
    pub fn get_byte_size(&self, string_size: usize) -> usize {
        let mut byte_size = 0;

        for file in &self.files {
            byte_size += size_of::<File>();
            byte_size += string_size + file.path.len();
            byte_size += string_size + file.language.len();
            byte_size += string_size + file.modification_time.len();
        }
        for error in &self.errors {
            byte_size += size_of::<ErrorRecord>();
            byte_size += string_size + error.message.len();
            byte_size += string_size + error.file_path.len();
            byte_size += string_size + error.translation_unit.len();
        }
        for node in &self.nodes {
            byte_size += size_of::<Node>();
            byte_size += string_size + node.serialized_name.len();
        }
        for symbol in &self.local_symbols {
            byte_size += size_of::<LocalSymbol>();
            byte_size += string_size + symbol.name.len();
        }

        byte_size += size_of::<Edge>() * self.edges.len();
        byte_size += size_of::<ComponentAccess>() * self.component_accesses.len();
        byte_size += size_of::<Occurrence>() * self.occurrences.len();
        byte_size += size_of::<Symbol>() * self.symbols.len();
        byte_size += size_of::<SourceLocation>() * self.source_locations.len();
        byte_size += size_of::<CommentLocation>() * self.comment_locations.len();

        byte_size
    }

    // ========================================================================
    // Serialized Form
    // ========================================================================

    /// Copy every record into a serializable snapshot.
    pub fn to_snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            next_id: self.next_id,
            nodes: self.nodes.clone(),
            files: self.files.clone(),
            symbols: self.symbols.clone(),
            edges: self.edges.clone(),
            local_symbols: self.local_symbols.clone(),
            source_locations: self.source_locations.clone(),
            occurrences: self.occurrences.iter().copied().collect(),
            component_accesses: self.component_accesses().collect(),
            comment_locations: self.comment_locations.iter().copied().collect(),
            errors: self.errors.clone(),
        }
    }

    /// Rebuild a storage from a snapshot, keeping every record's id.
    ///
    /// The id cursor ends up past every restored id, so later additions never
    /// collide with restored records.
    pub fn from_snapshot(snapshot: StorageSnapshot) -> StorageResult<Self> {
        let mut storage = IntermediateStorage::new();
        let mut element_ids = HashSet::new();
        let mut location_ids = HashSet::new();
        let mut max_id = 0;

        for node in snapshot.nodes {
            claim_id(&mut element_ids, &mut max_id, node.id, "node")?;
            if storage.node_by_name.contains_key(&node.serialized_name) {
                return Err(duplicate_key("node name", &node.serialized_name));
            }
            storage.push_node(node);
        }
        for edge in snapshot.edges {
            claim_id(&mut element_ids, &mut max_id, edge.id, "edge")?;
            if storage.edge_by_key.contains_key(&edge.key()) {
                return Err(duplicate_key("edge", &edge.id));
            }
            storage.push_edge(edge);
        }
        for symbol in snapshot.local_symbols {
            claim_id(&mut element_ids, &mut max_id, symbol.id, "local symbol")?;
            if storage.local_symbol_by_name.contains_key(&symbol.name) {
                return Err(duplicate_key("local symbol name", &symbol.name));
            }
            storage.push_local_symbol(symbol);
        }
        for error in snapshot.errors {
            claim_id(&mut element_ids, &mut max_id, error.id, "error")?;
            if storage.error_by_key.contains_key(&error.key()) {
                return Err(duplicate_key("error", &error.id));
            }
            storage.push_error(error);
        }
        for location in snapshot.source_locations {
            claim_id(&mut location_ids, &mut max_id, location.id, "source location")?;
            if storage.source_location_by_key.contains_key(&location.key()) {
                return Err(duplicate_key("source location", &location.id));
            }
            storage.push_source_location(location);
        }
        for file in snapshot.files {
            if !file.id.is_valid() || storage.file_by_id.contains_key(&file.id) {
                return Err(duplicate_key("file", &file.id));
            }
            storage.push_file(file);
        }
        for symbol in snapshot.symbols {
            if !symbol.id.is_valid() || storage.symbol_ids.contains(&symbol.id) {
                return Err(duplicate_key("symbol", &symbol.id));
            }
            storage.add_symbol(&symbol);
        }
        storage.add_occurrences(&snapshot.occurrences);
        for access in snapshot.component_accesses {
            storage.add_component_access(access);
        }
        for location in snapshot.comment_locations {
            storage.add_comment_location(location);
        }

        // Claimed ids are at most Id::MAX, so the increment cannot overflow.
        let cursor = snapshot.next_id.max(max_id + 1);
        if cursor > Id::MAX.get() {
            return Err(StorageError::InvalidSnapshot {
                reason: format!("no ids left to allocate after {}", Id(cursor - 1)),
            });
        }
        storage.set_next_id(Id(cursor));
        Ok(storage)
    }

    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    pub fn from_json(json: &str) -> StorageResult<Self> {
        let snapshot: StorageSnapshot = serde_json::from_str(json)?;
        IntermediateStorage::from_snapshot(snapshot)
    }
}

fn claim_id(seen: &mut HashSet<Id>, max_id: &mut u64, id: Id, what: &str) -> StorageResult<()> {
    if !id.is_valid() {
        return Err(StorageError::InvalidSnapshot {
            reason: format!("{} without id", what),
        });
    }
    if id > Id::MAX {
        return Err(StorageError::InvalidSnapshot {
            reason: format!("{} id {} is out of range", what, id),
        });
    }
    if !seen.insert(id) {
        return Err(StorageError::InvalidSnapshot {
            reason: format!("{} reuses id {}", what, id),
        });
    }
    *max_id = (*max_id).max(id.get());
    Ok(())
}

fn duplicate_key(what: &str, key: &dyn std::fmt::Display) -> StorageError {
    StorageError::InvalidSnapshot {
        reason: format!("duplicate {} {}", what, key),
    }
}

/// Serialized form of an [`IntermediateStorage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub local_symbols: Vec<LocalSymbol>,
    #[serde(default)]
    pub source_locations: Vec<SourceLocation>,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,
    #[serde(default)]
    pub component_accesses: Vec<ComponentAccess>,
    #[serde(default)]
    pub comment_locations: Vec<CommentLocation>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

// ============================================================================
// Storage Implementation
// ============================================================================

impl Storage for IntermediateStorage {
    fn add_node(&mut self, node: &Node) -> StorageResult<Id> {
        Ok(IntermediateStorage::add_node(self, node))
    }

    fn add_file(&mut self, file: &File) -> StorageResult<()> {
        IntermediateStorage::add_file(self, file);
        Ok(())
    }

    fn add_symbol(&mut self, symbol: &Symbol) -> StorageResult<()> {
        IntermediateStorage::add_symbol(self, symbol);
        Ok(())
    }

    fn add_edge(&mut self, edge: &Edge) -> StorageResult<Id> {
        Ok(IntermediateStorage::add_edge(self, edge))
    }

    fn add_local_symbol(&mut self, symbol: &LocalSymbol) -> StorageResult<Id> {
        Ok(IntermediateStorage::add_local_symbol(self, symbol))
    }

    fn add_source_location(&mut self, location: &SourceLocation) -> StorageResult<Id> {
        Ok(IntermediateStorage::add_source_location(self, location))
    }

    fn add_occurrences(&mut self, occurrences: &[Occurrence]) -> StorageResult<()> {
        IntermediateStorage::add_occurrences(self, occurrences);
        Ok(())
    }

    fn add_component_access(&mut self, access: &ComponentAccess) -> StorageResult<()> {
        IntermediateStorage::add_component_access(self, *access);
        Ok(())
    }

    fn add_comment_location(&mut self, location: &CommentLocation) -> StorageResult<()> {
        IntermediateStorage::add_comment_location(self, *location);
        Ok(())
    }

    fn add_error(&mut self, error: &ErrorRecord) -> StorageResult<Id> {
        Ok(IntermediateStorage::add_error(self, error))
    }
}

// ============================================================================
// Tests
// ============================================================================
