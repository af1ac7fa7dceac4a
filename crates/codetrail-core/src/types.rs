//! Index record types and their identity keys.
//!
//! These are plain value structures. Every record that can be referenced by
//! another record carries a storage-local [`Id`]; the same integer value in
//! two different storages may name two unrelated entities.
//!
//! Identity keys ([`EdgeKey`], [`SourceLocationKey`], [`ErrorKey`], and the
//! serialized name of a [`Node`]) decide when two records describe the same
//! fact and must be stored once.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Storage-local identifier. `Id::NONE` (0) means absent or not stored.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
    /// The absent id.
    pub const NONE: Id = Id(0);

    /// The highest id an index can hold (SQLite rowids are signed 64-bit).
    pub const MAX: Id = Id(i64::MAX as u64);

    /// Create a new id.
    pub fn new(id: u64) -> Self {
        Id(id)
    }

    /// True for every id except [`Id::NONE`].
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Raw integer value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Kinds
// ============================================================================

/// Declares a kind enum with a stable integer code per variant.
///
/// Variant order defines `Ord`, so variants are listed by ascending code.
macro_rules! coded_kind {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in code order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Stable integer code used for persistence.
            pub fn code(self) -> i64 {
                match self {
                    $( $name::$variant => $code, )+
                }
            }

            /// Inverse of [`Self::code`].
            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

coded_kind! {
    /// Kind of a named code entity.
    ///
    /// A more specific kind compares greater than a less specific one; when the
    /// same serialized name is reported with two kinds the greater one is kept.
    pub enum NodeKind {
        /// Unresolved or not yet classified symbol.
        Symbol = 1,
        Type = 2,
        BuiltinType = 4,
        Module = 8,
        Namespace = 16,
        Package = 32,
        Struct = 64,
        Class = 128,
        Interface = 256,
        Annotation = 512,
        GlobalVariable = 1024,
        Field = 2048,
        Function = 4096,
        Method = 8192,
        Enum = 16384,
        EnumConstant = 32768,
        Typedef = 65536,
        TypeParameter = 131072,
        File = 262144,
        Macro = 524288,
        Union = 1048576,
    }
}

coded_kind! {
    /// Kind of a directed relation between two nodes.
    pub enum EdgeKind {
        Member = 1,
        TypeUsage = 2,
        Usage = 4,
        Call = 8,
        Inheritance = 16,
        Override = 32,
        TypeArgument = 64,
        TemplateSpecialization = 128,
        Include = 256,
        Import = 512,
        MacroUsage = 1024,
        AnnotationUsage = 2048,
    }
}

coded_kind! {
    /// How a symbol was defined.
    pub enum DefinitionKind {
        None = 0,
        Implicit = 1,
        Explicit = 2,
    }
}

coded_kind! {
    /// What a source location marks.
    pub enum LocationKind {
        Token = 0,
        Scope = 1,
        Qualifier = 2,
        LocalSymbol = 3,
        Signature = 4,
        Comment = 5,
        Error = 6,
        Unsolved = 7,
    }
}

coded_kind! {
    /// Access level of a member.
    pub enum AccessKind {
        None = 0,
        Public = 1,
        Protected = 2,
        Private = 3,
        Default = 4,
        TemplateParameter = 5,
        TypeParameter = 6,
    }
}

// ============================================================================
// Records
// ============================================================================

/// A named code entity. Identity: `serialized_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub kind: NodeKind,
    pub serialized_name: String,
}

impl Node {
    /// Create a node that has not been stored yet.
    pub fn new(kind: NodeKind, serialized_name: impl Into<String>) -> Self {
        Node {
            id: Id::NONE,
            kind,
            serialized_name: serialized_name.into(),
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }
}

/// A source file. Its `id` is the id of the file's [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: Id,
    pub path: String,
    /// Language identifier of the indexer that produced the file ("cpp", "java", ...).
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub modification_time: String,
    pub indexed: bool,
    pub complete: bool,
    #[serde(default)]
    pub line_count: u32,
}

impl File {
    /// Create an indexed, complete file record owned by node `id`.
    pub fn new(id: Id, path: impl Into<String>) -> Self {
        File {
            id,
            path: path.into(),
            language: String::new(),
            modification_time: String::new(),
            indexed: true,
            complete: true,
            line_count: 0,
        }
    }

    /// Set the language identifier.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the modification time stamp.
    pub fn with_modification_time(mut self, time: SystemTime) -> Self {
        self.modification_time = format_modification_time(time);
        self
    }

    /// Set the indexed and complete flags.
    pub fn with_flags(mut self, indexed: bool, complete: bool) -> Self {
        self.indexed = indexed;
        self.complete = complete;
        self
    }

    /// Set the line count.
    pub fn with_line_count(mut self, line_count: u32) -> Self {
        self.line_count = line_count;
        self
    }

    /// Fold a re-reported record for the same file into this one.
    ///
    /// Flags only move towards `true`. A non-empty language or modification
    /// time replaces the stored one, and the larger line count wins.
    pub fn merge_from(&mut self, other: &File) {
        self.indexed |= other.indexed;
        self.complete |= other.complete;
        if !other.language.is_empty() {
            self.language = other.language.clone();
        }
        if !other.modification_time.is_empty() {
            self.modification_time = other.modification_time.clone();
        }
        self.line_count = self.line_count.max(other.line_count);
    }
}

/// Definition marker attached 1:1 to a node. Identity: `id` (the node id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub id: Id,
    pub definition_kind: DefinitionKind,
}

impl Symbol {
    pub fn new(id: Id, definition_kind: DefinitionKind) -> Self {
        Symbol {
            id,
            definition_kind,
        }
    }
}

/// A typed, directed relation between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub kind: EdgeKind,
    pub source_id: Id,
    pub target_id: Id,
}

impl Edge {
    /// Create an edge that has not been stored yet.
    pub fn new(kind: EdgeKind, source_id: Id, target_id: Id) -> Self {
        Edge {
            id: Id::NONE,
            kind,
            source_id,
            target_id,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            kind: self.kind,
            source_id: self.source_id,
            target_id: self.target_id,
        }
    }
}

/// Identity of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub kind: EdgeKind,
    pub source_id: Id,
    pub target_id: Id,
}

/// A function-local entity such as a local variable. Identity: `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalSymbol {
    pub id: Id,
    pub name: String,
}

impl LocalSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        LocalSymbol {
            id: Id::NONE,
            name: name.into(),
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }
}

/// A range inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub id: Id,
    pub file_id: Id,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub kind: LocationKind,
}

impl SourceLocation {
    /// Create a location that has not been stored yet.
    pub fn new(
        file_id: Id,
        start: (u32, u32),
        end: (u32, u32),
        kind: LocationKind,
    ) -> Self {
        SourceLocation {
            id: Id::NONE,
            file_id,
            start_line: start.0,
            start_column: start.1,
            end_line: end.0,
            end_column: end.1,
            kind,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn key(&self) -> SourceLocationKey {
        SourceLocationKey {
            file_id: self.file_id,
            start_line: self.start_line,
            start_column: self.start_column,
            end_line: self.end_line,
            end_column: self.end_column,
            kind: self.kind,
        }
    }
}

/// Identity of a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocationKey {
    pub file_id: Id,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub kind: LocationKind,
}

/// Links an element (node, edge, local symbol or error) to a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Occurrence {
    pub element_id: Id,
    pub source_location_id: Id,
}

impl Occurrence {
    pub fn new(element_id: Id, source_location_id: Id) -> Self {
        Occurrence {
            element_id,
            source_location_id,
        }
    }
}

/// Access level of a member node. Identity: `node_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentAccess {
    pub node_id: Id,
    pub kind: AccessKind,
}

impl ComponentAccess {
    pub fn new(node_id: Id, kind: AccessKind) -> Self {
        ComponentAccess { node_id, kind }
    }
}

/// A comment range inside a file. Identity: the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentLocation {
    pub file_id: Id,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl CommentLocation {
    pub fn new(file_id: Id, start: (u32, u32), end: (u32, u32)) -> Self {
        CommentLocation {
            file_id,
            start_line: start.0,
            start_column: start.1,
            end_line: end.0,
            end_column: end.1,
        }
    }
}

/// An error reported while indexing a translation unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Id,
    pub message: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub translation_unit: String,
    pub fatal: bool,
    pub indexed: bool,
}

impl ErrorRecord {
    /// Create a non-fatal error for `translation_unit`.
    pub fn new(message: impl Into<String>, translation_unit: impl Into<String>) -> Self {
        ErrorRecord {
            id: Id::NONE,
            message: message.into(),
            file_path: String::new(),
            line: 0,
            column: 0,
            translation_unit: translation_unit.into(),
            fatal: false,
            indexed: true,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    /// Set where the error was reported.
    pub fn with_location(mut self, file_path: impl Into<String>, line: u32, column: u32) -> Self {
        self.file_path = file_path.into();
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn with_indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn key(&self) -> ErrorKey {
        ErrorKey {
            message: self.message.clone(),
            file_path: self.file_path.clone(),
            line: self.line,
            column: self.column,
            translation_unit: self.translation_unit.clone(),
            fatal: self.fatal,
        }
    }
}

/// Identity of an error record. The `indexed` flag is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorKey {
    pub message: String,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub translation_unit: String,
    pub fatal: bool,
}

// ============================================================================
// Helpers
// ============================================================================

/// Format a file modification time (UTC, second precision).
pub fn format_modification_time(time: SystemTime) -> String {
    use chrono::{DateTime, Utc};

    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

// ============================================================================
// Tests
// ============================================================================
