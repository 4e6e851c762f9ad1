//! Core types for the code index.
//!
//! This module defines the data model shared by every stage of the pipeline:
//! - Graph nodes (code entities) and their typed metadata
//! - Pending (symbolic) edges produced by parsers
//! - Resolved edges persisted to the graph store
//! - Import/export declarations consumed by the resolver

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable identifier for a node, derived from `(file, kind, name, line)`.
///
/// The id is the first 8 bytes of a SHA-256 digest rendered as hex, so the
/// same entity parsed twice (in this or another process) gets the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn derive(file: &Path, kind: NodeKind, name: &str, line: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(line.to_le_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Kind of code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Class,
    Interface,
    Module,
    Variable,
    Method,
    Property,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        Self::Function,
        Self::Class,
        Self::Interface,
        Self::Module,
        Self::Variable,
        Self::Method,
        Self::Property,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Module => "module",
            Self::Variable => "variable",
            Self::Method => "method",
            Self::Property => "property",
        }
    }

    /// Whether a node of this kind can satisfy a reference expecting `target`.
    ///
    /// Callables are interchangeable (an imported arrow function is called the
    /// same way as a method), as are type-like kinds (`implements` may name a
    /// class).
    pub fn satisfies(self, target: NodeKind) -> bool {
        self == target
            || (self.is_callable() && target.is_callable())
            || (self.is_type_like() && target.is_type_like())
    }

    pub fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }

    pub fn is_type_like(self) -> bool {
        matches!(self, Self::Class | Self::Interface)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "function" | "fn" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            "module" | "file" => Ok(Self::Module),
            "variable" | "var" | "const" => Ok(Self::Variable),
            "method" => Ok(Self::Method),
            "property" | "field" => Ok(Self::Property),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Signature information for functions and methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<String>,
    pub return_type: Option<String>,
    pub is_async: bool,
}

impl Signature {
    pub fn render(&self, name: &str) -> String {
        let mut out = String::new();
        if self.is_async {
            out.push_str("async ");
        }
        out.push_str(name);
        out.push('(');
        out.push_str(&self.params.join(", "));
        out.push(')');
        if let Some(ret) = &self.return_type {
            out.push_str(": ");
            out.push_str(ret);
        }
        out
    }
}

/// Per-kind metadata. The variant determines the node kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeMetadata {
    Function {
        signature: Signature,
        exported: bool,
    },
    Class {
        exported: bool,
        is_abstract: bool,
    },
    Interface {
        exported: bool,
    },
    Module {
        language: String,
    },
    Variable {
        exported: bool,
        is_const: bool,
    },
    Method {
        owner: String,
        signature: Signature,
        is_static: bool,
    },
    Property {
        owner: String,
        type_annotation: Option<String>,
    },
}

impl NodeMetadata {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Function { .. } => NodeKind::Function,
            Self::Class { .. } => NodeKind::Class,
            Self::Interface { .. } => NodeKind::Interface,
            Self::Module { .. } => NodeKind::Module,
            Self::Variable { .. } => NodeKind::Variable,
            Self::Method { .. } => NodeKind::Method,
            Self::Property { .. } => NodeKind::Property,
        }
    }

    /// Enclosing type for members.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Method { owner, .. } | Self::Property { owner, .. } => Some(owner),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::Function { signature, .. } | Self::Method { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn is_exported(&self) -> bool {
        match self {
            Self::Function { exported, .. }
            | Self::Class { exported, .. }
            | Self::Interface { exported }
            | Self::Variable { exported, .. } => *exported,
            Self::Module { .. } => true,
            Self::Method { .. } | Self::Property { .. } => false,
        }
    }
}

/// A code entity stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub file: PathBuf,
    /// 1-based line of the declaration.
    pub line: u32,
    pub column: Option<u32>,
    pub metadata: NodeMetadata,
    /// Leading documentation comment, if any.
    pub doc: Option<String>,
    pub name_embedding: Option<Vec<f32>>,
    pub summary_embedding: Option<Vec<f32>>,
}

impl Node {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, line: u32, metadata: NodeMetadata) -> Self {
        let name = name.into();
        let file = file.into();
        let kind = metadata.kind();
        Self {
            id: NodeId::derive(&file, kind, &name, line),
            kind,
            name,
            file,
            line,
            column: None,
            metadata,
            doc: None,
            name_embedding: None,
            summary_embedding: None,
        }
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn brief(&self) -> NodeBrief {
        NodeBrief {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            file: self.file.clone(),
            line: self.line,
        }
    }
}

/// Lightweight view of a node used in search results and relationship lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeBrief {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
}

// ============================================================================
// Edges
// ============================================================================

/// Relationship carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Calls,
    Imports,
    Extends,
    Implements,
    Uses,
    Returns,
    Accepts,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Uses => "uses",
            Self::Returns => "returns",
            Self::Accepts => "accepts",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution step produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ExactFile,
    ImportMap,
    SameFile,
    Global,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactFile => "exact_file",
            Self::ImportMap => "import_map",
            Self::SameFile => "same_file",
            Self::Global => "global",
        }
    }
}

/// Typed edge metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeMetadata {
    /// 1-based line of the reference site.
    pub line: u32,
    pub column: Option<u32>,
    /// Set once the edge has been resolved.
    pub resolution: Option<ResolutionStrategy>,
}

impl EdgeMetadata {
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            line,
            column: Some(column),
            resolution: None,
        }
    }
}

/// A symbolic reference awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdge {
    pub source_id: NodeId,
    pub target_name: String,
    pub target_kind: NodeKind,
    pub target_file: Option<PathBuf>,
    pub relationship: RelationshipKind,
    /// Qualifier of the reference, e.g. `Repo` in `Repo.save()`.
    pub receiver_hint: Option<String>,
    /// Raw module specifier when the reference is an import.
    pub import_source: Option<String>,
    pub metadata: EdgeMetadata,
}

impl PendingEdge {
    pub fn new(
        source_id: NodeId,
        relationship: RelationshipKind,
        target_name: impl Into<String>,
        target_kind: NodeKind,
    ) -> Self {
        Self {
            source_id,
            target_name: target_name.into(),
            target_kind,
            target_file: None,
            relationship,
            receiver_hint: None,
            import_source: None,
            metadata: EdgeMetadata::default(),
        }
    }

    pub fn with_receiver(mut self, hint: impl Into<String>) -> Self {
        self.receiver_hint = Some(hint.into());
        self
    }

    pub fn with_target_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.target_file = Some(file.into());
        self
    }

    pub fn with_import_source(mut self, source: impl Into<String>) -> Self {
        self.import_source = Some(source.into());
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.metadata = EdgeMetadata::at(line, column);
        self
    }
}

/// Identity of a resolved edge in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub relationship: RelationshipKind,
}

/// The only edge form persisted to the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEdge {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relationship: RelationshipKind,
    pub metadata: EdgeMetadata,
}

impl ResolvedEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source_id.clone(),
            target: self.target_id.clone(),
            relationship: self.relationship,
        }
    }
}

/// Direction for relationship lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// One hop from a node, as returned by `GraphStore::get_relationships`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedNode {
    pub relationship: RelationshipKind,
    /// `Outgoing` when the queried node is the edge source.
    pub direction: Direction,
    pub node: NodeBrief,
    pub metadata: EdgeMetadata,
}

// ============================================================================
// Resolution
// ============================================================================

/// Per-pass resolution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub ambiguous: usize,
}

impl ResolutionStats {
    pub fn total(&self) -> usize {
        self.resolved + self.unresolved + self.ambiguous
    }
}

// ============================================================================
// Parser Contract
// ============================================================================

/// What an import binds locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportedName {
    /// `import { foo } from` / `import { foo as bar } from`
    Named(String),
    /// `import foo from`
    Default,
    /// `import * as ns from`
    Namespace,
}

/// An import declaration in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDecl {
    /// Identifier bound in the importing file.
    pub local_name: String,
    pub imported: ImportedName,
    /// Raw module specifier (e.g. `./util`).
    pub source: String,
    /// Set when the parser already knows the defining file.
    pub resolved_file: Option<PathBuf>,
    pub line: u32,
}

/// An export declaration in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDecl {
    /// Name visible to importers (`default` for default exports, `*` for
    /// `export * from`).
    pub exported_name: String,
    /// Name of the binding inside the exporting module (or inside `source`
    /// for re-exports).
    pub local_name: String,
    /// Module specifier for re-exports.
    pub source: Option<String>,
}

impl ExportDecl {
    pub fn local(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            exported_name: name.clone(),
            local_name: name,
            source: None,
        }
    }
}

/// Output of `CodeParser::parse` for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub nodes: Vec<Node>,
    pub pending_edges: Vec<PendingEdge>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportDecl>,
}
