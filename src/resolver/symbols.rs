//! Per-pass snapshot of the graph's nodes, indexed for resolution lookups.

use crate::types::{Node, NodeId, NodeKind};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// What the resolver needs to know about a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub file: PathBuf,
    /// Enclosing class/interface for members.
    pub owner: Option<String>,
}

impl Symbol {
    fn file_stem(&self) -> Option<&str> {
        self.file.file_stem().and_then(|s| s.to_str())
    }

    /// Whether a receiver hint names this symbol's owner or module.
    pub fn matches_hint(&self, hint: &str) -> bool {
        self.owner.as_deref() == Some(hint) || self.file_stem() == Some(hint)
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Sorted by id.
    symbols: Vec<Symbol>,
    by_name: HashMap<String, Vec<usize>>,
    by_file: HashMap<PathBuf, Vec<usize>>,
    modules: HashMap<PathBuf, usize>,
    files: BTreeSet<PathBuf>,
}

impl SymbolTable {
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut symbols: Vec<Symbol> = nodes
            .into_iter()
            .map(|node| Symbol {
                owner: node.metadata.owner().map(str::to_string),
                id: node.id,
                kind: node.kind,
                name: node.name,
                file: node.file,
            })
            .collect();
        symbols.sort_by(|a, b| a.id.cmp(&b.id));
        symbols.dedup_by(|a, b| a.id == b.id);

        let mut table = Self::default();
        for (i, symbol) in symbols.iter().enumerate() {
            table.by_name.entry(symbol.name.clone()).or_default().push(i);
            table.by_file.entry(symbol.file.clone()).or_default().push(i);
            if symbol.kind == NodeKind::Module {
                table.modules.entry(symbol.file.clone()).or_insert(i);
            }
            table.files.insert(symbol.file.clone());
        }
        table.symbols = symbols;
        table
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Symbol> {
        self.symbols
            .binary_search_by(|s| s.id.cmp(id))
            .ok()
            .map(|i| &self.symbols[i])
    }

    pub fn is_known_file(&self, file: &Path) -> bool {
        self.files.contains(file)
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn module_of(&self, file: &Path) -> Option<&Symbol> {
        self.modules.get(file).map(|&i| &self.symbols[i])
    }

    /// Symbols in `file` named `name` whose kind satisfies `kind`.
    pub fn in_file(&self, file: &Path, name: &str, kind: NodeKind) -> Vec<&Symbol> {
        self.by_file
            .get(file)
            .into_iter()
            .flatten()
            .map(|&i| &self.symbols[i])
            .filter(|s| s.name == name && s.kind.satisfies(kind))
            .collect()
    }

    /// Whether `file` declares anything called `name`.
    pub fn declares(&self, file: &Path, name: &str) -> bool {
        self.by_file
            .get(file)
            .into_iter()
            .flatten()
            .any(|&i| self.symbols[i].name == name && self.symbols[i].kind != NodeKind::Module)
    }

    /// All symbols named `name` whose kind satisfies `kind`.
    pub fn global(&self, name: &str, kind: NodeKind) -> Vec<&Symbol> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|&i| &self.symbols[i])
            .filter(|s| s.kind.satisfies(kind))
            .collect()
    }
}

/// Keep candidates matching `hint`. Returns the input unchanged when the
/// hint matches none of them.
pub fn narrow_by_hint<'a>(candidates: Vec<&'a Symbol>, hint: Option<&str>) -> Vec<&'a Symbol> {
    let Some(hint) = hint else {
        return candidates;
    };
    let narrowed: Vec<&Symbol> = candidates
        .iter()
        .copied()
        .filter(|s| s.matches_hint(hint))
        .collect();
    if narrowed.is_empty() { candidates } else { narrowed }
}
