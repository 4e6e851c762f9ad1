//! Per-file import maps, rebuilt from scratch for every resolution pass.
//!
//! A map binds each identifier a file imports to where it is declared,
//! following re-export chains (`export { x } from`, `export * from`).

use super::symbols::SymbolTable;
use crate::buffer::PendingEdgeBuffer;
use crate::types::{ImportDecl, ImportedName};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

/// Re-export chains longer than this are not followed.
pub const MAX_REEXPORT_DEPTH: usize = 8;

/// Extensions tried when a specifier omits one, in priority order.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

/// What a local identifier refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A declaration named `name` in `file`.
    Symbol { file: PathBuf, name: String },
    /// The whole module (`import * as ns`).
    Namespace { file: PathBuf },
}

#[derive(Debug, Default)]
pub struct ImportMaps {
    maps: HashMap<PathBuf, HashMap<String, Binding>>,
    known_files: BTreeSet<PathBuf>,
}

impl ImportMaps {
    pub fn build(buffer: &PendingEdgeBuffer, symbols: &SymbolTable) -> Self {
        let mut known_files: BTreeSet<PathBuf> = buffer.entries().map(|(f, _)| f.clone()).collect();
        known_files.extend(symbols.files().cloned());

        let mut maps = Self {
            maps: HashMap::new(),
            known_files,
        };
        let builder = Builder {
            buffer,
            symbols,
            maps: &maps,
        };

        let mut built = HashMap::new();
        for (file, entry) in buffer.entries() {
            let mut map = HashMap::new();
            for import in &entry.imports {
                let mut visited = HashSet::new();
                if let Some(binding) = builder.import_binding(file, import, 0, &mut visited) {
                    map.insert(import.local_name.clone(), binding);
                }
            }
            if !map.is_empty() {
                built.insert(file.clone(), map);
            }
        }
        maps.maps = built;
        maps
    }

    pub fn binding(&self, file: &Path, local: &str) -> Option<&Binding> {
        self.maps.get(file)?.get(local)
    }

    /// Number of files with at least one binding.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn is_known_file(&self, file: &Path) -> bool {
        self.known_files.contains(file)
    }

    pub fn resolve_specifier(&self, from: &Path, specifier: &str) -> Option<PathBuf> {
        resolve_specifier(from, specifier, |p| self.is_known_file(p))
    }
}

struct Builder<'a> {
    buffer: &'a PendingEdgeBuffer,
    symbols: &'a SymbolTable,
    maps: &'a ImportMaps,
}

impl Builder<'_> {
    fn resolve(&self, from: &Path, specifier: &str) -> Option<PathBuf> {
        self.maps.resolve_specifier(from, specifier)
    }

    fn import_binding(
        &self,
        file: &Path,
        import: &ImportDecl,
        depth: usize,
        visited: &mut HashSet<(PathBuf, String)>,
    ) -> Option<Binding> {
        let target = import
            .resolved_file
            .clone()
            .or_else(|| self.resolve(file, &import.source))?;
        let name = match &import.imported {
            ImportedName::Namespace => return Some(Binding::Namespace { file: target }),
            ImportedName::Default => "default",
            ImportedName::Named(name) => name.as_str(),
        };
        Some(
            self.follow(&target, name, depth, visited)
                .unwrap_or_else(|| Binding::Symbol {
                    file: target,
                    name: name.to_string(),
                }),
        )
    }

    /// Where `name`, as exported by `file`, is declared.
    fn follow(
        &self,
        file: &Path,
        name: &str,
        depth: usize,
        visited: &mut HashSet<(PathBuf, String)>,
    ) -> Option<Binding> {
        if depth > MAX_REEXPORT_DEPTH || !visited.insert((file.to_path_buf(), name.to_string())) {
            return None;
        }

        let declared_here = || {
            self.symbols.declares(file, name).then(|| Binding::Symbol {
                file: file.to_path_buf(),
                name: name.to_string(),
            })
        };

        let Some(entry) = self.buffer.get(file) else {
            return declared_here();
        };

        if let Some(export) = entry.exports.iter().find(|e| e.exported_name == name) {
            return match &export.source {
                None => {
                    let reexported_import = entry
                        .imports
                        .iter()
                        .find(|i| i.local_name == export.local_name);
                    match reexported_import {
                        Some(import) => self.import_binding(file, import, depth + 1, visited),
                        None => Some(Binding::Symbol {
                            file: file.to_path_buf(),
                            name: export.local_name.clone(),
                        }),
                    }
                }
                Some(specifier) => {
                    let target = self.resolve(file, specifier)?;
                    if export.local_name == "*" {
                        return Some(Binding::Namespace { file: target });
                    }
                    let local = export.local_name.clone();
                    self.follow(&target, &local, depth + 1, visited)
                        .or(Some(Binding::Symbol { file: target, name: local }))
                }
            };
        }

        if let Some(binding) = declared_here() {
            return Some(binding);
        }

        entry
            .exports
            .iter()
            .filter(|e| e.exported_name == "*")
            .filter_map(|e| e.source.as_deref())
            .filter_map(|specifier| self.resolve(file, specifier))
            .find_map(|target| self.follow(&target, name, depth + 1, visited))
    }
}

/// Resolve a relative module specifier against the importing file.
///
/// Tries the path as written, a TypeScript sibling for `.js`-style
/// specifiers, each source extension, then `index.<ext>` inside it. Bare
/// (package) specifiers return `None`.
pub fn resolve_specifier(from: &Path, specifier: &str, is_known: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let relative = specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == "..";
    if !relative {
        return None;
    }

    let base = normalize(&from.parent()?.join(specifier));
    if is_known(&base) {
        return Some(base);
    }

    let sibling_exts: &[&str] = match base.extension().and_then(|e| e.to_str()) {
        Some("js") => &["ts", "tsx"],
        Some("jsx") => &["tsx"],
        Some("mjs") => &["mts"],
        Some("cjs") => &["cts"],
        _ => &[],
    };
    for ext in sibling_exts {
        let candidate = base.with_extension(ext);
        if is_known(&candidate) {
            return Some(candidate);
        }
    }

    for ext in SOURCE_EXTENSIONS {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if is_known(&candidate) {
            return Some(candidate);
        }
    }

    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| base.join(format!("index.{ext}")))
        .find(|candidate| is_known(candidate))
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
