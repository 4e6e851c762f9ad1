//! Parser contract for structural extraction.
//!
//! A parser turns one file into nodes, pending (unresolved) edges and the
//! file's import/export declarations. Parsing is per-file and failures are
//! non-fatal to the pipeline.

pub mod typescript;

use crate::error::Result;
use crate::types::ParseOutput;
use std::path::Path;
use std::sync::Arc;

/// Language-aware structural extraction.
pub trait CodeParser: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this parser handles `path`.
    fn supports(&self, path: &Path) -> bool;

    /// Parse one file.
    fn parse(&self, path: &Path, content: &str) -> Result<ParseOutput>;
}

/// Dispatches to the first registered parser that supports a file.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn CodeParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled parsers.
    pub fn with_defaults() -> Self {
        Self::new().with(Arc::new(typescript::TypeScriptParser::new()))
    }

    pub fn with(mut self, parser: Arc<dyn CodeParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    pub fn parser_for(&self, path: &Path) -> Option<&Arc<dyn CodeParser>> {
        self.parsers.iter().find(|p| p.supports(path))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.parser_for(path).is_some()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.parsers.iter().map(|p| p.name()))
            .finish()
    }
}
