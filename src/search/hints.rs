//! Structural hints pulled out of a free-text query.

use crate::types::NodeKind;
use regex::Regex;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::LazyLock;

static KIND_QUALIFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(function|class|interface|method|module|variable|property)\s+([A-Za-z_$][\w$]*)")
        .expect("valid regex")
});

static PATH_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w./-]*[\w-]\.(?:ts|tsx|mts|cts|js|jsx|mjs|cjs)\b")
        .expect("valid regex")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*").expect("valid regex"));

const STOP_WORDS: &[&str] = &[
    "about", "all", "and", "any", "are", "but", "can", "code", "does", "each", "find", "for",
    "from", "get", "has", "have", "how", "into", "its", "not", "now", "out", "show", "that",
    "the", "their", "them", "then", "there", "these", "this", "use", "used", "uses", "using",
    "what", "when", "where", "which", "who", "why", "will", "with", "you", "your",
];

const KIND_WORDS: &[&str] = &[
    "function", "class", "interface", "method", "module", "variable", "property",
];

/// Which node kinds a name hint may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindHint {
    Any,
    Exactly(NodeKind),
    /// Capitalized token: any kind, classes and interfaces first.
    PreferTypeLike,
}

impl KindHint {
    pub fn accepts(self, kind: NodeKind) -> bool {
        match self {
            Self::Any | Self::PreferTypeLike => true,
            Self::Exactly(wanted) => kind == wanted,
        }
    }

    /// Whether `kind` should rank ahead of other matches for the same name.
    pub fn prefers(self, kind: NodeKind) -> bool {
        self == Self::PreferTypeLike && kind.is_type_like()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameHint {
    pub name: String,
    pub kind: KindHint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHints {
    pub names: BTreeSet<NameHint>,
    /// Path fragments; nodes in files ending with one match.
    pub files: BTreeSet<String>,
}

impl QueryHints {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.files.is_empty()
    }
}

pub fn extract_hints(query: &str, min_token_len: usize) -> QueryHints {
    let mut hints = QueryHints::default();

    for m in PATH_MENTION.find_iter(query) {
        hints
            .files
            .insert(m.as_str().trim_start_matches("./").to_string());
    }
    let without_paths = PATH_MENTION.replace_all(query, " ");

    let mut qualified = BTreeSet::new();
    for caps in KIND_QUALIFIED.captures_iter(&without_paths) {
        let (Some(kind), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(kind) = NodeKind::from_str(kind.as_str()) else {
            continue;
        };
        qualified.insert(name.as_str().to_string());
        hints.names.insert(NameHint {
            name: name.as_str().to_string(),
            kind: KindHint::Exactly(kind),
        });
    }

    for m in IDENTIFIER.find_iter(&without_paths) {
        let token = m.as_str();
        if qualified.contains(token) {
            continue;
        }
        let lower = token.to_ascii_lowercase();
        if STOP_WORDS.contains(&lower.as_str()) || KIND_WORDS.contains(&lower.as_str()) {
            continue;
        }
        if token.starts_with(|c: char| c.is_ascii_uppercase()) {
            hints.names.insert(NameHint {
                name: token.to_string(),
                kind: KindHint::PreferTypeLike,
            });
        } else if token.chars().count() >= min_token_len {
            hints.names.insert(NameHint {
                name: token.to_string(),
                kind: KindHint::Any,
            });
        }
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(hints: &QueryHints) -> Vec<(&str, KindHint)> {
        hints.names.iter().map(|h| (h.name.as_str(), h.kind)).collect()
    }

    #[test]
    fn test_kind_qualified_and_capitalized() {
        let hints = extract_hints("where is function parseConfig used by UserService", 3);
        assert_eq!(
            names(&hints),
            vec![
                ("UserService", KindHint::PreferTypeLike),
                ("parseConfig", KindHint::Exactly(NodeKind::Function)),
            ]
        );
        assert!(hints.files.is_empty());
    }

    #[test]
    fn test_path_mentions_and_short_tokens() {
        let hints = extract_hints("db helpers in src/util/db.ts", 3);
        assert_eq!(hints.files.iter().collect::<Vec<_>>(), vec!["src/util/db.ts"]);
        assert_eq!(names(&hints), vec![("helpers", KindHint::Any)]);
    }

    #[test]
    fn test_stop_words_are_skipped() {
        let hints = extract_hints("how does this work with that", 3);
        assert_eq!(names(&hints), vec![("work", KindHint::Any)]);
        assert!(extract_hints("", 3).is_empty());
    }

    #[test]
    fn test_capitalized_tokens_accept_every_kind() {
        let hints = extract_hints("Button", 3);
        let hint = hints.names.iter().next().unwrap();
        assert!(hint.kind.accepts(NodeKind::Function));
        assert!(hint.kind.accepts(NodeKind::Class));
        assert!(hint.kind.prefers(NodeKind::Interface));
        assert!(!hint.kind.prefers(NodeKind::Function));
        assert!(!KindHint::Any.prefers(NodeKind::Class));
    }
}
