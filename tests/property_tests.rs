//! Property-based tests for resolution and identity.
//!
//! Uses proptest to generate small TypeScript projects and verify that
//! resolution is deterministic and never guesses.

use camille_index::buffer::PendingEdgeBuffer;
use camille_index::parsing::CodeParser;
use camille_index::parsing::typescript::TypeScriptParser;
use camille_index::resolver::import_map::{Binding, ImportMaps};
use camille_index::resolver::symbols::SymbolTable;
use camille_index::resolver::{EdgeOutcome, resolve_edge, resolve_snapshot};
use camille_index::{Node, NodeId, NodeKind, RelationshipKind};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// A small pool so that names collide across files.
fn function_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["load", "save", "parse", "render", "validate", "flush"])
        .prop_map(str::to_string)
}

#[derive(Debug, Clone)]
struct FunctionSpec {
    name: String,
    calls: Vec<String>,
}

#[derive(Debug, Clone)]
struct FileSpec {
    functions: Vec<FunctionSpec>,
    /// (name, index of the file it is imported from)
    imports: Vec<(String, usize)>,
}

fn function_spec() -> impl Strategy<Value = FunctionSpec> {
    (function_name(), prop::collection::vec(function_name(), 0..=3))
        .prop_map(|(name, calls)| FunctionSpec { name, calls })
}

fn project() -> impl Strategy<Value = Vec<FileSpec>> {
    prop::collection::vec(
        (
            prop::collection::vec(function_spec(), 1..=3),
            prop::collection::vec((function_name(), 0usize..4), 0..=2),
        ),
        1..=4,
    )
    .prop_map(|files| {
        let count = files.len();
        files
            .into_iter()
            .map(|(functions, imports)| FileSpec {
                functions,
                imports: imports.into_iter().map(|(n, i)| (n, i % count)).collect(),
            })
            .collect()
    })
}

fn file_path(index: usize) -> PathBuf {
    PathBuf::from(format!("/project/src/file{index}.ts"))
}

fn render(spec: &FileSpec) -> String {
    let mut source = String::new();
    let mut seen = BTreeSet::new();
    for (name, from) in &spec.imports {
        // One binding per local name.
        if seen.insert(name.clone()) {
            source.push_str(&format!("import {{ {name} }} from './file{from}';\n"));
        }
    }
    for function in &spec.functions {
        source.push_str(&format!("export function {}() {{\n", function.name));
        for call in &function.calls {
            source.push_str(&format!("  {call}();\n"));
        }
        source.push_str("}\n");
    }
    source
}

struct Parsed {
    buffer: PendingEdgeBuffer,
    nodes: Vec<Node>,
}

fn parse_project(files: &[FileSpec]) -> Parsed {
    let parser = TypeScriptParser::new();
    let mut buffer = PendingEdgeBuffer::new();
    let mut nodes = Vec::new();
    for (index, spec) in files.iter().enumerate() {
        let path = file_path(index);
        let output = parser.parse(&path, &render(spec)).expect("generated source parses");
        nodes.extend(output.nodes);
        buffer.replace(path, output.pending_edges, output.imports, output.exports);
    }
    Parsed { buffer, nodes }
}

// ============================================================================
// Resolution Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the same buffer and snapshot always resolve identically
    #[test]
    fn resolution_is_deterministic(files in project()) {
        let parsed = parse_project(&files);
        let first = resolve_snapshot(&parsed.buffer, parsed.nodes.clone());
        let second = resolve_snapshot(&parsed.buffer, parsed.nodes.clone());
        prop_assert_eq!(&first, &second);

        // Snapshot order does not matter.
        let mut reversed = parsed.nodes.clone();
        reversed.reverse();
        let third = resolve_snapshot(&parsed.buffer, reversed);
        prop_assert_eq!(&first.edges, &third.edges);
        prop_assert_eq!(first.stats, third.stats);
    }

    /// Property: every pending edge is counted exactly once
    #[test]
    fn every_edge_is_accounted_for(files in project()) {
        let parsed = parse_project(&files);
        let pending = parsed.buffer.pending_count();
        let resolution = resolve_snapshot(&parsed.buffer, parsed.nodes);
        prop_assert_eq!(resolution.stats.total(), pending);
        let by_strategy: usize = resolution.by_strategy.values().sum();
        prop_assert_eq!(by_strategy, resolution.stats.resolved);
    }

    /// Property: resolved edges are unique and only connect existing nodes
    #[test]
    fn resolved_targets_exist(files in project()) {
        let parsed = parse_project(&files);
        let by_id: HashMap<NodeId, &Node> = parsed.nodes.iter().map(|n| (n.id.clone(), n)).collect();
        let resolution = resolve_snapshot(&parsed.buffer, parsed.nodes.clone());

        let mut keys = BTreeSet::new();
        for edge in &resolution.edges {
            prop_assert!(keys.insert(edge.key()), "duplicate edge written");
            let target = by_id.get(&edge.target_id);
            prop_assert!(target.is_some(), "edge to unknown node");
            prop_assert!(by_id.contains_key(&edge.source_id));
            if edge.relationship == RelationshipKind::Calls {
                prop_assert_eq!(target.map(|t| t.kind), Some(NodeKind::Function));
            }
        }
    }

    /// Property: a call to a name declared exactly once always resolves to it,
    /// unless the caller imports that name from a file that lacks it
    #[test]
    fn unique_declarations_always_resolve(files in project()) {
        let parsed = parse_project(&files);
        let symbols = SymbolTable::from_nodes(parsed.nodes.clone());
        let maps = ImportMaps::build(&parsed.buffer, &symbols);

        let mut declarations: HashMap<&str, Vec<&Node>> = HashMap::new();
        for node in parsed.nodes.iter().filter(|n| n.kind == NodeKind::Function) {
            declarations.entry(node.name.as_str()).or_default().push(node);
        }

        for (file, entry) in parsed.buffer.entries() {
            for edge in entry.pending_edges.iter().filter(|e| e.relationship == RelationshipKind::Calls) {
                let outcome = resolve_edge(edge, file, &symbols, &maps);
                // An import of a name its file lacks never falls back to another declaration.
                let dangling_import = match maps.binding(file, &edge.target_name) {
                    Some(Binding::Symbol { file: bound, name }) => {
                        symbols.in_file(bound, name, NodeKind::Function).is_empty()
                    }
                    _ => false,
                };
                if dangling_import {
                    prop_assert_eq!(outcome, EdgeOutcome::Unresolved);
                    continue;
                }
                match declarations.get(edge.target_name.as_str()).map(Vec::as_slice) {
                    Some([only]) => {
                        let resolved_to = match &outcome {
                            EdgeOutcome::Resolved(id, _) => Some(id.clone()),
                            _ => None,
                        };
                        prop_assert_eq!(resolved_to, Some(only.id.clone()));
                    }
                    None => prop_assert_eq!(outcome, EdgeOutcome::Unresolved),
                    Some(_) => {}
                }
            }
        }
    }

    /// Property: parsing the same source twice yields the same output
    #[test]
    fn parsing_is_deterministic(files in project()) {
        let parser = TypeScriptParser::new();
        for (index, spec) in files.iter().enumerate() {
            let source = render(spec);
            let first = parser.parse(&file_path(index), &source).unwrap();
            let second = parser.parse(&file_path(index), &source).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

// ============================================================================
// Identity Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: node ids depend only on file, kind, name and line
    #[test]
    fn node_id_reproducible(
        dir in "[a-z]{1,8}",
        name in "[a-zA-Z_][a-zA-Z0-9_]{0,20}",
        line in 1u32..10_000,
    ) {
        let file = PathBuf::from(format!("/repo/{dir}/mod.ts"));
        let a = NodeId::derive(&file, NodeKind::Function, &name, line);
        let b = NodeId::derive(&file, NodeKind::Function, &name, line);
        prop_assert_eq!(&a, &b);

        let moved = NodeId::derive(&file, NodeKind::Function, &name, line + 1);
        prop_assert_ne!(&a, &moved);
        let rekinded = NodeId::derive(&file, NodeKind::Class, &name, line);
        prop_assert_ne!(&a, &rekinded);
        let elsewhere = NodeId::derive(Path::new("/elsewhere/mod.ts"), NodeKind::Function, &name, line);
        prop_assert_ne!(&a, &elsewhere);
    }

    /// Property: node ids survive a re-parse of unchanged source
    #[test]
    fn parsed_ids_are_stable(files in project()) {
        let first = parse_project(&files);
        let second = parse_project(&files);
        let ids = |p: &Parsed| p.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
        prop_assert_eq!(ids(&first), ids(&second));
    }
}
