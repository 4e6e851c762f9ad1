//! TypeScript/JavaScript parser using tree-sitter.
//!
//! Emits one module node per file plus functions, classes, interfaces,
//! methods, properties and top-level variables. References (calls,
//! instantiations, heritage, type annotations, imports) become pending edges
//! for the resolver.

use super::CodeParser;
use crate::error::{IndexError, Result};
use crate::types::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tree_sitter::{Language, Node as TsNode, Parser};

const TS_EXTENSIONS: &[&str] = &["ts", "mts", "cts"];
const TSX_EXTENSIONS: &[&str] = &["tsx", "js", "jsx", "mjs", "cjs"];

/// Type names that never resolve to project code.
const BUILTIN_TYPES: &[&str] = &[
    "Array", "ArrayLike", "AsyncIterable", "AsyncIterator", "Awaited", "Boolean", "Buffer", "Date",
    "Error", "Exclude", "Extract", "Function", "Generator", "Iterable", "Iterator", "Map",
    "NonNullable", "Number", "Object", "Omit", "Parameters", "Partial", "Pick", "Promise",
    "PromiseLike", "Readonly", "ReadonlyArray", "Record", "RegExp", "Required", "ReturnType", "Set",
    "String", "Symbol", "Uint8Array", "WeakMap", "WeakSet",
];

/// TypeScript/JavaScript source parser.
pub struct TypeScriptParser {
    typescript: Language,
    tsx: Language,
}

impl TypeScriptParser {
    pub fn new() -> Self {
        Self {
            typescript: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            tsx: tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn language_for(&self, path: &Path) -> Option<&Language> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if TS_EXTENSIONS.contains(&ext.as_str()) {
            Some(&self.typescript)
        } else if TSX_EXTENSIONS.contains(&ext.as_str()) {
            Some(&self.tsx)
        } else {
            None
        }
    }
}

impl Default for TypeScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeParser for TypeScriptParser {
    fn name(&self) -> &str {
        "typescript"
    }

    fn supports(&self, path: &Path) -> bool {
        self.language_for(path).is_some()
    }

    fn parse(&self, path: &Path, content: &str) -> Result<ParseOutput> {
        let parse_error = |message: String| IndexError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let language = self
            .language_for(path)
            .ok_or_else(|| parse_error("unsupported extension".to_string()))?;

        let mut parser = Parser::new();
        parser
            .set_language(language)
            .map_err(|e| parse_error(e.to_string()))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| parse_error("parser returned no tree".to_string()))?;

        let language_name = match path.extension().and_then(|e| e.to_str()) {
            Some("js" | "jsx" | "mjs" | "cjs") => "javascript",
            _ => "typescript",
        };

        let mut extractor = Extractor::new(path, content.as_bytes(), language_name);
        extractor.visit(tree.root_node());
        Ok(extractor.finish())
    }
}

// ============================================================================
// Extraction
// ============================================================================

struct ClassScope {
    name: String,
    superclass: Option<String>,
    /// Field name -> declared type name.
    field_types: HashMap<String, String>,
}

struct Extractor<'a> {
    file: &'a Path,
    bytes: &'a [u8],
    module_id: NodeId,
    output: ParseOutput,
    node_ids: HashSet<NodeId>,
    classes: Vec<ClassScope>,
    /// Reference sources, innermost last. Empty means the module.
    sources: Vec<NodeId>,
    /// Local variable -> type name, one frame per callable.
    locals: Vec<HashMap<String, String>>,
    /// Names exported by `export { .. }` or `export default name`.
    exported_locals: HashSet<String>,
    type_refs: HashSet<(NodeId, RelationshipKind, String)>,
}

impl<'a> Extractor<'a> {
    fn new(file: &'a Path, bytes: &'a [u8], language: &str) -> Self {
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string();
        let module = Node::new(
            stem,
            file,
            1,
            NodeMetadata::Module {
                language: language.to_string(),
            },
        )
        .with_column(1);
        let module_id = module.id.clone();

        let mut node_ids = HashSet::new();
        node_ids.insert(module_id.clone());

        Self {
            file,
            bytes,
            module_id,
            output: ParseOutput {
                nodes: vec![module],
                ..Default::default()
            },
            node_ids,
            classes: Vec::new(),
            sources: Vec::new(),
            locals: vec![HashMap::new()],
            exported_locals: HashSet::new(),
            type_refs: HashSet::new(),
        }
    }

    fn finish(mut self) -> ParseOutput {
        for node in &mut self.output.nodes {
            if !self.exported_locals.contains(&node.name) {
                continue;
            }
            match &mut node.metadata {
                NodeMetadata::Function { exported, .. }
                | NodeMetadata::Class { exported, .. }
                | NodeMetadata::Interface { exported }
                | NodeMetadata::Variable { exported, .. } => *exported = true,
                _ => {}
            }
        }
        self.output
    }

    fn current_source(&self) -> NodeId {
        self.sources
            .last()
            .cloned()
            .unwrap_or_else(|| self.module_id.clone())
    }

    fn at_top_level(&self) -> bool {
        self.sources.is_empty() && self.classes.is_empty()
    }

    fn text(&self, node: TsNode) -> Option<String> {
        text_of(self.bytes, node)
    }

    fn push_node(&mut self, node: Node, anchor: TsNode) -> NodeId {
        let id = node.id.clone();
        if self.node_ids.insert(id.clone()) {
            let node = match doc_comment(self.bytes, anchor) {
                Some(doc) => node.with_doc(doc),
                None => node,
            };
            self.output.nodes.push(node);
        }
        id
    }

    fn push_edge(&mut self, edge: PendingEdge) {
        self.output.pending_edges.push(edge);
    }

    fn visit(&mut self, node: TsNode) {
        match node.kind() {
            "import_statement" => {
                self.import_statement(node);
                return;
            }
            "export_statement" => {
                self.export_statement(node);
                return;
            }
            "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "lexical_declaration"
            | "variable_declaration" => {
                self.declaration(node, false);
                return;
            }
            "call_expression" => self.call_expression(node),
            "new_expression" => self.new_expression(node),
            _ => {}
        }
        self.visit_children(node);
    }

    fn visit_children(&mut self, node: TsNode) {
        let mut cursor = node.walk();
        let children: Vec<TsNode> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    /// Handle a declaration, returning the names it binds.
    fn declaration(&mut self, node: TsNode, exported: bool) -> Vec<String> {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.function_declaration(node, exported).into_iter().collect()
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.class_declaration(node, exported).into_iter().collect()
            }
            "interface_declaration" => self.interface_declaration(node, exported).into_iter().collect(),
            "lexical_declaration" | "variable_declaration" => self.variable_declaration(node, exported),
            "type_alias_declaration" | "enum_declaration" => node
                .child_by_field_name("name")
                .and_then(|n| self.text(n))
                .into_iter()
                .collect(),
            _ => {
                self.visit(node);
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    fn function_declaration(&mut self, node: TsNode, exported: bool) -> Option<String> {
        let Some(name) = node.child_by_field_name("name").and_then(|n| self.text(n)) else {
            self.visit_children(node);
            return None;
        };
        let (line, column) = position(node);
        let metadata = NodeMetadata::Function {
            signature: signature_of(self.bytes, node),
            exported,
        };
        let id = self.push_node(
            Node::new(&name, self.file, line, metadata).with_column(column),
            node,
        );
        self.type_edges(&id, node);
        self.enter_callable(id, node.child_by_field_name("body"));
        Some(name)
    }

    fn class_declaration(&mut self, node: TsNode, exported: bool) -> Option<String> {
        let Some(name) = node.child_by_field_name("name").and_then(|n| self.text(n)) else {
            self.visit_children(node);
            return None;
        };
        let (line, column) = position(node);
        let metadata = NodeMetadata::Class {
            exported,
            is_abstract: node.kind() == "abstract_class_declaration",
        };
        let id = self.push_node(
            Node::new(&name, self.file, line, metadata).with_column(column),
            node,
        );

        let mut superclass = None;
        if let Some(heritage) = find_child(node, "class_heritage") {
            let mut cursor = heritage.walk();
            let clauses: Vec<TsNode> = heritage.named_children(&mut cursor).collect();
            for clause in clauses {
                let (relationship, kind) = match clause.kind() {
                    "extends_clause" => (RelationshipKind::Extends, NodeKind::Class),
                    "implements_clause" => (RelationshipKind::Implements, NodeKind::Interface),
                    _ => continue,
                };
                let mut cursor = clause.walk();
                let targets: Vec<TsNode> = clause
                    .named_children(&mut cursor)
                    .filter(|t| t.kind() != "type_arguments")
                    .collect();
                for target in targets {
                    let named = self.heritage_edge(&id, relationship, kind, target);
                    if relationship == RelationshipKind::Extends && superclass.is_none() {
                        superclass = named;
                    }
                }
            }
        }

        let body = node.child_by_field_name("body");
        let field_types = body
            .map(|b| collect_field_types(self.bytes, b))
            .unwrap_or_default();
        self.classes.push(ClassScope {
            name: name.clone(),
            superclass,
            field_types,
        });
        self.sources.push(id);
        if let Some(body) = body {
            self.class_body(body, &name);
        }
        self.sources.pop();
        self.classes.pop();
        Some(name)
    }

    fn class_body(&mut self, body: TsNode, owner: &str) {
        let mut cursor = body.walk();
        let members: Vec<TsNode> = body.named_children(&mut cursor).collect();
        for member in members {
            match member.kind() {
                "method_definition" | "abstract_method_signature" | "method_signature" => {
                    self.method(member, owner);
                }
                "public_field_definition" | "property_signature" => {
                    self.property(member, owner);
                }
                _ => self.visit(member),
            }
        }
    }

    fn method(&mut self, node: TsNode, owner: &str) {
        let Some(name) = node.child_by_field_name("name").and_then(|n| self.text(n)) else {
            self.visit_children(node);
            return;
        };
        let (line, column) = position(node);
        let metadata = NodeMetadata::Method {
            owner: owner.to_string(),
            signature: signature_of(self.bytes, node),
            is_static: has_child_kind(node, "static"),
        };
        let id = self.push_node(
            Node::new(&name, self.file, line, metadata).with_column(column),
            node,
        );
        self.type_edges(&id, node);
        self.enter_callable(id, node.child_by_field_name("body"));
    }

    fn property(&mut self, node: TsNode, owner: &str) {
        let Some(name) = node.child_by_field_name("name").and_then(|n| self.text(n)) else {
            return;
        };
        let (line, column) = position(node);
        let type_annotation = node
            .child_by_field_name("type")
            .and_then(|t| self.text(t))
            .map(|t| squash(t.trim_start_matches(':')));
        let metadata = NodeMetadata::Property {
            owner: owner.to_string(),
            type_annotation,
        };
        self.push_node(
            Node::new(&name, self.file, line, metadata).with_column(column),
            node,
        );
        // Initializers run in the class scope.
        if let Some(value) = node.child_by_field_name("value") {
            self.visit(value);
        }
    }

    fn interface_declaration(&mut self, node: TsNode, exported: bool) -> Option<String> {
        let name = node.child_by_field_name("name").and_then(|n| self.text(n))?;
        let (line, column) = position(node);
        let id = self.push_node(
            Node::new(&name, self.file, line, NodeMetadata::Interface { exported }).with_column(column),
            node,
        );

        if let Some(clause) = find_child(node, "extends_type_clause") {
            let mut cursor = clause.walk();
            let targets: Vec<TsNode> = clause.named_children(&mut cursor).collect();
            for target in targets {
                self.heritage_edge(&id, RelationshipKind::Extends, NodeKind::Interface, target);
            }
        }

        self.classes.push(ClassScope {
            name: name.clone(),
            superclass: None,
            field_types: HashMap::new(),
        });
        self.sources.push(id);
        if let Some(body) = node.child_by_field_name("body") {
            self.class_body(body, &name);
        }
        self.sources.pop();
        self.classes.pop();
        Some(name)
    }

    fn variable_declaration(&mut self, node: TsNode, exported: bool) -> Vec<String> {
        let is_const = has_child_kind(node, "const");
        let mut names = Vec::new();
        let mut cursor = node.walk();
        let declarators: Vec<TsNode> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
            .collect();

        for declarator in declarators {
            let value = declarator.child_by_field_name("value");
            let name = declarator
                .child_by_field_name("name")
                .filter(|n| n.kind() == "identifier")
                .and_then(|n| self.text(n));
            let Some(name) = name else {
                if let Some(value) = value {
                    self.visit(value);
                }
                continue;
            };

            if let Some(type_name) = declared_type(self.bytes, declarator) {
                if let Some(frame) = self.locals.last_mut() {
                    frame.insert(name.clone(), type_name);
                }
            }

            if !self.at_top_level() {
                if let Some(value) = value {
                    self.visit(value);
                }
                continue;
            }

            let (line, column) = position(declarator);
            let is_function = value.is_some_and(|v| {
                matches!(v.kind(), "arrow_function" | "function_expression" | "function")
            });
            if let (true, Some(value)) = (is_function, value) {
                let metadata = NodeMetadata::Function {
                    signature: signature_of(self.bytes, value),
                    exported,
                };
                let id = self.push_node(
                    Node::new(&name, self.file, line, metadata).with_column(column),
                    node,
                );
                self.type_edges(&id, value);
                self.enter_callable(id, value.child_by_field_name("body"));
            } else {
                let metadata = NodeMetadata::Variable { exported, is_const };
                self.push_node(
                    Node::new(&name, self.file, line, metadata).with_column(column),
                    node,
                );
                if let Some(value) = value {
                    self.visit(value);
                }
            }
            names.push(name);
        }
        names
    }

    fn enter_callable(&mut self, id: NodeId, body: Option<TsNode>) {
        self.sources.push(id);
        self.locals.push(HashMap::new());
        if let Some(body) = body {
            self.visit(body);
        }
        self.locals.pop();
        self.sources.pop();
    }

    // ------------------------------------------------------------------------
    // Imports / Exports
    // ------------------------------------------------------------------------

    fn import_statement(&mut self, node: TsNode) {
        let Some(source) = node
            .child_by_field_name("source")
            .and_then(|n| self.text(n))
            .map(|s| strip_quotes(&s))
        else {
            return;
        };
        self.import_edge(node, &source);
        let (line, _) = position(node);

        let Some(clause) = find_child(node, "import_clause") else {
            return;
        };
        let mut cursor = clause.walk();
        let bindings: Vec<TsNode> = clause.named_children(&mut cursor).collect();
        for binding in bindings {
            match binding.kind() {
                "identifier" => {
                    if let Some(local) = self.text(binding) {
                        self.output.imports.push(ImportDecl {
                            local_name: local,
                            imported: ImportedName::Default,
                            source: source.clone(),
                            resolved_file: None,
                            line,
                        });
                    }
                }
                "namespace_import" => {
                    if let Some(local) = last_named_identifier(self.bytes, binding) {
                        self.output.imports.push(ImportDecl {
                            local_name: local,
                            imported: ImportedName::Namespace,
                            source: source.clone(),
                            resolved_file: None,
                            line,
                        });
                    }
                }
                "named_imports" => {
                    let mut cursor = binding.walk();
                    let specs: Vec<TsNode> = binding
                        .named_children(&mut cursor)
                        .filter(|s| s.kind() == "import_specifier")
                        .collect();
                    for spec in specs {
                        let Some(name) = spec
                            .child_by_field_name("name")
                            .and_then(|n| self.text(n))
                            .map(|s| strip_quotes(&s))
                        else {
                            continue;
                        };
                        let local = spec
                            .child_by_field_name("alias")
                            .and_then(|n| self.text(n))
                            .unwrap_or_else(|| name.clone());
                        self.output.imports.push(ImportDecl {
                            local_name: local,
                            imported: ImportedName::Named(name),
                            source: source.clone(),
                            resolved_file: None,
                            line,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn export_statement(&mut self, node: TsNode) {
        let is_default = has_child_kind(node, "default");

        if let Some(declaration) = node.child_by_field_name("declaration") {
            for name in self.declaration(declaration, true) {
                let export = if is_default {
                    ExportDecl {
                        exported_name: "default".to_string(),
                        local_name: name,
                        source: None,
                    }
                } else {
                    ExportDecl::local(name)
                };
                self.output.exports.push(export);
            }
            return;
        }

        let source = node
            .child_by_field_name("source")
            .and_then(|n| self.text(n))
            .map(|s| strip_quotes(&s));

        if let Some(clause) = find_child(node, "export_clause") {
            let mut cursor = clause.walk();
            let specs: Vec<TsNode> = clause
                .named_children(&mut cursor)
                .filter(|s| s.kind() == "export_specifier")
                .collect();
            for spec in specs {
                let Some(name) = spec
                    .child_by_field_name("name")
                    .and_then(|n| self.text(n))
                    .map(|s| strip_quotes(&s))
                else {
                    continue;
                };
                let exported = spec
                    .child_by_field_name("alias")
                    .and_then(|n| self.text(n))
                    .map(|s| strip_quotes(&s))
                    .unwrap_or_else(|| name.clone());
                if source.is_none() {
                    self.exported_locals.insert(name.clone());
                }
                self.output.exports.push(ExportDecl {
                    exported_name: exported,
                    local_name: name,
                    source: source.clone(),
                });
            }
        } else if let Some(source) = &source {
            let exported_name = find_child(node, "namespace_export")
                .and_then(|ns| last_named_identifier(self.bytes, ns))
                .unwrap_or_else(|| "*".to_string());
            self.output.exports.push(ExportDecl {
                exported_name,
                local_name: "*".to_string(),
                source: Some(source.clone()),
            });
        }

        if let Some(source) = &source {
            self.import_edge(node, source);
        }

        if is_default {
            if let Some(value) = node.child_by_field_name("value") {
                self.default_export_value(node, value);
            }
        }
    }

    fn default_export_value(&mut self, statement: TsNode, value: TsNode) {
        match value.kind() {
            "identifier" => {
                if let Some(local) = self.text(value) {
                    self.exported_locals.insert(local.clone());
                    self.output.exports.push(ExportDecl {
                        exported_name: "default".to_string(),
                        local_name: local,
                        source: None,
                    });
                }
            }
            "arrow_function" | "function_expression" | "function" => {
                let (line, column) = position(value);
                let metadata = NodeMetadata::Function {
                    signature: signature_of(self.bytes, value),
                    exported: true,
                };
                let id = self.push_node(
                    Node::new("default", self.file, line, metadata).with_column(column),
                    statement,
                );
                self.output.exports.push(ExportDecl::local("default"));
                self.type_edges(&id, value);
                self.enter_callable(id, value.child_by_field_name("body"));
            }
            _ => self.visit(value),
        }
    }

    fn import_edge(&mut self, node: TsNode, source: &str) {
        let (line, column) = position(node);
        let edge = PendingEdge::new(
            self.module_id.clone(),
            RelationshipKind::Imports,
            module_name_of(source),
            NodeKind::Module,
        )
        .with_import_source(source)
        .at(line, column);
        self.push_edge(edge);
    }

    // ------------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------------

    fn call_expression(&mut self, node: TsNode) {
        let Some(callee) = node.child_by_field_name("function") else {
            return;
        };
        let (line, column) = position(node);
        let source = self.current_source();

        match callee.kind() {
            "identifier" => {
                let Some(name) = self.text(callee) else { return };
                if name == "require" {
                    if let Some(spec) = first_string_argument(self.bytes, node) {
                        self.import_edge(node, &spec);
                    }
                    return;
                }
                let edge = PendingEdge::new(source, RelationshipKind::Calls, name, NodeKind::Function)
                    .at(line, column);
                self.push_edge(edge);
            }
            "member_expression" => {
                let Some(name) = callee
                    .child_by_field_name("property")
                    .and_then(|p| self.text(p))
                else {
                    return;
                };
                let hint = callee
                    .child_by_field_name("object")
                    .and_then(|o| self.receiver_hint(o));
                let mut edge = PendingEdge::new(source, RelationshipKind::Calls, name, NodeKind::Method)
                    .at(line, column);
                edge.receiver_hint = hint;
                self.push_edge(edge);
            }
            "import" => {
                if let Some(spec) = first_string_argument(self.bytes, node) {
                    self.import_edge(node, &spec);
                }
            }
            _ => {}
        }
    }

    fn new_expression(&mut self, node: TsNode) {
        let Some(constructor) = node.child_by_field_name("constructor") else {
            return;
        };
        let (line, column) = position(node);
        let source = self.current_source();
        let (name, hint) = match constructor.kind() {
            "identifier" => (self.text(constructor), None),
            "member_expression" => (
                constructor
                    .child_by_field_name("property")
                    .and_then(|p| self.text(p)),
                constructor
                    .child_by_field_name("object")
                    .and_then(|o| self.text(o)),
            ),
            _ => (None, None),
        };
        if let Some(name) = name {
            let mut edge = PendingEdge::new(source, RelationshipKind::Uses, name, NodeKind::Class)
                .at(line, column);
            edge.receiver_hint = hint;
            self.push_edge(edge);
        }
    }

    /// Best guess at the type or module qualifying a member access.
    fn receiver_hint(&self, object: TsNode) -> Option<String> {
        match object.kind() {
            "this" => self.classes.last().map(|c| c.name.clone()),
            "super" => self.classes.last().and_then(|c| c.superclass.clone()),
            "identifier" => {
                let name = self.text(object)?;
                let typed = self
                    .locals
                    .iter()
                    .rev()
                    .find_map(|frame| frame.get(&name).cloned());
                Some(typed.unwrap_or(name))
            }
            "member_expression" => {
                let property = object
                    .child_by_field_name("property")
                    .and_then(|p| self.text(p))?;
                let on_this = object
                    .child_by_field_name("object")
                    .is_some_and(|o| o.kind() == "this");
                if on_this {
                    if let Some(field_type) = self
                        .classes
                        .last()
                        .and_then(|c| c.field_types.get(&property))
                    {
                        return Some(field_type.clone());
                    }
                }
                Some(property)
            }
            _ => None,
        }
    }

    /// Edge for an `extends`/`implements` target; returns the target name.
    fn heritage_edge(
        &mut self,
        source: &NodeId,
        relationship: RelationshipKind,
        kind: NodeKind,
        target: TsNode,
    ) -> Option<String> {
        let (name, hint) = match target.kind() {
            "identifier" | "type_identifier" => (self.text(target)?, None),
            "member_expression" => (
                self.text(target.child_by_field_name("property")?)?,
                target
                    .child_by_field_name("object")
                    .and_then(|o| self.text(o)),
            ),
            "nested_type_identifier" => (
                self.text(target.child_by_field_name("name")?)?,
                target
                    .child_by_field_name("module")
                    .and_then(|m| self.text(m)),
            ),
            "generic_type" => {
                return self.heritage_edge(source, relationship, kind, target.child_by_field_name("name")?);
            }
            _ => (last_identifier(self.bytes, target)?, None),
        };
        let (line, column) = position(target);
        let mut edge = PendingEdge::new(source.clone(), relationship, name.clone(), kind).at(line, column);
        edge.receiver_hint = hint;
        self.push_edge(edge);
        Some(name)
    }

    /// `accepts` edges for parameter types and `returns` for the return type.
    fn type_edges(&mut self, source: &NodeId, callable: TsNode) {
        let generics = type_parameter_names(self.bytes, callable);

        let mut accepted = Vec::new();
        if let Some(params) = callable.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            let params: Vec<TsNode> = params.named_children(&mut cursor).collect();
            for param in params {
                if let Some(annotation) = param.child_by_field_name("type") {
                    collect_type_names(self.bytes, annotation, &mut accepted);
                }
            }
        }
        let mut returned = Vec::new();
        if let Some(annotation) = callable.child_by_field_name("return_type") {
            collect_type_names(self.bytes, annotation, &mut returned);
        }

        let (line, column) = position(callable);
        for (relationship, names) in [
            (RelationshipKind::Accepts, accepted),
            (RelationshipKind::Returns, returned),
        ] {
            for name in names {
                if generics.contains(&name) || BUILTIN_TYPES.contains(&name.as_str()) {
                    continue;
                }
                if !self
                    .type_refs
                    .insert((source.clone(), relationship, name.clone()))
                {
                    continue;
                }
                let edge = PendingEdge::new(source.clone(), relationship, name, NodeKind::Class)
                    .at(line, column);
                self.push_edge(edge);
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn position(node: TsNode) -> (u32, u32) {
    let start = node.start_position();
    (start.row as u32 + 1, start.column as u32 + 1)
}

fn text_of(bytes: &[u8], node: TsNode) -> Option<String> {
    std::str::from_utf8(&bytes[node.start_byte()..node.end_byte()])
        .ok()
        .map(|s| s.to_string())
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_child_kind(node: TsNode, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

fn find_child<'t>(node: TsNode<'t>, kind: &str) -> Option<TsNode<'t>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|c| c.kind() == kind);
    found
}

fn last_named_identifier(bytes: &[u8], node: TsNode) -> Option<String> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "identifier")
        .last()
        .and_then(|c| text_of(bytes, c));
    found
}

fn last_identifier(bytes: &[u8], node: TsNode) -> Option<String> {
    let text = text_of(bytes, node)?;
    let mut best = None;
    for part in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '$') {
        if !part.is_empty() {
            best = Some(part);
        }
    }
    best.map(|s| s.to_string())
}

fn first_string_argument(bytes: &[u8], call: TsNode) -> Option<String> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() == "string" {
        text_of(bytes, first).map(|s| strip_quotes(&s))
    } else {
        None
    }
}

/// Final path segment of a module specifier without its extension.
fn module_name_of(source: &str) -> String {
    let last = source.rsplit('/').next().unwrap_or(source);
    let stem = last.split('.').next().unwrap_or(last);
    if stem.is_empty() {
        source.to_string()
    } else {
        stem.to_string()
    }
}

fn signature_of(bytes: &[u8], node: TsNode) -> Signature {
    let params = node
        .child_by_field_name("parameters")
        .map(|p| {
            let mut cursor = p.walk();
            let params: Vec<String> = p
                .named_children(&mut cursor)
                .filter(|c| c.kind() != "comment")
                .filter_map(|c| text_of(bytes, c))
                .map(|t| squash(&t))
                .collect();
            params
        })
        .or_else(|| {
            // `x => ...` has a bare parameter.
            node.child_by_field_name("parameter")
                .and_then(|p| text_of(bytes, p))
                .map(|t| vec![t])
        })
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("return_type")
        .and_then(|r| text_of(bytes, r))
        .map(|t| squash(t.trim_start_matches(':')));
    Signature {
        params,
        return_type,
        is_async: has_child_kind(node, "async"),
    }
}

fn type_parameter_names(bytes: &[u8], node: TsNode) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Some(params) = node.child_by_field_name("type_parameters") {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if let Some(name) = param.child_by_field_name("name").and_then(|n| text_of(bytes, n)) {
                names.insert(name);
            }
        }
    }
    names
}

fn collect_type_names(bytes: &[u8], node: TsNode, out: &mut Vec<String>) {
    match node.kind() {
        "type_identifier" => {
            if let Some(name) = text_of(bytes, node) {
                out.push(name);
            }
            return;
        }
        "nested_type_identifier" => {
            if let Some(name) = node.child_by_field_name("name").and_then(|n| text_of(bytes, n)) {
                out.push(name);
            }
            return;
        }
        "predefined_type" | "literal_type" => return,
        _ => {}
    }
    let mut cursor = node.walk();
    let children: Vec<TsNode> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_type_names(bytes, child, out);
    }
}

/// Declared type of a variable: annotation first, then `new X()`.
fn declared_type(bytes: &[u8], declarator: TsNode) -> Option<String> {
    if let Some(annotation) = declarator.child_by_field_name("type") {
        let mut names = Vec::new();
        collect_type_names(bytes, annotation, &mut names);
        if let Some(first) = names.into_iter().next() {
            return Some(first);
        }
    }
    let value = declarator.child_by_field_name("value")?;
    let value = if value.kind() == "await_expression" {
        value.named_child(0)?
    } else {
        value
    };
    if value.kind() == "new_expression" {
        let constructor = value.child_by_field_name("constructor")?;
        return match constructor.kind() {
            "identifier" => text_of(bytes, constructor),
            _ => last_identifier(bytes, constructor),
        };
    }
    None
}

/// Field name -> type for class fields and constructor parameter properties.
fn collect_field_types(bytes: &[u8], body: TsNode) -> HashMap<String, String> {
    let mut types = HashMap::new();
    let mut cursor = body.walk();
    let members: Vec<TsNode> = body.named_children(&mut cursor).collect();
    for member in members {
        match member.kind() {
            "public_field_definition" => {
                let name = member.child_by_field_name("name").and_then(|n| text_of(bytes, n));
                let mut names = Vec::new();
                if let Some(annotation) = member.child_by_field_name("type") {
                    collect_type_names(bytes, annotation, &mut names);
                }
                if let (Some(name), Some(type_name)) = (name, names.into_iter().next()) {
                    types.insert(name, type_name);
                }
            }
            "method_definition" => {
                let is_constructor = member
                    .child_by_field_name("name")
                    .and_then(|n| text_of(bytes, n))
                    .is_some_and(|n| n == "constructor");
                if !is_constructor {
                    continue;
                }
                let Some(params) = member.child_by_field_name("parameters") else {
                    continue;
                };
                let mut cursor = params.walk();
                let params: Vec<TsNode> = params.named_children(&mut cursor).collect();
                for param in params {
                    if !has_child_kind(param, "accessibility_modifier")
                        && !has_child_kind(param, "readonly")
                    {
                        continue;
                    }
                    let name = param
                        .child_by_field_name("pattern")
                        .and_then(|n| text_of(bytes, n));
                    let mut names = Vec::new();
                    if let Some(annotation) = param.child_by_field_name("type") {
                        collect_type_names(bytes, annotation, &mut names);
                    }
                    if let (Some(name), Some(type_name)) = (name, names.into_iter().next()) {
                        types.insert(name, type_name);
                    }
                }
            }
            _ => {}
        }
    }
    types
}

/// `/** ... */` comment directly preceding a declaration.
fn doc_comment(bytes: &[u8], node: TsNode) -> Option<String> {
    let anchor = match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => node,
    };
    let previous = anchor.prev_named_sibling()?;
    if previous.kind() != "comment" {
        return None;
    }
    let text = text_of(bytes, previous)?;
    if !text.starts_with("/**") {
        return None;
    }
    let body: Vec<String> = text
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if body.is_empty() {
        None
    } else {
        Some(body.join(" "))
    }
}
