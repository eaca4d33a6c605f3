use anyhow::{Context, Result};
use tree_sitter::{Language, Node, Parser};

/// How a top-level node takes part in chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Function, class, type or similar unit that gets its own chunk
    Declaration,
    /// Comment, docstring or attribute that belongs to the next node
    Leading,
    /// Imports and loose statements, grouped with their neighbours
    Other,
}

/// Top-level AST node information for chunking
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub role: NodeRole,
    /// Declared name, e.g. the function or class identifier
    pub name: Option<String>,
}

const MAX_NAME_LEN: usize = 120;

/// AST parser for splitting a file into top-level code units
pub struct AstParser {
    parser: Parser,
    language_name: &'static str,
}

impl AstParser {
    /// Create a parser for a language name as reported by
    /// [`detect_language`](super::language::detect_language)
    pub fn new(language: &str) -> Result<Self> {
        let (grammar, language_name): (Language, &'static str) = match language {
            "Rust" => (tree_sitter_rust::LANGUAGE.into(), "Rust"),
            "Python" => (tree_sitter_python::LANGUAGE.into(), "Python"),
            "JavaScript" | "JavaScript (JSX)" => {
                (tree_sitter_javascript::LANGUAGE.into(), "JavaScript")
            }
            "TypeScript" => (
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                "TypeScript",
            ),
            "TypeScript (TSX)" => (tree_sitter_typescript::LANGUAGE_TSX.into(), "TypeScript"),
            "Go" => (tree_sitter_go::LANGUAGE.into(), "Go"),
            "Java" => (tree_sitter_java::LANGUAGE.into(), "Java"),
            "Swift" => (tree_sitter_swift::LANGUAGE.into(), "Swift"),
            "C" => (tree_sitter_c::LANGUAGE.into(), "C"),
            "C++" | "C/C++ Header" => (tree_sitter_cpp::LANGUAGE.into(), "C++"),
            "C#" => (tree_sitter_c_sharp::LANGUAGE.into(), "C#"),
            "Ruby" => (tree_sitter_ruby::LANGUAGE.into(), "Ruby"),
            "PHP" => (tree_sitter_php::LANGUAGE_PHP.into(), "PHP"),
            _ => anyhow::bail!("Unsupported language for AST parsing: {}", language),
        };

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .context("Failed to set parser language")?;

        Ok(Self {
            parser,
            language_name,
        })
    }

    /// Whether a grammar exists for the language
    pub fn supports(language: &str) -> bool {
        matches!(
            language,
            "Rust"
                | "Python"
                | "JavaScript"
                | "JavaScript (JSX)"
                | "TypeScript"
                | "TypeScript (TSX)"
                | "Go"
                | "Java"
                | "Swift"
                | "C"
                | "C++"
                | "C/C++ Header"
                | "C#"
                | "Ruby"
                | "PHP"
        )
    }

    /// Parse source code and return its top-level nodes in source order
    pub fn parse(&mut self, source_code: &str) -> Result<Vec<AstNode>> {
        let tree = self
            .parser
            .parse(source_code, None)
            .context("Failed to parse source code")?;

        let root = tree.root_node();
        if root.has_error() {
            anyhow::bail!("Source has syntax errors");
        }
        let mut nodes = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            // PHP wraps the file in `<?php` text nodes
            if matches!(child.kind(), "php_tag" | "text") {
                continue;
            }
            let role = self.role_of(child, source_code);
            let name = match role {
                NodeRole::Declaration => node_name(child, source_code),
                _ => None,
            };
            nodes.push(AstNode {
                kind: child.kind().to_string(),
                start_byte: child.start_byte(),
                end_byte: child.end_byte(),
                start_line: child.start_position().row + 1,
                end_line: child.end_position().row + 1,
                role,
                name,
            });
        }

        Ok(nodes)
    }

    fn role_of(&self, node: Node, source: &str) -> NodeRole {
        let kind = node.kind();
        if kind.contains("comment") || kind == "attribute_item" || is_docstring(node) {
            return NodeRole::Leading;
        }
        if self.declaration_kinds().contains(&kind) {
            return NodeRole::Declaration;
        }
        match kind {
            "export_statement" => match node.child_by_field_name("declaration") {
                Some(inner) if self.role_of(inner, source) == NodeRole::Declaration => {
                    NodeRole::Declaration
                }
                _ => NodeRole::Other,
            },
            "lexical_declaration" | "variable_declaration" if binds_function(node) => {
                NodeRole::Declaration
            }
            _ => NodeRole::Other,
        }
    }

    fn declaration_kinds(&self) -> &'static [&'static str] {
        match self.language_name {
            "Rust" => &[
                "function_item",
                "impl_item",
                "trait_item",
                "struct_item",
                "enum_item",
                "union_item",
                "mod_item",
                "macro_definition",
            ],
            "Python" => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            "JavaScript" | "TypeScript" => &[
                "function_declaration",
                "generator_function_declaration",
                "class_declaration",
                "abstract_class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
                "internal_module",
            ],
            "Go" => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
            ],
            "Java" => &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
                "record_declaration",
                "annotation_type_declaration",
            ],
            "Swift" => &[
                "function_declaration",
                "class_declaration",
                "protocol_declaration",
                "struct_declaration",
                "enum_declaration",
                "extension_declaration",
            ],
            "C" => &[
                "function_definition",
                "struct_specifier",
                "enum_specifier",
                "union_specifier",
                "type_definition",
            ],
            "C++" => &[
                "function_definition",
                "class_specifier",
                "struct_specifier",
                "enum_specifier",
                "union_specifier",
                "namespace_definition",
                "template_declaration",
            ],
            "C#" => &[
                "class_declaration",
                "struct_declaration",
                "interface_declaration",
                "enum_declaration",
                "record_declaration",
                "namespace_declaration",
                "file_scoped_namespace_declaration",
            ],
            "Ruby" => &["method", "singleton_method", "class", "singleton_class", "module"],
            "PHP" => &[
                "function_definition",
                "class_declaration",
                "interface_declaration",
                "trait_declaration",
                "enum_declaration",
                "namespace_definition",
            ],
            _ => &[],
        }
    }

    /// Get the language name
    pub fn language_name(&self) -> &str {
        self.language_name
    }
}

/// Python module and class docstrings
fn is_docstring(node: Node) -> bool {
    node.kind() == "expression_statement"
        && node.named_child_count() == 1
        && node.named_child(0).is_some_and(|c| c.kind() == "string")
}

/// `const handler = () => {}` and friends
fn binds_function(node: Node) -> bool {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).any(|child| {
        child.kind() == "variable_declarator"
            && child.child_by_field_name("value").is_some_and(|v| {
                matches!(
                    v.kind(),
                    "arrow_function" | "function_expression" | "function" | "class"
                )
            })
    });
    found
}

fn node_text(node: Node, source: &str) -> Option<String> {
    let text = node.utf8_text(source.as_bytes()).ok()?;
    let line = text.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_NAME_LEN).collect())
}

/// Best-effort name of a declaration node
fn node_name(node: Node, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return node_text(name, source);
    }
    // export_statement, decorated_definition, template_declaration
    for field in ["declaration", "definition"] {
        if let Some(inner) = node.child_by_field_name(field) {
            return node_name(inner, source);
        }
    }
    if let Some(declarator) = node.child_by_field_name("declarator") {
        return declarator_name(declarator, source);
    }
    // Rust `impl Foo`
    if let Some(ty) = node.child_by_field_name("type") {
        return node_text(ty, source);
    }
    // Go type_declaration, JS lexical_declaration, C++ template_declaration
    let mut cursor = node.walk();
    let named: Vec<Node> = node.named_children(&mut cursor).collect();
    named.into_iter().find_map(|child| {
        child
            .child_by_field_name("name")
            .and_then(|n| node_text(n, source))
            .or_else(|| match child.kind() {
                "function_definition" | "class_specifier" | "struct_specifier" => {
                    node_name(child, source)
                }
                _ => None,
            })
    })
}

/// Walk C and C++ declarators down to the identifier
fn declarator_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
        | "operator_name" | "type_identifier" => node_text(node, source),
        _ => node
            .child_by_field_name("declarator")
            .and_then(|inner| declarator_name(inner, source))
            .or_else(|| {
                node.child_by_field_name("name")
                    .and_then(|n| node_text(n, source))
            }),
    }
}
