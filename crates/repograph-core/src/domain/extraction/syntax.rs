//! Syntax trees handed over by the parser collaborator

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Languages with structural extraction support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    C,
    Cpp,
    CSharp,
    Go,
    Java,
    Ruby,
    Kotlin,
}

/// A declaration node kind and how to read it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub node_kind: &'static str,
    pub name_field: &'static str,
    pub category: &'static str,
}

const fn def(node_kind: &'static str, name_field: &'static str, category: &'static str) -> Definition {
    Definition {
        node_kind,
        name_field,
        category,
    }
}

const RUST_DEFINITIONS: &[Definition] = &[
    def("function_item", "name", "function"),
    def("function_signature_item", "name", "function"),
    def("struct_item", "name", "struct"),
    def("enum_item", "name", "enum"),
    def("union_item", "name", "union"),
    def("trait_item", "name", "trait"),
    def("mod_item", "name", "module"),
    def("type_item", "name", "type"),
    def("const_item", "name", "constant"),
    def("static_item", "name", "static"),
    def("macro_definition", "name", "macro"),
];

const PYTHON_DEFINITIONS: &[Definition] = &[
    def("class_definition", "name", "class"),
    def("function_definition", "name", "function"),
];

const JAVASCRIPT_DEFINITIONS: &[Definition] = &[
    def("class_declaration", "name", "class"),
    def("function_declaration", "name", "function"),
    def("generator_function_declaration", "name", "function"),
    def("method_definition", "name", "method"),
];

const TYPESCRIPT_DEFINITIONS: &[Definition] = &[
    def("class_declaration", "name", "class"),
    def("abstract_class_declaration", "name", "class"),
    def("function_declaration", "name", "function"),
    def("generator_function_declaration", "name", "function"),
    def("method_definition", "name", "method"),
    def("interface_declaration", "name", "interface"),
    def("type_alias_declaration", "name", "type"),
    def("enum_declaration", "name", "enum"),
];

// C and C++ keep function names under a `declarator` chain; see `SyntaxNode::declared_name`
const C_DEFINITIONS: &[Definition] = &[
    def("function_definition", "declarator", "function"),
    def("struct_specifier", "name", "struct"),
    def("union_specifier", "name", "union"),
    def("enum_specifier", "name", "enum"),
];

const CPP_DEFINITIONS: &[Definition] = &[
    def("function_definition", "declarator", "function"),
    def("class_specifier", "name", "class"),
    def("struct_specifier", "name", "struct"),
    def("union_specifier", "name", "union"),
    def("enum_specifier", "name", "enum"),
    def("namespace_definition", "name", "namespace"),
];

const CSHARP_DEFINITIONS: &[Definition] = &[
    def("namespace_declaration", "name", "namespace"),
    def("class_declaration", "name", "class"),
    def("struct_declaration", "name", "struct"),
    def("record_declaration", "name", "class"),
    def("interface_declaration", "name", "interface"),
    def("enum_declaration", "name", "enum"),
    def("method_declaration", "name", "method"),
    def("constructor_declaration", "name", "constructor"),
];

const GO_DEFINITIONS: &[Definition] = &[
    def("function_declaration", "name", "function"),
    def("method_declaration", "name", "method"),
    def("type_spec", "name", "type"),
];

const JAVA_DEFINITIONS: &[Definition] = &[
    def("class_declaration", "name", "class"),
    def("interface_declaration", "name", "interface"),
    def("enum_declaration", "name", "enum"),
    def("record_declaration", "name", "class"),
    def("method_declaration", "name", "method"),
    def("constructor_declaration", "name", "constructor"),
];

const RUBY_DEFINITIONS: &[Definition] = &[
    def("class", "name", "class"),
    def("module", "name", "module"),
    def("method", "name", "function"),
    def("singleton_method", "name", "method"),
];

const KOTLIN_DEFINITIONS: &[Definition] = &[
    def("class_declaration", "name", "class"),
    def("object_declaration", "name", "class"),
    def("function_declaration", "name", "function"),
];

/// Categories whose members are reported as methods
pub const TYPE_CATEGORIES: &[&str] = &["class", "struct", "enum", "trait", "interface", "impl", "module"];

impl Language {
    pub const ALL: [Language; 11] = [
        Language::Rust,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Go,
        Language::Java,
        Language::Ruby,
        Language::Kotlin,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyw" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(Self::Cpp),
            "cs" => Some(Self::CSharp),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "rb" => Some(Self::Ruby),
            "kt" | "kts" => Some(Self::Kotlin),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Go => "go",
            Self::Java => "java",
            Self::Ruby => "ruby",
            Self::Kotlin => "kotlin",
        }
    }

    /// Declaration node kinds that become entities
    pub fn definitions(self) -> &'static [Definition] {
        match self {
            Self::Rust => RUST_DEFINITIONS,
            Self::Python => PYTHON_DEFINITIONS,
            Self::JavaScript => JAVASCRIPT_DEFINITIONS,
            Self::TypeScript => TYPESCRIPT_DEFINITIONS,
            Self::C => C_DEFINITIONS,
            Self::Cpp => CPP_DEFINITIONS,
            Self::CSharp => CSHARP_DEFINITIONS,
            Self::Go => GO_DEFINITIONS,
            Self::Java => JAVA_DEFINITIONS,
            Self::Ruby => RUBY_DEFINITIONS,
            Self::Kotlin => KOTLIN_DEFINITIONS,
        }
    }

    pub fn definition_for(self, node_kind: &str) -> Option<&'static Definition> {
        self.definitions().iter().find(|d| d.node_kind == node_kind)
    }

    /// Node kinds that only open a naming scope, with the field holding the name
    pub fn scope_for(self, node_kind: &str) -> Option<&'static str> {
        match (self, node_kind) {
            (Self::Rust, "impl_item") => Some("type"),
            _ => None,
        }
    }

    /// Node kinds that represent a call
    pub fn call_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python | Self::Ruby => &["call"],
            Self::CSharp => &["invocation_expression"],
            Self::Java => &["method_invocation"],
            Self::Rust
            | Self::JavaScript
            | Self::TypeScript
            | Self::C
            | Self::Cpp
            | Self::Go
            | Self::Kotlin => &["call_expression"],
        }
    }

    /// Field of a call node holding the callee; `None` means the first child
    pub fn callee_field(self) -> Option<&'static str> {
        match self {
            Self::Java => Some("name"),
            Self::Ruby => Some("method"),
            Self::Kotlin => None,
            _ => Some("function"),
        }
    }

    pub fn is_call(self, node_kind: &str) -> bool {
        self.call_kinds().contains(&node_kind)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named syntax node with its byte and line span (lines are 1-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxNode {
    pub kind: String,
    /// Field name under which the parent holds this node
    pub field: Option<String>,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>, start_byte: usize, end_byte: usize) -> Self {
        Self {
            kind: kind.into(),
            field: None,
            start_byte,
            end_byte,
            start_line: 1,
            end_line: 1,
            children: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_lines(mut self, start_line: usize, end_line: usize) -> Self {
        self.start_line = start_line;
        self.end_line = end_line;
        self
    }

    pub fn with_child(mut self, child: SyntaxNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn child_by_field(&self, field: &str) -> Option<&SyntaxNode> {
        self.children
            .iter()
            .find(|c| c.field.as_deref() == Some(field))
    }

    /// Source text covered by this node
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start_byte..self.end_byte).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.end_byte.saturating_sub(self.start_byte)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last plain identifier below this node, so `crate::foo` and `self.foo` give `foo`
    pub fn last_identifier<'a>(&self, source: &'a str) -> Option<&'a str> {
        if is_identifier_like(&self.kind) {
            return Some(self.text(source));
        }
        self.children
            .iter()
            .filter_map(|c| c.last_identifier(source))
            .last()
    }

    /// Name of the declaration this node opens
    ///
    /// Reads the `field` child, descending through nested `declarator`
    /// fields so `int *load(void)` yields `load`. Qualified names give their
    /// last segment. Grammars without a name field fall back to the first
    /// identifier-like child.
    pub fn declared_name<'a>(&self, field: &str, source: &'a str) -> Option<&'a str> {
        let mut node = match self.child_by_field(field) {
            Some(node) => node,
            None => self.children.iter().find(|c| is_identifier_like(&c.kind))?,
        };
        while node.kind.ends_with("declarator") {
            node = node.child_by_field("declarator")?;
        }
        let name = if is_identifier_like(&node.kind) || node.children.is_empty() {
            node.text(source)
        } else {
            node.last_identifier(source)?
        };
        let name = name.trim();
        (!name.is_empty()).then_some(name)
    }
}

fn is_identifier_like(kind: &str) -> bool {
    if matches!(kind, "identifier" | "constant") {
        return true;
    }
    if matches!(
        kind,
        "scoped_identifier" | "scoped_type_identifier" | "qualified_identifier"
    ) {
        return false;
    }
    kind.ends_with("_identifier")
}

/// Parser collaborator returning typed syntax trees
pub trait SyntaxParser: Send + Sync {
    fn supports(&self, language: Language) -> bool;

    fn parse(&self, language: Language, source: &str) -> Result<SyntaxNode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path("src/lib.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("app/models.PY"), Some(Language::Python));
        assert_eq!(Language::from_path("web/index.tsx"), None);
        assert_eq!(Language::from_path("cmd/main.go"), Some(Language::Go));
        assert_eq!(Language::from_path("include/store.hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_path("app/Main.kt"), Some(Language::Kotlin));
        assert_eq!(Language::from_path("lib/user.rb"), Some(Language::Ruby));
        assert_eq!(Language::from_path("README"), None);
    }

    #[test]
    fn test_definition_tables() {
        let def = Language::Rust.definition_for("struct_item").unwrap();
        assert_eq!(def.category, "struct");
        assert!(Language::Python.definition_for("struct_item").is_none());
        assert_eq!(Language::Rust.scope_for("impl_item"), Some("type"));
        assert!(Language::Python.is_call("call"));
        assert!(!Language::Python.is_call("call_expression"));
        assert!(Language::Java.is_call("method_invocation"));
        assert_eq!(Language::Java.callee_field(), Some("name"));
        for language in Language::ALL {
            assert!(!language.definitions().is_empty(), "{language}");
        }
    }

    #[test]
    fn test_declared_name_follows_declarators() {
        // int *load(void)
        let source = "int *load(void)";
        let node = SyntaxNode::new("function_definition", 0, source.len()).with_child(
            SyntaxNode::new("pointer_declarator", 4, 15)
                .with_field("declarator")
                .with_child(
                    SyntaxNode::new("function_declarator", 5, 15)
                        .with_field("declarator")
                        .with_child(SyntaxNode::new("identifier", 5, 9).with_field("declarator"))
                        .with_child(SyntaxNode::new("parameter_list", 9, 15).with_field("parameters")),
                ),
        );
        assert_eq!(node.declared_name("declarator", source), Some("load"));
    }

    #[test]
    fn test_declared_name_without_field() {
        let source = "class Store";
        let node = SyntaxNode::new("class_declaration", 0, source.len())
            .with_child(SyntaxNode::new("type_identifier", 6, 11));
        assert_eq!(node.declared_name("name", source), Some("Store"));

        let source = "Repo::load";
        let qualified = SyntaxNode::new("function_declarator", 0, 10).with_child(
            SyntaxNode::new("qualified_identifier", 0, 10)
                .with_field("declarator")
                .with_child(SyntaxNode::new("namespace_identifier", 0, 4).with_field("scope"))
                .with_child(SyntaxNode::new("identifier", 6, 10).with_field("name")),
        );
        let node = SyntaxNode::new("function_definition", 0, 10)
            .with_child(qualified.with_field("declarator"));
        assert_eq!(node.declared_name("declarator", source), Some("load"));
    }

    #[test]
    fn test_last_identifier_resolves_paths() {
        let source = "crate::store::load";
        let node = SyntaxNode::new("scoped_identifier", 0, source.len())
            .with_child(SyntaxNode::new("scoped_identifier", 0, 12).with_field("path"))
            .with_child(SyntaxNode::new("identifier", 14, 18).with_field("name"));
        assert_eq!(node.last_identifier(source), Some("load"));
    }
}
