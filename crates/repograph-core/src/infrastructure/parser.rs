//! Tree-sitter backed syntax parser
//!
//! Converts tree-sitter's borrowed trees into owned [`SyntaxNode`] trees of
//! named nodes so extraction never holds parser state across await points.

use tree_sitter::{Node, Parser};

use crate::domain::extraction::{Language, SyntaxNode, SyntaxParser};
use crate::error::{Error, Result};

/// Nodes deeper than this are not converted
pub const MAX_TREE_DEPTH: usize = 512;

/// Parser for every [`Language`]
#[derive(Debug, Clone)]
pub struct TreeSitterParser {
    max_depth: usize,
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeSitterParser {
    pub fn new() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    fn grammar(language: Language) -> tree_sitter::Language {
        match language {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Language::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
        }
    }
}

impl SyntaxParser for TreeSitterParser {
    fn supports(&self, _language: Language) -> bool {
        true
    }

    fn parse(&self, language: Language, source: &str) -> Result<SyntaxNode> {
        // Parser is not Sync; one per call
        let mut parser = Parser::new();
        parser
            .set_language(&Self::grammar(language))
            .map_err(|e| Error::Extraction(format!("Failed to set language {language}: {e}")))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| Error::Extraction(format!("{language} parser returned no tree")))?;

        let root = tree.root_node();
        if root.has_error() {
            tracing::debug!(language = %language, "Syntax tree contains error nodes");
        }

        Ok(convert(root, None, 0, self.max_depth))
    }
}

/// Copy `node` and its named descendants, threading the depth explicitly
fn convert(node: Node<'_>, field: Option<&str>, depth: usize, max_depth: usize) -> SyntaxNode {
    let start = node.start_position();
    let end = node.end_position();
    let mut out = SyntaxNode::new(node.kind(), node.start_byte(), node.end_byte())
        .with_lines(start.row + 1, end.row + 1);
    if let Some(field) = field {
        out = out.with_field(field);
    }

    if depth + 1 >= max_depth {
        return out;
    }

    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() {
                out.children
                    .push(convert(child, cursor.field_name(), depth + 1, max_depth));
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(node: &'a SyntaxNode, kind: &str) -> Option<&'a SyntaxNode> {
        if node.kind == kind {
            return Some(node);
        }
        node.children.iter().find_map(|c| find(c, kind))
    }

    #[test]
    fn test_parse_rust_function() {
        let source = "fn load(path: &str) -> String {\n    read(path)\n}\n";
        let root = TreeSitterParser::new().parse(Language::Rust, source).unwrap();

        assert_eq!(root.kind, "source_file");
        let function = find(&root, "function_item").expect("function_item");
        let name = function.child_by_field("name").expect("name field");
        assert_eq!(name.text(source), "load");
        assert_eq!(function.start_line, 1);
        assert_eq!(function.end_line, 3);
        assert!(find(function, "call_expression").is_some());
    }

    #[test]
    fn test_parse_python_class() {
        let source = "class UserRepository:\n    def get(self, id):\n        return None\n";
        let root = TreeSitterParser::new().parse(Language::Python, source).unwrap();

        let class = find(&root, "class_definition").expect("class_definition");
        assert_eq!(class.child_by_field("name").unwrap().text(source), "UserRepository");
        let method = find(class, "function_definition").expect("method");
        assert_eq!(method.child_by_field("name").unwrap().text(source), "get");
    }

    #[test]
    fn test_parse_typescript_interface() {
        let source = "interface Store { get(key: string): string }\n";
        let root = TreeSitterParser::new()
            .parse(Language::TypeScript, source)
            .unwrap();
        assert!(find(&root, "interface_declaration").is_some());
    }

    #[test]
    fn test_every_language_has_a_grammar() {
        let parser = TreeSitterParser::new();
        for language in Language::ALL {
            let root = parser.parse(language, "").unwrap();
            assert!(root.children.is_empty(), "{language}");
        }
    }

    #[test]
    fn test_parse_go_method() {
        let source = "package store\n\nfunc (r *Repo) Load(id int) User {\n\treturn fetch(id)\n}\n";
        let root = TreeSitterParser::new().parse(Language::Go, source).unwrap();
        let method = find(&root, "method_declaration").expect("method_declaration");
        assert_eq!(method.declared_name("name", source), Some("Load"));
        assert!(find(method, "call_expression").is_some());
    }

    #[test]
    fn test_parse_c_function_name() {
        let source = "static char *load_user(int id) {\n    return fetch(id);\n}\n";
        let root = TreeSitterParser::new().parse(Language::C, source).unwrap();
        let function = find(&root, "function_definition").expect("function_definition");
        assert_eq!(function.declared_name("declarator", source), Some("load_user"));
    }

    #[test]
    fn test_parse_java_method_invocation() {
        let source = "class Repo {\n  User load(int id) { return fetch(id); }\n}\n";
        let root = TreeSitterParser::new().parse(Language::Java, source).unwrap();
        let call = find(&root, "method_invocation").expect("method_invocation");
        assert_eq!(call.child_by_field("name").unwrap().text(source), "fetch");
    }

    #[test]
    fn test_depth_cap_truncates() {
        let source = "fn a() { b(c(d(e(1)))) }";
        let root = TreeSitterParser::new()
            .with_max_depth(2)
            .parse(Language::Rust, source)
            .unwrap();
        assert!(!root.children.is_empty());
        assert!(root.children.iter().all(|c| c.children.is_empty()));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = TreeSitterParser::new();
        let source = "function greet(name) { return hello(name); }";
        let a = parser.parse(Language::JavaScript, source).unwrap();
        let b = parser.parse(Language::JavaScript, source).unwrap();
        assert_eq!(a, b);
    }
}
