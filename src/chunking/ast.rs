//! Syntax-aware cut points using tree-sitter.
//!
//! Walks top-level nodes and records the start of the line each one begins
//! on. Nodes longer than the chunk budget are descended into so their members
//! (methods, statements) become candidates too.
//!
//! Returns `None` when:
//! - the file exceeds MAX_FILE_SIZE (500 KB)
//! - the parse produces >30% error nodes
//! - the language has no grammar

use super::Language;

/// Files larger than this skip AST parsing entirely.
const MAX_FILE_SIZE: usize = 500 * 1024; // 500 KB

/// If more than this fraction of AST nodes are error nodes, fall back.
const ERROR_THRESHOLD: f64 = 0.30;

/// Byte offsets, ascending, where a chunk may start on a syntax boundary.
pub fn syntax_boundaries(content: &str, language: Language, budget: usize) -> Option<Vec<usize>> {
    if content.len() > MAX_FILE_SIZE {
        return None;
    }

    let mut parser = tree_sitter::Parser::new();
    let ts_language = language.tree_sitter_language()?;
    parser.set_language(&ts_language).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let (total, errors) = count_nodes(root);
    if total > 0 && (errors as f64 / total as f64) > ERROR_THRESHOLD {
        tracing::warn!(
            "AST error rate {:.0}% exceeds threshold, using text boundaries only",
            (errors as f64 / total as f64) * 100.0
        );
        return None;
    }

    let mut offsets = Vec::new();
    collect_boundaries(content, root, budget, &mut offsets);
    offsets.sort_unstable();
    offsets.dedup();
    Some(offsets)
}

fn collect_boundaries(
    content: &str,
    node: tree_sitter::Node,
    budget: usize,
    offsets: &mut Vec<usize>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(offset) = line_start_before(content, child.start_byte()) {
            if offset > 0 {
                offsets.push(offset);
            }
        }
        if child.end_byte() - child.start_byte() > budget {
            collect_boundaries(content, child, budget, offsets);
        }
    }
}

/// Start of the line containing `byte`, if only indentation precedes it.
fn line_start_before(content: &str, byte: usize) -> Option<usize> {
    let prefix = content.get(..byte)?;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    prefix[line_start..]
        .chars()
        .all(|c| c == ' ' || c == '\t')
        .then_some(line_start)
}

/// Count total nodes and error nodes in a tree.
fn count_nodes(node: tree_sitter::Node) -> (usize, usize) {
    let mut total = 1usize;
    let mut errors = if node.is_error() { 1usize } else { 0 };

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let (t, e) = count_nodes(child);
        total += t;
        errors += e;
    }

    (total, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_item_starts_are_boundaries() {
        let source = "use std::io;\n\nfn hello() {\n    println!(\"hi\");\n}\n\nfn world() {}\n";
        let offsets = syntax_boundaries(source, Language::Rust, 1500).unwrap();
        let hello = source.find("fn hello").unwrap();
        let world = source.find("fn world").unwrap();
        assert!(offsets.contains(&hello));
        assert!(offsets.contains(&world));
        assert!(!offsets.contains(&0));
    }

    #[test]
    fn test_large_nodes_expose_members() {
        let methods: String = (0..40)
            .map(|i| format!("    fn method_{i}(&self) -> usize {{\n        {i}\n    }}\n\n"))
            .collect();
        let source = format!("struct S;\n\nimpl S {{\n{methods}}}\n");
        let offsets = syntax_boundaries(&source, Language::Rust, 200).unwrap();
        let inner = source.find("    fn method_10").unwrap();
        assert!(offsets.contains(&inner), "indented method start should be a boundary");
    }

    #[test]
    fn test_typescript_and_javascript_parse() {
        let ts = "interface A { x: number }\n\nexport function f(a: A) { return a.x; }\n";
        let offsets = syntax_boundaries(ts, Language::TypeScript, 1500).unwrap();
        assert!(offsets.contains(&ts.find("export function").unwrap()));

        let js = "const a = 1;\nfunction b() { return a; }\n";
        let offsets = syntax_boundaries(js, Language::JavaScript, 1500).unwrap();
        assert!(offsets.contains(&js.find("function b").unwrap()));
    }

    #[test]
    fn test_skips_large_files() {
        let large = "x".repeat(MAX_FILE_SIZE + 1);
        assert!(syntax_boundaries(&large, Language::Rust, 1500).is_none());
    }

    #[test]
    fn test_unsupported_language_returns_none() {
        assert!(syntax_boundaries("some text", Language::Unknown, 1500).is_none());
    }
}
