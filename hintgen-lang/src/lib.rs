pub mod ast;
pub mod eval;
pub mod names;
pub mod parse;
pub mod print;

use serde::{Deserialize, Serialize};

pub use ast::{Kind, Node, TreeId, TreePath};
pub use eval::{Interpreter, Value};
pub use parse::{SyntaxIssue, diagnose, parse, parse_expression};
pub use print::print_tree;

/// Error type for the teaching-language front-end.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LangError {
    #[error("Syntax error at line {line}, column {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unsupported construct `{construct}` at line {line}")]
    Unsupported { construct: String, line: usize },

    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Step budget of {0} exhausted")]
    OutOfFuel(u64),
}

pub type Result<T> = std::result::Result<T, LangError>;

// ── Span type ──────────────────────────────────────────────────────

/// Source position of a node: 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl From<tree_sitter::Point> for Span {
    fn from(p: tree_sitter::Point) -> Self {
        Self {
            line: p.row + 1,
            col: p.column,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}
