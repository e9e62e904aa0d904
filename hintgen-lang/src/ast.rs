// Owned, mutable syntax tree for the teaching language.
//
// Every construct is a `Node { kind, label, children }`. Operators are leaf
// `Op` children so an operator change is a single-token edit. Child layouts
// per kind are documented on `Kind`.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::Span;

/// Path-stable identity of a node, assigned before normalization so that
/// normalized nodes can be traced back to the student's original tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeId(pub u32);

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Child-index path from the root to a node.
pub type TreePath = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Statements.
    Module,
    /// Statements of a compound statement's suite.
    Block,
    /// `label` = name; `[Params, Block]`.
    FunctionDef,
    /// `Param*`.
    Params,
    /// `label` = name; `[default]?`.
    Param,
    /// `[value]?`.
    Return,
    /// `[target, value]`.
    Assign,
    /// `[target, Op, value]`.
    AugAssign,
    /// `[test, Block, Block]`; the second block is the `else` suite.
    If,
    /// `[test, Block]`.
    While,
    /// `[target, iter, Block]`.
    For,
    Break,
    Continue,
    Pass,
    /// `[expr]`.
    ExprStmt,
    /// `Alias*`.
    Import,
    /// `label` = module; `Alias*`.
    ImportFrom,
    /// `label` = imported name; `[Name]?` for `as` renames.
    Alias,
    /// `[left, Op, right]`.
    BinOp,
    /// `[Op, operand, operand, ...]`.
    BoolOp,
    /// `[Op, operand]`.
    UnaryOp,
    /// `[left, Op, right, (Op, right)*]`.
    Compare,
    /// `[func, arg*]`, keyword arguments as `Keyword`.
    Call,
    /// `label` = keyword; `[value]`.
    Keyword,
    /// `label` = attribute; `[value]`.
    Attribute,
    /// `[value, index]`.
    Subscript,
    /// `[lower, upper, step]`, absent parts are `Empty`.
    Slice,
    /// `[body, test, orelse]`.
    IfExp,
    /// `[elt, Comprehension+]`.
    ListComp,
    /// `[target, iter, cond*]`.
    Comprehension,
    List,
    Tuple,
    /// `Pair*`.
    Dict,
    /// `[key, value]`.
    Pair,
    Name,
    Num,
    Str,
    Bool,
    NoneLit,
    Op,
    Empty,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "Module",
            Self::Block => "Block",
            Self::FunctionDef => "FunctionDef",
            Self::Params => "Params",
            Self::Param => "Param",
            Self::Return => "Return",
            Self::Assign => "Assign",
            Self::AugAssign => "AugAssign",
            Self::If => "If",
            Self::While => "While",
            Self::For => "For",
            Self::Break => "Break",
            Self::Continue => "Continue",
            Self::Pass => "Pass",
            Self::ExprStmt => "ExprStmt",
            Self::Import => "Import",
            Self::ImportFrom => "ImportFrom",
            Self::Alias => "Alias",
            Self::BinOp => "BinOp",
            Self::BoolOp => "BoolOp",
            Self::UnaryOp => "UnaryOp",
            Self::Compare => "Compare",
            Self::Call => "Call",
            Self::Keyword => "Keyword",
            Self::Attribute => "Attribute",
            Self::Subscript => "Subscript",
            Self::Slice => "Slice",
            Self::IfExp => "IfExp",
            Self::ListComp => "ListComp",
            Self::Comprehension => "Comprehension",
            Self::List => "List",
            Self::Tuple => "Tuple",
            Self::Dict => "Dict",
            Self::Pair => "Pair",
            Self::Name => "Name",
            Self::Num => "Num",
            Self::Str => "Str",
            Self::Bool => "Bool",
            Self::NoneLit => "None",
            Self::Op => "Op",
            Self::Empty => "Empty",
        }
    }

    /// Human-readable noun used in hint messages.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Module => "program",
            Self::Block => "block of code",
            Self::FunctionDef => "function definition",
            Self::Params => "parameter list",
            Self::Param => "parameter",
            Self::Return => "return statement",
            Self::Assign => "assignment",
            Self::AugAssign => "augmented assignment",
            Self::If => "if statement",
            Self::While => "while loop",
            Self::For => "for loop",
            Self::Break => "break statement",
            Self::Continue => "continue statement",
            Self::Pass => "pass statement",
            Self::ExprStmt => "expression statement",
            Self::Import | Self::ImportFrom => "import",
            Self::Alias => "imported name",
            Self::BinOp => "arithmetic operation",
            Self::BoolOp => "boolean operation",
            Self::UnaryOp => "unary operation",
            Self::Compare => "comparison",
            Self::Call => "function call",
            Self::Keyword => "keyword argument",
            Self::Attribute => "attribute access",
            Self::Subscript => "index",
            Self::Slice => "slice",
            Self::IfExp => "conditional expression",
            Self::ListComp => "list comprehension",
            Self::Comprehension => "comprehension clause",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dictionary",
            Self::Pair => "key-value pair",
            Self::Name => "variable",
            Self::Num => "number",
            Self::Str => "string",
            Self::Bool => "boolean value",
            Self::NoneLit => "None value",
            Self::Op => "operator",
            Self::Empty => "empty slot",
        }
    }

    /// Pure containers contribute nothing to a tree's structural weight.
    pub fn is_container(self) -> bool {
        matches!(self, Self::Module | Self::Block | Self::Params)
    }

    /// Kinds whose children form an open-ended sequence rather than fixed
    /// slots; the differ aligns these instead of pairing positionally.
    pub fn has_variable_arity(self) -> bool {
        matches!(
            self,
            Self::Module
                | Self::Block
                | Self::Params
                | Self::Import
                | Self::ImportFrom
                | Self::Call
                | Self::BoolOp
                | Self::Compare
                | Self::List
                | Self::Tuple
                | Self::Dict
                | Self::ListComp
                | Self::Comprehension
        )
    }

    pub fn is_statement(self) -> bool {
        matches!(
            self,
            Self::FunctionDef
                | Self::Return
                | Self::Assign
                | Self::AugAssign
                | Self::If
                | Self::While
                | Self::For
                | Self::Break
                | Self::Continue
                | Self::Pass
                | Self::ExprStmt
                | Self::Import
                | Self::ImportFrom
        )
    }

    /// Literal leaves whose label is a value rather than a name.
    pub fn is_literal(self) -> bool {
        matches!(self, Self::Num | Self::Str | Self::Bool | Self::NoneLit)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A syntax tree node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TreeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Node {
    pub fn new(kind: Kind, children: Vec<Node>) -> Self {
        Self {
            kind,
            label: None,
            children,
            id: None,
            span: None,
        }
    }

    pub fn labeled(kind: Kind, label: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            kind,
            label: Some(label.into()),
            children,
            id: None,
            span: None,
        }
    }

    pub fn leaf(kind: Kind, label: impl Into<String>) -> Self {
        Self::labeled(kind, label, Vec::new())
    }

    pub fn name(id: impl Into<String>) -> Self {
        Self::leaf(Kind::Name, id)
    }

    pub fn op(symbol: impl Into<String>) -> Self {
        Self::leaf(Kind::Op, symbol)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// Operator symbol of an operator-bearing expression (`BinOp`, `BoolOp`,
    /// `UnaryOp`, `AugAssign`, single-operator `Compare`).
    pub fn operator(&self) -> Option<&str> {
        let idx = match self.kind {
            Kind::BinOp | Kind::AugAssign | Kind::Compare => 1,
            Kind::BoolOp | Kind::UnaryOp => 0,
            _ => return None,
        };
        self.children
            .get(idx)
            .filter(|c| c.kind == Kind::Op)
            .map(Node::label)
    }

    /// Equality on kind, label, and children; ids and spans are ignored.
    pub fn structurally_eq(&self, other: &Node) -> bool {
        self.kind == other.kind
            && self.label == other.label
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structurally_eq(b))
    }

    /// Feed the node's structure (not its ids or spans) into a hasher.
    pub fn hash_structure<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.label.hash(state);
        self.children.len().hash(state);
        for child in &self.children {
            child.hash_structure(state);
        }
    }

    pub fn structural_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash_structure(&mut hasher);
        hasher.finish()
    }

    /// Structural weight: the number of non-container nodes in the subtree.
    pub fn weight(&self) -> u32 {
        let own = u32::from(!self.kind.is_container());
        own + self.children.iter().map(Node::weight).sum::<u32>()
    }

    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }

    pub fn get(&self, path: &[usize]) -> Option<&Node> {
        let mut node = self;
        for &i in path {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = self;
        for &i in path {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }

    /// Preorder traversal.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Visit every node mutably in preorder.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Node)) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }

    /// Number every node in preorder, starting from zero. Returns the count.
    pub fn assign_ids(&mut self) -> u32 {
        let mut next = 0u32;
        self.for_each_mut(&mut |n| {
            n.id = Some(TreeId(next));
            next += 1;
        });
        next
    }

    pub fn clear_ids(&mut self) {
        self.for_each_mut(&mut |n| n.id = None);
    }

    /// Path of the node carrying `id`, if present.
    pub fn find_path(&self, id: TreeId) -> Option<TreePath> {
        fn go(node: &Node, id: TreeId, path: &mut TreePath) -> bool {
            if node.id == Some(id) {
                return true;
            }
            for (i, child) in node.children.iter().enumerate() {
                path.push(i);
                if go(child, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }
        let mut path = Vec::new();
        go(self, id, &mut path).then_some(path)
    }

    /// First source span found in this subtree (preorder).
    pub fn first_span(&self) -> Option<Span> {
        self.walk().find_map(|n| n.span)
    }

    /// Identifiers bound or referenced anywhere in the subtree.
    pub fn names(&self) -> Vec<&str> {
        self.walk()
            .filter(|n| n.kind == Kind::Name)
            .map(Node::label)
            .collect()
    }
}

/// Preorder iterator over a subtree.
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn compare(op: &str) -> Node {
        Node::new(
            Kind::Compare,
            vec![Node::name("age"), Node::op(op), Node::leaf(Kind::Num, "21")],
        )
    }

    #[test]
    fn structural_equality_ignores_ids_and_spans() {
        let mut a = compare(">=");
        let b = compare(">=").with_span(Span { line: 3, col: 4 });
        a.assign_ids();
        assert!(a.structurally_eq(&b));
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert!(!a.structurally_eq(&compare(">")));
    }

    #[test]
    fn weight_skips_containers() {
        let block = Node::new(
            Kind::Block,
            vec![Node::new(Kind::Return, vec![compare(">")])],
        );
        // Return + Compare + 3 leaves
        assert_eq!(block.weight(), 5);
        assert_eq!(block.size(), 6);
    }

    #[test]
    fn assign_ids_is_preorder_and_findable() {
        let mut tree = Node::new(Kind::Return, vec![compare(">")]);
        assert_eq!(tree.assign_ids(), 5);
        assert_eq!(tree.find_path(TreeId(3)), Some(vec![0, 1]));
        assert_eq!(tree.get(&[0, 1]).map(Node::label), Some(">"));
        assert_eq!(tree.find_path(TreeId(99)), None);
    }

    #[test]
    fn operator_lookup() {
        assert_eq!(compare("<").operator(), Some("<"));
        assert_eq!(Node::name("x").operator(), None);
    }
}
