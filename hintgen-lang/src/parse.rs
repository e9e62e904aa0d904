// Tree-sitter front-end: parse Python-subset source and lower the concrete
// syntax tree into an owned `Node` tree.
//
// Parentheses, comments, and layout do not survive lowering; the printer
// reintroduces the parentheses precedence requires. Constructs outside the
// teaching subset are rejected as `LangError::Unsupported`.

use tracing::debug;
use tree_sitter::Node as TsNode;

use crate::ast::{Kind, Node};
use crate::{LangError, Result, Span};

/// Parse a whole program into a `Module` tree.
pub fn parse(source: &str) -> Result<Node> {
    let tree = parse_raw(source)?;
    let root = tree.root_node();
    if root.has_error() {
        let err = first_error(root, source);
        debug!(%err, "source does not parse");
        return Err(err);
    }
    Lowerer { source }.module(root).inspect_err(|err| debug!(%err, "source outside the teaching subset"))
}

/// Parse a single expression, e.g. a test-case input such as `(22, True)`.
pub fn parse_expression(source: &str) -> Result<Node> {
    let module = parse(source)?;
    match module.children.as_slice() {
        [stmt] if stmt.kind == Kind::ExprStmt => Ok(stmt.children[0].clone()),
        _ => Err(LangError::Parse {
            line: 1,
            col: 0,
            message: format!("expected a single expression, got `{}`", source.trim()),
        }),
    }
}

/// A recoverable syntax problem located by tree-sitter's error recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxIssue {
    /// The parser inserted a zero-width token that the text lacks.
    Missing { span: Span, token: String },
    /// A run of text the parser could not fit into the grammar.
    Unexpected { span: Span, text: String },
}

impl SyntaxIssue {
    pub fn span(&self) -> Span {
        match self {
            Self::Missing { span, .. } | Self::Unexpected { span, .. } => *span,
        }
    }
}

/// All syntax problems in `source`, in document order. Empty when the text
/// parses cleanly.
pub fn diagnose(source: &str) -> Vec<SyntaxIssue> {
    let Ok(tree) = parse_raw(source) else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    collect_issues(tree.root_node(), source, &mut issues);
    issues
}

fn parse_raw(source: &str) -> Result<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| LangError::TreeSitter(e.to_string()))?;
    parser
        .parse(source, None)
        .ok_or_else(|| LangError::TreeSitter("parser produced no tree".to_string()))
}

fn collect_issues(node: TsNode<'_>, source: &str, out: &mut Vec<SyntaxIssue>) {
    if node.is_missing() {
        out.push(SyntaxIssue::Missing {
            span: node.start_position().into(),
            token: node.kind().to_string(),
        });
        return;
    }
    if node.is_error() {
        out.push(SyntaxIssue::Unexpected {
            span: node.start_position().into(),
            text: node_text(node, source).to_string(),
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_issues(child, source, out);
    }
}

fn first_error(root: TsNode<'_>, source: &str) -> LangError {
    let mut issues = Vec::new();
    collect_issues(root, source, &mut issues);
    match issues.into_iter().next() {
        Some(SyntaxIssue::Missing { span, token }) => LangError::Parse {
            line: span.line,
            col: span.col,
            message: format!("missing `{token}`"),
        },
        Some(SyntaxIssue::Unexpected { span, text }) => {
            let snippet: String = text.chars().take(20).collect();
            LangError::Parse {
                line: span.line,
                col: span.col,
                message: format!("unexpected `{}`", snippet.trim()),
            }
        }
        None => LangError::Parse {
            line: 1,
            col: 0,
            message: "invalid syntax".to_string(),
        },
    }
}

fn node_text<'a>(node: TsNode<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Named children without comments.
fn named_children(node: TsNode<'_>) -> Vec<TsNode<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

fn unsupported(node: TsNode<'_>) -> LangError {
    LangError::Unsupported {
        construct: node.kind().to_string(),
        line: node.start_position().row + 1,
    }
}

struct Lowerer<'s> {
    source: &'s str,
}

impl Lowerer<'_> {
    fn text(&self, node: TsNode<'_>) -> &str {
        node_text(node, self.source)
    }

    fn field<'t>(&self, node: TsNode<'t>, name: &str) -> Result<TsNode<'t>> {
        node.child_by_field_name(name).ok_or_else(|| LangError::Parse {
            line: node.start_position().row + 1,
            col: node.start_position().column,
            message: format!("`{}` is missing its {name}", node.kind()),
        })
    }

    fn module(&self, root: TsNode<'_>) -> Result<Node> {
        let stmts = self.statements(root)?;
        Ok(Node::new(Kind::Module, stmts).with_span(Span { line: 1, col: 0 }))
    }

    fn statements(&self, node: TsNode<'_>) -> Result<Vec<Node>> {
        named_children(node)
            .into_iter()
            .map(|child| self.statement(child))
            .collect()
    }

    fn block(&self, node: TsNode<'_>) -> Result<Node> {
        Ok(Node::new(Kind::Block, self.statements(node)?).with_span(node.start_position().into()))
    }

    fn statement(&self, node: TsNode<'_>) -> Result<Node> {
        let span: Span = node.start_position().into();
        let lowered = match node.kind() {
            "function_definition" => {
                let name = self.text(self.field(node, "name")?).to_string();
                let params = self.parameters(self.field(node, "parameters")?)?;
                let body = self.block(self.field(node, "body")?)?;
                Node::labeled(Kind::FunctionDef, name, vec![params, body])
            }
            "return_statement" => {
                let value = named_children(node)
                    .first()
                    .map(|v| self.expr(*v))
                    .transpose()?;
                Node::new(Kind::Return, value.into_iter().collect())
            }
            "expression_statement" => self.expression_statement(node)?,
            "if_statement" => self.if_statement(node)?,
            "while_statement" => {
                if node.child_by_field_name("alternative").is_some() {
                    return Err(unsupported(node));
                }
                let test = self.expr(self.field(node, "condition")?)?;
                let body = self.block(self.field(node, "body")?)?;
                Node::new(Kind::While, vec![test, body])
            }
            "for_statement" => {
                if node.child_by_field_name("alternative").is_some() || self.text(node).starts_with("async") {
                    return Err(unsupported(node));
                }
                let target = self.expr(self.field(node, "left")?)?;
                let iter = self.expr(self.field(node, "right")?)?;
                let body = self.block(self.field(node, "body")?)?;
                Node::new(Kind::For, vec![target, iter, body])
            }
            "pass_statement" => Node::new(Kind::Pass, Vec::new()),
            "break_statement" => Node::new(Kind::Break, Vec::new()),
            "continue_statement" => Node::new(Kind::Continue, Vec::new()),
            "import_statement" => {
                let mut cursor = node.walk();
                let names = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| self.alias(n))
                    .collect::<Result<Vec<_>>>()?;
                Node::new(Kind::Import, names)
            }
            "import_from_statement" => {
                let module = self.text(self.field(node, "module_name")?).to_string();
                let mut names = {
                    let mut cursor = node.walk();
                    node.children_by_field_name("name", &mut cursor)
                        .map(|n| self.alias(n))
                        .collect::<Result<Vec<_>>>()?
                };
                if named_children(node).iter().any(|c| c.kind() == "wildcard_import") {
                    names.push(Node::leaf(Kind::Alias, "*"));
                }
                Node::labeled(Kind::ImportFrom, module, names)
            }
            _ => return Err(unsupported(node)),
        };
        Ok(lowered.with_span(span))
    }

    fn parameters(&self, node: TsNode<'_>) -> Result<Node> {
        let params = named_children(node)
            .into_iter()
            .map(|p| {
                let span: Span = p.start_position().into();
                match p.kind() {
                    "identifier" => Ok(Node::leaf(Kind::Param, self.text(p)).with_span(span)),
                    "default_parameter" => {
                        let name = self.text(self.field(p, "name")?).to_string();
                        let default = self.expr(self.field(p, "value")?)?;
                        Ok(Node::labeled(Kind::Param, name, vec![default]).with_span(span))
                    }
                    "typed_parameter" => {
                        let name = named_children(p)
                            .into_iter()
                            .find(|c| c.kind() == "identifier")
                            .ok_or_else(|| unsupported(p))?;
                        Ok(Node::leaf(Kind::Param, self.text(name)).with_span(span))
                    }
                    _ => Err(unsupported(p)),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Node::new(Kind::Params, params).with_span(node.start_position().into()))
    }

    fn alias(&self, node: TsNode<'_>) -> Result<Node> {
        let span: Span = node.start_position().into();
        match node.kind() {
            "dotted_name" | "identifier" => Ok(Node::leaf(Kind::Alias, self.text(node)).with_span(span)),
            "aliased_import" => {
                let name = self.text(self.field(node, "name")?).to_string();
                let alias = self.field(node, "alias")?;
                let as_name = Node::name(self.text(alias)).with_span(alias.start_position().into());
                Ok(Node::labeled(Kind::Alias, name, vec![as_name]).with_span(span))
            }
            _ => Err(unsupported(node)),
        }
    }

    fn expression_statement(&self, node: TsNode<'_>) -> Result<Node> {
        let children = named_children(node);
        if children.len() > 1 {
            let elts = children
                .into_iter()
                .map(|c| self.expr(c))
                .collect::<Result<Vec<_>>>()?;
            let span = node.start_position().into();
            return Ok(Node::new(Kind::ExprStmt, vec![Node::new(Kind::Tuple, elts).with_span(span)]));
        }
        let Some(inner) = children.first().copied() else {
            return Err(unsupported(node));
        };
        match inner.kind() {
            "assignment" => {
                if inner.child_by_field_name("type").is_some() {
                    return Err(unsupported(inner));
                }
                let right = self.field(inner, "right")?;
                if matches!(right.kind(), "assignment" | "yield" | "augmented_assignment") {
                    return Err(unsupported(right));
                }
                let target = self.expr(self.field(inner, "left")?)?;
                let value = self.expr(right)?;
                Ok(Node::new(Kind::Assign, vec![target, value]))
            }
            "augmented_assignment" => {
                let op_node = self.field(inner, "operator")?;
                let symbol = self.text(op_node).trim_end_matches('=').to_string();
                let target = self.expr(self.field(inner, "left")?)?;
                let value = self.expr(self.field(inner, "right")?)?;
                Ok(Node::new(
                    Kind::AugAssign,
                    vec![target, Node::op(symbol).with_span(op_node.start_position().into()), value],
                ))
            }
            _ => Ok(Node::new(Kind::ExprStmt, vec![self.expr(inner)?])),
        }
    }

    fn if_statement(&self, node: TsNode<'_>) -> Result<Node> {
        let test = self.expr(self.field(node, "condition")?)?;
        let body = self.block(self.field(node, "consequence")?)?;

        let alternatives: Vec<TsNode<'_>> = {
            let mut cursor = node.walk();
            node.children_by_field_name("alternative", &mut cursor)
                .collect()
        };

        // Fold `elif` clauses right to left into nested `If`s in else-blocks.
        let mut orelse = Node::new(Kind::Block, Vec::new());
        for alt in alternatives.iter().rev() {
            match alt.kind() {
                "else_clause" => {
                    orelse = self.block(self.field(*alt, "body")?)?;
                }
                "elif_clause" => {
                    let span: Span = alt.start_position().into();
                    let elif_test = self.expr(self.field(*alt, "condition")?)?;
                    let elif_body = self.block(self.field(*alt, "consequence")?)?;
                    let nested = Node::new(Kind::If, vec![elif_test, elif_body, orelse]).with_span(span);
                    orelse = Node::new(Kind::Block, vec![nested]).with_span(span);
                }
                _ => return Err(unsupported(*alt)),
            }
        }
        Ok(Node::new(Kind::If, vec![test, body, orelse]))
    }

    #[allow(clippy::too_many_lines)]
    fn expr(&self, node: TsNode<'_>) -> Result<Node> {
        let span: Span = node.start_position().into();
        let lowered = match node.kind() {
            "identifier" => Node::name(self.text(node)),
            "integer" | "float" => Node::leaf(Kind::Num, self.text(node)),
            "string" => {
                let mut cursor = node.walk();
                if node.children(&mut cursor).any(|c| c.kind() == "interpolation") {
                    return Err(unsupported(node));
                }
                Node::leaf(Kind::Str, self.text(node))
            }
            "true" => Node::leaf(Kind::Bool, "True"),
            "false" => Node::leaf(Kind::Bool, "False"),
            "none" => Node::leaf(Kind::NoneLit, "None"),
            "parenthesized_expression" => {
                let inner = named_children(node)
                    .first()
                    .copied()
                    .ok_or_else(|| unsupported(node))?;
                return self.expr(inner);
            }
            "binary_operator" => {
                let op_node = self.field(node, "operator")?;
                Node::new(
                    Kind::BinOp,
                    vec![
                        self.expr(self.field(node, "left")?)?,
                        Node::op(self.text(op_node)).with_span(op_node.start_position().into()),
                        self.expr(self.field(node, "right")?)?,
                    ],
                )
            }
            "boolean_operator" => {
                let op_node = self.field(node, "operator")?;
                let symbol = self.text(op_node).to_string();
                let left_node = self.field(node, "left")?;
                let left = self.expr(left_node)?;
                let right = self.expr(self.field(node, "right")?)?;
                // Unparenthesized `a and b and c` is one n-ary operation.
                let mut children = if left_node.kind() == "boolean_operator"
                    && left.operator() == Some(symbol.as_str())
                {
                    left.children
                } else {
                    vec![
                        Node::op(symbol.clone()).with_span(op_node.start_position().into()),
                        left,
                    ]
                };
                children.push(right);
                Node::new(Kind::BoolOp, children)
            }
            "not_operator" => Node::new(
                Kind::UnaryOp,
                vec![
                    Node::op("not").with_span(span),
                    self.expr(self.field(node, "argument")?)?,
                ],
            ),
            "unary_operator" => {
                let op_node = self.field(node, "operator")?;
                Node::new(
                    Kind::UnaryOp,
                    vec![
                        Node::op(self.text(op_node)).with_span(op_node.start_position().into()),
                        self.expr(self.field(node, "argument")?)?,
                    ],
                )
            }
            "comparison_operator" => {
                let mut children = Vec::new();
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "comment" {
                        continue;
                    }
                    if child.is_named() {
                        children.push(self.expr(child)?);
                    } else {
                        let symbol = self.text(child).split_whitespace().collect::<Vec<_>>().join(" ");
                        children.push(Node::op(symbol).with_span(child.start_position().into()));
                    }
                }
                Node::new(Kind::Compare, children)
            }
            "call" => {
                let func = self.expr(self.field(node, "function")?)?;
                let args_node = self.field(node, "arguments")?;
                if args_node.kind() != "argument_list" {
                    return Err(unsupported(args_node));
                }
                let mut children = vec![func];
                for arg in named_children(args_node) {
                    children.push(match arg.kind() {
                        "keyword_argument" => {
                            let name = self.text(self.field(arg, "name")?).to_string();
                            let value = self.expr(self.field(arg, "value")?)?;
                            Node::labeled(Kind::Keyword, name, vec![value])
                                .with_span(arg.start_position().into())
                        }
                        _ => self.expr(arg)?,
                    });
                }
                Node::new(Kind::Call, children)
            }
            "attribute" => {
                let object = self.expr(self.field(node, "object")?)?;
                let attr = self.text(self.field(node, "attribute")?).to_string();
                Node::labeled(Kind::Attribute, attr, vec![object])
            }
            "subscript" => {
                let value = self.expr(self.field(node, "value")?)?;
                let indices: Vec<TsNode<'_>> = {
                    let mut cursor = node.walk();
                    node.children_by_field_name("subscript", &mut cursor)
                        .collect()
                };
                let index = match indices.as_slice() {
                    [single] => self.expr(*single)?,
                    many => Node::new(
                        Kind::Tuple,
                        many.iter().map(|i| self.expr(*i)).collect::<Result<Vec<_>>>()?,
                    ),
                };
                Node::new(Kind::Subscript, vec![value, index])
            }
            "slice" => {
                let mut parts = vec![
                    Node::new(Kind::Empty, Vec::new()),
                    Node::new(Kind::Empty, Vec::new()),
                    Node::new(Kind::Empty, Vec::new()),
                ];
                let mut slot = 0usize;
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == ":" {
                        slot += 1;
                    } else if child.is_named() && child.kind() != "comment" && slot < 3 {
                        parts[slot] = self.expr(child)?;
                    }
                }
                Node::new(Kind::Slice, parts)
            }
            "conditional_expression" => {
                let parts = named_children(node);
                let [body, test, orelse] = parts.as_slice() else {
                    return Err(unsupported(node));
                };
                Node::new(
                    Kind::IfExp,
                    vec![self.expr(*body)?, self.expr(*test)?, self.expr(*orelse)?],
                )
            }
            "list" | "list_pattern" => Node::new(Kind::List, self.elements(node)?),
            "tuple" | "expression_list" | "pattern_list" | "tuple_pattern" => {
                Node::new(Kind::Tuple, self.elements(node)?)
            }
            "dictionary" => {
                let pairs = named_children(node)
                    .into_iter()
                    .map(|p| {
                        if p.kind() != "pair" {
                            return Err(unsupported(p));
                        }
                        Ok(Node::new(
                            Kind::Pair,
                            vec![
                                self.expr(self.field(p, "key")?)?,
                                self.expr(self.field(p, "value")?)?,
                            ],
                        )
                        .with_span(p.start_position().into()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Node::new(Kind::Dict, pairs)
            }
            "list_comprehension" => self.list_comprehension(node)?,
            _ => return Err(unsupported(node)),
        };
        Ok(lowered.with_span(span))
    }

    fn elements(&self, node: TsNode<'_>) -> Result<Vec<Node>> {
        named_children(node)
            .into_iter()
            .map(|e| {
                if e.kind().ends_with("splat") || e.kind() == "list_splat_pattern" {
                    return Err(unsupported(e));
                }
                self.expr(e)
            })
            .collect()
    }

    fn list_comprehension(&self, node: TsNode<'_>) -> Result<Node> {
        let elt = self.expr(self.field(node, "body")?)?;
        let mut children = vec![elt];
        for clause in named_children(node).into_iter().skip(1) {
            match clause.kind() {
                "for_in_clause" => {
                    let target = self.expr(self.field(clause, "left")?)?;
                    let iter = self.expr(self.field(clause, "right")?)?;
                    children.push(
                        Node::new(Kind::Comprehension, vec![target, iter])
                            .with_span(clause.start_position().into()),
                    );
                }
                "if_clause" => {
                    let cond = named_children(clause)
                        .first()
                        .copied()
                        .ok_or_else(|| unsupported(clause))?;
                    let cond = self.expr(cond)?;
                    match children.last_mut() {
                        Some(last) if last.kind == Kind::Comprehension => last.children.push(cond),
                        _ => return Err(unsupported(clause)),
                    }
                }
                _ => return Err(unsupported(clause)),
            }
        }
        Ok(Node::new(Kind::ListComp, children))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_function_with_comparison() {
        let tree = parse("def f(age):\n    return age > 21  # check\n").unwrap();
        assert_eq!(tree.kind, Kind::Module);
        let def = &tree.children[0];
        assert_eq!(def.kind, Kind::FunctionDef);
        assert_eq!(def.label(), "f");
        let ret = &def.children[1].children[0];
        assert_eq!(ret.kind, Kind::Return);
        let cmp = &ret.children[0];
        assert_eq!(cmp.kind, Kind::Compare);
        assert_eq!(cmp.operator(), Some(">"));
        assert_eq!(cmp.children[1].span, Some(Span { line: 2, col: 15 }));
    }

    #[test]
    fn elif_chains_nest_in_else_blocks() {
        let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        let tree = parse(src).unwrap();
        let outer = &tree.children[0];
        assert_eq!(outer.kind, Kind::If);
        let inner = &outer.children[2].children[0];
        assert_eq!(inner.kind, Kind::If);
        assert_eq!(inner.children[2].children.len(), 1);
    }

    #[test]
    fn boolean_chains_flatten() {
        let tree = parse_expression("a and b and c").unwrap();
        assert_eq!(tree.kind, Kind::BoolOp);
        assert_eq!(tree.children.len(), 4);
        let grouped = parse_expression("a and (b and c)").unwrap();
        assert_eq!(grouped.children.len(), 3);
    }

    #[test]
    fn negated_membership_is_one_operator() {
        let tree = parse_expression("x not in xs").unwrap();
        assert_eq!(tree.operator(), Some("not in"));
    }

    #[test]
    fn missing_colon_is_a_parse_error() {
        let err = parse("def f(x)\n    return x\n").unwrap_err();
        assert!(matches!(err, LangError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn unsupported_constructs_are_rejected() {
        let err = parse("f = lambda x: x\n").unwrap_err();
        assert!(matches!(err, LangError::Unsupported { .. }));
    }

    #[test]
    fn diagnose_reports_nothing_for_valid_code() {
        assert!(diagnose("x = 1\n").is_empty());
        assert!(!diagnose("x = (1\n").is_empty());
    }
}
