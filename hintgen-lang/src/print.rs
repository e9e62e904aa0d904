// Pretty printer. Emits canonical layout (4-space indentation, one statement
// per line) and only the parentheses operator precedence requires, so
// `print(parse(print(t))) == print(t)` for every tree the parser produces.

use crate::ast::{Kind, Node};

const INDENT: &str = "    ";

/// Print a tree as source text. Modules and statements end with a newline;
/// bare expressions do not.
pub fn print_tree(node: &Node) -> String {
    match node.kind {
        Kind::Module | Kind::Block => {
            let mut printer = Printer::default();
            printer.statements(&node.children, node.kind == Kind::Block);
            printer.out
        }
        k if k.is_statement() => {
            let mut printer = Printer::default();
            printer.statement(node);
            printer.out
        }
        _ => expr(node, 0),
    }
}

/// Binding strength of an expression; higher binds tighter.
pub fn precedence(node: &Node) -> u8 {
    match node.kind {
        Kind::IfExp => 1,
        Kind::BoolOp => match node.operator() {
            Some("or") => 2,
            _ => 3,
        },
        Kind::UnaryOp => match node.operator() {
            Some("not") => 4,
            _ => 12,
        },
        Kind::Compare => 5,
        Kind::BinOp => match node.operator().unwrap_or("") {
            "|" => 6,
            "^" => 7,
            "&" => 8,
            "<<" | ">>" => 9,
            "+" | "-" => 10,
            "**" => 13,
            _ => 11,
        },
        _ => 15,
    }
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn statements(&mut self, stmts: &[Node], pass_if_empty: bool) {
        if stmts.is_empty() && pass_if_empty {
            self.line("pass");
        }
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    fn suite(&mut self, header: &str, block: &Node) {
        self.line(header);
        self.depth += 1;
        self.statements(&block.children, true);
        self.depth -= 1;
    }

    fn statement(&mut self, node: &Node) {
        let c = &node.children;
        match node.kind {
            Kind::FunctionDef => {
                let params = arg(c, 0)
                    .children
                    .iter()
                    .map(|p| match p.children.first() {
                        Some(default) => format!("{}={}", p.label(), expr(default, 1)),
                        None => p.label().to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                self.suite(&format!("def {}({params}):", node.label()), arg(c, 1));
            }
            Kind::Return => match c.first() {
                Some(value) => self.line(&format!("return {}", expr(value, 0))),
                None => self.line("return"),
            },
            Kind::Assign => self.line(&format!("{} = {}", expr(arg(c, 0), 0), expr(arg(c, 1), 0))),
            Kind::AugAssign => self.line(&format!(
                "{} {}= {}",
                expr(arg(c, 0), 0),
                arg(c, 1).label(),
                expr(arg(c, 2), 0)
            )),
            Kind::If => self.if_chain(node, "if"),
            Kind::While => self.suite(&format!("while {}:", expr(arg(c, 0), 0)), arg(c, 1)),
            Kind::For => self.suite(
                &format!("for {} in {}:", expr(arg(c, 0), 0), expr(arg(c, 1), 0)),
                arg(c, 2),
            ),
            Kind::Break => self.line("break"),
            Kind::Continue => self.line("continue"),
            Kind::Pass => self.line("pass"),
            Kind::ExprStmt => self.line(&expr(arg(c, 0), 0)),
            Kind::Import => self.line(&format!("import {}", aliases(c))),
            Kind::ImportFrom => self.line(&format!("from {} import {}", node.label(), aliases(c))),
            _ => self.line(&expr(node, 0)),
        }
    }

    fn if_chain(&mut self, node: &Node, keyword: &str) {
        let c = &node.children;
        self.suite(&format!("{keyword} {}:", expr(arg(c, 0), 0)), arg(c, 1));
        let orelse = arg(c, 2);
        match orelse.children.as_slice() {
            [] => {}
            [nested] if nested.kind == Kind::If => self.if_chain(nested, "elif"),
            _ => self.suite("else:", orelse),
        }
    }
}

static EMPTY: Node = Node {
    kind: Kind::Empty,
    label: None,
    children: Vec::new(),
    id: None,
    span: None,
};

/// Child `i`, or an empty node when a malformed tree lacks it.
fn arg(children: &[Node], i: usize) -> &Node {
    children.get(i).unwrap_or(&EMPTY)
}

fn rest(children: &[Node], from: usize) -> &[Node] {
    children.get(from..).unwrap_or(&[])
}

fn aliases(names: &[Node]) -> String {
    names
        .iter()
        .map(|a| match a.children.first() {
            Some(as_name) => format!("{} as {}", a.label(), as_name.label()),
            None => a.label().to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn join(items: &[Node], min: u8) -> String {
    items
        .iter()
        .map(|i| expr(i, min))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print an expression, parenthesizing it when it binds looser than `min`.
pub fn expr(node: &Node, min: u8) -> String {
    let text = raw_expr(node);
    if precedence(node) < min {
        format!("({text})")
    } else {
        text
    }
}

fn raw_expr(node: &Node) -> String {
    let c = &node.children;
    let p = precedence(node);
    match node.kind {
        Kind::Name | Kind::Num | Kind::Str | Kind::Bool | Kind::NoneLit | Kind::Op => {
            node.label().to_string()
        }
        Kind::Empty => String::new(),
        Kind::BinOp => {
            let (left_min, right_min) = if arg(c, 1).label() == "**" {
                (p + 1, 12)
            } else {
                (p, p + 1)
            };
            format!(
                "{} {} {}",
                expr(arg(c, 0), left_min),
                arg(c, 1).label(),
                expr(arg(c, 2), right_min)
            )
        }
        Kind::BoolOp => rest(c, 1)
            .iter()
            .map(|operand| expr(operand, p + 1))
            .collect::<Vec<_>>()
            .join(&format!(" {} ", arg(c, 0).label())),
        Kind::UnaryOp => {
            let op = arg(c, 0).label();
            if op == "not" {
                format!("not {}", expr(arg(c, 1), p))
            } else {
                format!("{op}{}", expr(arg(c, 1), p))
            }
        }
        Kind::Compare => {
            let mut out = expr(arg(c, 0), p + 1);
            for pair in rest(c, 1).chunks(2) {
                if let [op, right] = pair {
                    out.push_str(&format!(" {} {}", op.label(), expr(right, p + 1)));
                }
            }
            out
        }
        Kind::Call => {
            let args = rest(c, 1)
                .iter()
                .map(|a| {
                    if a.kind == Kind::Keyword {
                        format!("{}={}", a.label(), expr(arg(&a.children, 0), 1))
                    } else {
                        expr(a, 1)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({args})", expr(arg(c, 0), 15))
        }
        Kind::Keyword => format!("{}={}", node.label(), expr(arg(c, 0), 1)),
        Kind::Attribute => format!("{}.{}", expr(arg(c, 0), 15), node.label()),
        Kind::Subscript => format!("{}[{}]", expr(arg(c, 0), 15), expr(arg(c, 1), 0)),
        Kind::Slice => {
            let mut out = format!("{}:{}", expr(arg(c, 0), 1), expr(arg(c, 1), 1));
            if arg(c, 2).kind != Kind::Empty {
                out.push(':');
                out.push_str(&expr(arg(c, 2), 1));
            }
            out
        }
        Kind::IfExp => format!(
            "{} if {} else {}",
            expr(arg(c, 0), p + 1),
            expr(arg(c, 1), p + 1),
            expr(arg(c, 2), p)
        ),
        Kind::List => format!("[{}]", join(c, 1)),
        Kind::Tuple => match c.as_slice() {
            [single] => format!("({},)", expr(single, 1)),
            _ => format!("({})", join(c, 1)),
        },
        Kind::Dict => {
            let pairs = c
                .iter()
                .map(|pair| format!("{}: {}", expr(arg(&pair.children, 0), 1), expr(arg(&pair.children, 1), 1)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{pairs}}}")
        }
        Kind::Pair => format!("{}: {}", expr(arg(c, 0), 1), expr(arg(c, 1), 1)),
        Kind::ListComp => {
            let mut out = format!("[{}", expr(arg(c, 0), 1));
            for clause in rest(c, 1) {
                out.push_str(&raw_expr(clause));
            }
            out.push(']');
            out
        }
        Kind::Comprehension => {
            let mut out = format!(" for {} in {}", expr(arg(c, 0), 15), expr(arg(c, 1), 2));
            for cond in rest(c, 2) {
                out.push_str(&format!(" if {}", expr(cond, 2)));
            }
            out
        }
        // Statement kinds inside an expression slot: print as a statement.
        _ => print_tree(node).trim_end().to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::parse::{parse, parse_expression};

    fn round_trip(src: &str) -> String {
        print_tree(&parse(src).unwrap())
    }

    #[test]
    fn normalizes_layout_and_parentheses() {
        let src = "def f( a,b = 2 ):\n  if (a>b):   # wider\n        return ((a))\n  elif a == b :\n    pass\n  else:\n    return (a + b) * 2\n";
        insta::assert_snapshot!(round_trip(src), @r"
        def f(a, b=2):
            if a > b:
                return a
            elif a == b:
                pass
            else:
                return (a + b) * 2
        ");
    }

    #[test]
    fn printing_is_a_fixed_point() {
        let programs = [
            "x = [i * 2 for i in range(10) if i % 2 == 0]\n",
            "def g(s):\n    return s[1:-1] + s[::2]\n",
            "from math import sqrt as root, pi\nimport random\n",
            "total = 0\nfor (i, v) in enumerate(xs):\n    total += v ** -i\n",
            "y = a if not b else -(c ** 2)\n",
            "d = {'a': (1,), 'b': ()}\nwhile d and x not in d:\n    break\n",
        ];
        for src in programs {
            let once = round_trip(src);
            assert_eq!(round_trip(&once), once, "not a fixed point for {src:?}");
        }
    }

    #[test]
    fn empty_blocks_print_pass() {
        let tree = Node::new(
            Kind::Module,
            vec![Node::new(
                Kind::While,
                vec![Node::leaf(Kind::Bool, "True"), Node::new(Kind::Block, vec![])],
            )],
        );
        assert_eq!(print_tree(&tree), "while True:\n    pass\n");
    }

    #[test]
    fn power_binds_right() {
        assert_eq!(round_trip("x = (a ** b) ** c\n"), "x = (a ** b) ** c\n");
        assert_eq!(round_trip("x = a ** (b ** c)\n"), "x = a ** b ** c\n");
        assert_eq!(round_trip("x = (-a) ** b\n"), "x = (-a) ** b\n");
    }

    fn arb_expr() -> impl Strategy<Value = Node> {
        let leaf = prop_oneof![
            "[a-e]".prop_map(Node::name),
            (0u32..100).prop_map(|n| Node::leaf(Kind::Num, n.to_string())),
            Just(Node::leaf(Kind::Bool, "True")),
        ];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                (inner.clone(), prop::sample::select(vec!["+", "-", "*", "//", "**", "%"]), inner.clone())
                    .prop_map(|(l, op, r)| Node::new(Kind::BinOp, vec![l, Node::op(op), r])),
                (prop::sample::select(vec!["and", "or"]), prop::collection::vec(inner.clone(), 2..4))
                    .prop_map(|(op, mut xs)| {
                        xs.insert(0, Node::op(op));
                        Node::new(Kind::BoolOp, xs)
                    }),
                (prop::sample::select(vec!["not", "-"]), inner.clone())
                    .prop_map(|(op, x)| Node::new(Kind::UnaryOp, vec![Node::op(op), x])),
                (inner.clone(), prop::sample::select(vec!["<", ">=", "==", "not in", "is"]), inner.clone())
                    .prop_map(|(l, op, r)| Node::new(Kind::Compare, vec![l, Node::op(op), r])),
                (inner.clone(), inner.clone(), inner)
                    .prop_map(|(a, b, c)| Node::new(Kind::IfExp, vec![a, b, c])),
            ]
        })
    }

    proptest! {
        #[test]
        fn printed_expressions_parse_back_to_the_same_tree(tree in arb_expr()) {
            let text = expr(&tree, 0);
            let reparsed = parse_expression(&text).unwrap();
            prop_assert!(reparsed.structurally_eq(&tree), "{text}");
        }
    }
}
