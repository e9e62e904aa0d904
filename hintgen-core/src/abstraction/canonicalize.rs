// Semantics-preserving normalization of anonymized trees. Rewrites run
// bottom-up and repeat until nothing changes. A rewritten node keeps the id
// of the node it replaces; synthesized helper nodes carry no id.

use std::collections::HashMap;

use hintgen_lang::{Kind, Node, print_tree};
use tracing::debug;

use crate::config::{ArgType, ArgumentTypes};

const MAX_PASSES: usize = 16;

/// Normalize `tree` using the exercise's parameter type metadata.
pub fn canonicalize(tree: &Node, arguments: &ArgumentTypes) -> Node {
    let mut out = tree.clone();
    for pass in 0..MAX_PASSES {
        let env = TypeEnv::infer(&out, arguments);
        if !rewrite(&mut out, &env) {
            debug!(passes = pass + 1, "canonical form reached");
            break;
        }
    }
    out
}

// ── Type inference ────────────────────────────────────────────────────

/// Flow-insensitive variable types: a name bound to conflicting types is
/// unknown.
#[derive(Debug, Default)]
struct TypeEnv {
    vars: HashMap<String, ArgType>,
}

impl TypeEnv {
    fn infer(tree: &Node, arguments: &ArgumentTypes) -> Self {
        let mut env = Self::default();
        for def in tree.walk().filter(|n| n.kind == Kind::FunctionDef) {
            let Some(types) = arguments.get(def.label()) else {
                continue;
            };
            let params = def.children.first().map(|p| p.children.as_slice()).unwrap_or(&[]);
            for (param, ty) in params.iter().zip(types) {
                if *ty != ArgType::Any {
                    env.bind(param.label(), *ty);
                }
            }
        }
        // Two rounds let assignments see types bound by earlier ones.
        for _ in 0..2 {
            for node in tree.walk() {
                match node.kind {
                    Kind::Assign => {
                        if let [target, value] = node.children.as_slice() {
                            if target.kind == Kind::Name {
                                match env.type_of(value) {
                                    Some(ty) => env.bind(target.label(), ty),
                                    None => env.bind(target.label(), ArgType::Any),
                                }
                            }
                        }
                    }
                    Kind::For | Kind::Comprehension => {
                        if let Some(target) = node.children.first() {
                            for name in target.walk().filter(|n| n.kind == Kind::Name) {
                                env.bind(name.label(), ArgType::Any);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        env
    }

    fn bind(&mut self, name: &str, ty: ArgType) {
        self.vars
            .entry(name.to_string())
            .and_modify(|old| {
                if *old != ty {
                    *old = ArgType::Any;
                }
            })
            .or_insert(ty);
    }

    fn type_of(&self, node: &Node) -> Option<ArgType> {
        let ty = match node.kind {
            Kind::Num => {
                if node.label().chars().all(|c| c.is_ascii_digit() || c == '_') {
                    ArgType::Int
                } else {
                    ArgType::Float
                }
            }
            Kind::Str => ArgType::Str,
            Kind::Bool | Kind::Compare => ArgType::Bool,
            Kind::List | Kind::ListComp => ArgType::List,
            Kind::Dict => ArgType::Dict,
            Kind::Name => *self.vars.get(node.label())?,
            Kind::UnaryOp => match node.operator()? {
                "not" => ArgType::Bool,
                _ => self.numeric(node.children.get(1)?)?,
            },
            Kind::BoolOp => {
                if node.children[1..].iter().all(|c| self.type_of(c) == Some(ArgType::Bool)) {
                    ArgType::Bool
                } else {
                    return None;
                }
            }
            Kind::BinOp => {
                let (left, right) = (self.numeric(&node.children[0])?, self.numeric(&node.children[2])?);
                match node.operator()? {
                    "/" => ArgType::Float,
                    "+" | "-" | "*" | "//" | "%" | "**" if left == right => left,
                    "+" | "-" | "*" | "//" | "%" => ArgType::Float,
                    _ => return None,
                }
            }
            Kind::Call => match node.children.first().map(|f| (f.kind, f.label())) {
                Some((Kind::Name, "len" | "int" | "round")) => ArgType::Int,
                Some((Kind::Name, "float")) => ArgType::Float,
                Some((Kind::Name, "str")) => ArgType::Str,
                Some((Kind::Name, "bool" | "isinstance" | "any" | "all")) => ArgType::Bool,
                Some((Kind::Name, "list" | "sorted")) => ArgType::List,
                _ => return None,
            },
            _ => return None,
        };
        (ty != ArgType::Any).then_some(ty)
    }

    fn numeric(&self, node: &Node) -> Option<ArgType> {
        self.type_of(node).filter(|t| t.is_numeric())
    }

    fn is_numeric(&self, node: &Node) -> bool {
        self.numeric(node).is_some()
    }

    fn is_bool(&self, node: &Node) -> bool {
        self.type_of(node) == Some(ArgType::Bool)
    }
}

/// Evaluation of the expression cannot observe or cause side effects.
fn is_pure(node: &Node) -> bool {
    node.walk().all(|n| n.kind != Kind::Call)
}

// ── Rewrites ──────────────────────────────────────────────────────────

fn rewrite(node: &mut Node, env: &TypeEnv) -> bool {
    let mut changed = false;
    for child in &mut node.children {
        changed |= rewrite(child, env);
    }
    changed |= match node.kind {
        Kind::Module | Kind::Block => simplify_block(node, env),
        Kind::AugAssign => expand_aug_assign(node, env),
        Kind::Compare => normalize_compare(node, env),
        Kind::UnaryOp => push_negation(node),
        Kind::BinOp => fold_constants(node) || sort_operands(node, env),
        Kind::BoolOp => flatten_bool_op(node),
        _ => false,
    };
    changed
}

fn simplify_block(block: &mut Node, env: &TypeEnv) -> bool {
    let mut changed = false;
    let mut out: Vec<Node> = Vec::with_capacity(block.children.len());
    let stmts = std::mem::take(&mut block.children);
    let total = stmts.len();
    let mut iter = stmts.into_iter().peekable();

    while let Some(stmt) = iter.next() {
        match stmt.kind {
            Kind::Pass if total > 1 => {
                changed = true;
                continue;
            }
            Kind::If => {
                if let Some(spliced) = constant_if(&stmt) {
                    out.extend(spliced);
                    changed = true;
                    continue;
                }
                if let Some(ret) = boolean_return(&stmt, iter.peek(), env) {
                    let else_follows = stmt.children.get(2).is_some_and(|b| b.children.is_empty());
                    if else_follows {
                        iter.next();
                    }
                    out.push(ret);
                    changed = true;
                    continue;
                }
            }
            Kind::While if is_bool_literal(stmt.children.first(), "False") => {
                changed = true;
                continue;
            }
            _ => {}
        }
        let terminal = matches!(stmt.kind, Kind::Return | Kind::Break | Kind::Continue);
        out.push(stmt);
        if terminal {
            if iter.peek().is_some() {
                changed = true;
            }
            break;
        }
    }

    if out.is_empty() && total > 0 && block.kind == Kind::Block {
        out.push(Node::new(Kind::Pass, Vec::new()));
    }
    block.children = out;
    changed
}

fn is_bool_literal(node: Option<&Node>, value: &str) -> bool {
    node.is_some_and(|n| n.kind == Kind::Bool && n.label() == value)
}

/// `if True: A else: B` is `A`; `if False` is `B`.
fn constant_if(stmt: &Node) -> Option<Vec<Node>> {
    let [test, body, orelse] = stmt.children.as_slice() else {
        return None;
    };
    if test.kind != Kind::Bool {
        return None;
    }
    let taken = if test.label() == "True" { body } else { orelse };
    Some(taken.children.clone())
}

fn returns_bool(stmt: Option<&Node>, value: bool) -> bool {
    let expected = if value { "True" } else { "False" };
    stmt.is_some_and(|s| s.kind == Kind::Return && is_bool_literal(s.children.first(), expected))
}

fn single(block: &Node) -> Option<&Node> {
    match block.children.as_slice() {
        [only] => Some(only),
        _ => None,
    }
}

/// `if c: return True else: return False` is `return c` for boolean `c`;
/// the swapped form is `return not c`. The `else` may also be the statement
/// following the `if`.
fn boolean_return(stmt: &Node, following: Option<&Node>, env: &TypeEnv) -> Option<Node> {
    let [test, body, orelse] = stmt.children.as_slice() else {
        return None;
    };
    let then = single(body)?;
    let otherwise = if orelse.children.is_empty() {
        following?
    } else {
        single(orelse)?
    };
    let value = if returns_bool(Some(then), true) && returns_bool(Some(otherwise), false) {
        if !env.is_bool(test) {
            return None;
        }
        test.clone()
    } else if returns_bool(Some(then), false) && returns_bool(Some(otherwise), true) {
        let mut negated = Node::new(Kind::UnaryOp, vec![Node::op("not"), test.clone()]);
        negated.id = test.id;
        negated.children[1].id = None;
        negated
    } else {
        return None;
    };
    let mut ret = Node::new(Kind::Return, vec![value]);
    ret.id = stmt.id;
    ret.span = stmt.span;
    Some(ret)
}

fn stripped(node: &Node) -> Node {
    let mut copy = node.clone();
    copy.clear_ids();
    copy
}

/// `x += e` is `x = x + e` when `x` is numeric.
fn expand_aug_assign(node: &mut Node, env: &TypeEnv) -> bool {
    let [target, op, value] = node.children.as_slice() else {
        return false;
    };
    if target.kind != Kind::Name || !env.is_numeric(target) {
        return false;
    }
    let binop = Node::new(
        Kind::BinOp,
        vec![stripped(target), op.clone(), value.clone()],
    );
    let target = target.clone();
    node.kind = Kind::Assign;
    node.children = vec![target, binop];
    true
}

fn mirror(op: &str) -> Option<&'static str> {
    Some(match op {
        ">" => "<",
        ">=" => "<=",
        "<" => ">",
        "<=" => ">=",
        "==" => "==",
        "!=" => "!=",
        _ => return None,
    })
}

/// Single comparisons face left (`b < a` for `a > b`) and keep literals on
/// the right of `==`/`!=`; `x == True` on a boolean `x` is `x`.
fn normalize_compare(node: &mut Node, env: &TypeEnv) -> bool {
    if node.children.len() != 3 {
        return false;
    }
    let op = node.children[1].label().to_string();
    let (left, right) = (&node.children[0], &node.children[2]);

    if matches!(op.as_str(), "==" | "!=") && right.kind == Kind::Bool && env.is_bool(left) {
        let positive = (op == "==") == (right.label() == "True");
        let mut left = left.clone();
        if positive {
            left.id = node.id;
            *node = left;
        } else {
            left.id = None;
            let id = node.id;
            *node = Node::new(Kind::UnaryOp, vec![Node::op("not"), left]);
            node.id = id;
        }
        return true;
    }

    let swap = match op.as_str() {
        ">" | ">=" => is_pure(left) && is_pure(right),
        "==" | "!=" => left.kind.is_literal() && !right.kind.is_literal(),
        _ => false,
    };
    if !swap {
        return false;
    }
    let Some(mirrored) = mirror(&op) else {
        return false;
    };
    node.children.swap(0, 2);
    node.children[1].label = Some(mirrored.to_string());
    true
}

fn negate(op: &str) -> Option<&'static str> {
    Some(match op {
        "==" => "!=",
        "!=" => "==",
        "in" => "not in",
        "not in" => "in",
        "is" => "is not",
        "is not" => "is",
        _ => return None,
    })
}

/// `not (a == b)` is `a != b`; likewise for `in` and `is`. `not not x` is
/// left alone since it converts to bool.
fn push_negation(node: &mut Node) -> bool {
    if node.operator() != Some("not") {
        return false;
    }
    let Some(operand) = node.children.get(1) else {
        return false;
    };
    if operand.kind != Kind::Compare || operand.children.len() != 3 {
        return false;
    }
    let Some(negated) = negate(operand.children[1].label()) else {
        return false;
    };
    let mut compare = operand.clone();
    compare.children[1].label = Some(negated.to_string());
    compare.id = node.id;
    compare.span = node.span;
    *node = compare;
    true
}

fn int_literal(node: &Node) -> Option<i64> {
    match node.kind {
        Kind::Num => node.label().replace('_', "").parse().ok(),
        Kind::UnaryOp if node.operator() == Some("-") => {
            int_literal(node.children.get(1)?)?.checked_neg()
        }
        _ => None,
    }
}

fn int_node(value: i64) -> Node {
    if value < 0 {
        Node::new(
            Kind::UnaryOp,
            vec![Node::op("-"), Node::leaf(Kind::Num, value.unsigned_abs().to_string())],
        )
    } else {
        Node::leaf(Kind::Num, value.to_string())
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    Some(if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q })
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

/// Integer arithmetic on literals is evaluated.
fn fold_constants(node: &mut Node) -> bool {
    let (Some(a), Some(b)) = (int_literal(&node.children[0]), int_literal(&node.children[2])) else {
        return false;
    };
    let result = match node.children[1].label() {
        "+" => a.checked_add(b),
        "-" => a.checked_sub(b),
        "*" => a.checked_mul(b),
        "//" => floor_div(a, b),
        "%" => floor_mod(a, b),
        "**" if (0..=62).contains(&b) => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
        _ => None,
    };
    let Some(value) = result else {
        return false;
    };
    let mut folded = int_node(value);
    folded.id = node.id;
    folded.span = node.span;
    *node = folded;
    true
}

/// Operands of numeric `+` and `*` are ordered by their printed text.
fn sort_operands(node: &mut Node, env: &TypeEnv) -> bool {
    if !matches!(node.operator(), Some("+" | "*")) {
        return false;
    }
    let (left, right) = (&node.children[0], &node.children[2]);
    if !(env.is_numeric(left) && env.is_numeric(right) && is_pure(left) && is_pure(right)) {
        return false;
    }
    // A left-nested chain `a + b + c` only reorders its last two operands.
    if right.kind == Kind::BinOp && right.operator() == node.operator() {
        return false;
    }
    if print_tree(left) <= print_tree(right) {
        return false;
    }
    node.children.swap(0, 2);
    true
}

/// `a and (b and c)` is `a and b and c`.
fn flatten_bool_op(node: &mut Node) -> bool {
    let Some(op) = node.operator().map(str::to_string) else {
        return false;
    };
    if !node.children[1..]
        .iter()
        .any(|c| c.kind == Kind::BoolOp && c.operator() == Some(op.as_str()))
    {
        return false;
    }
    let operands = node.children.split_off(1);
    for operand in operands {
        if operand.kind == Kind::BoolOp && operand.operator() == Some(op.as_str()) {
            node.children.extend(operand.children.into_iter().skip(1));
        } else {
            node.children.push(operand);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use hintgen_lang::parse;

    use super::*;

    fn args(function: &str, types: &[ArgType]) -> ArgumentTypes {
        [(function.to_string(), types.to_vec())].into_iter().collect()
    }

    fn canon(src: &str, arguments: &ArgumentTypes) -> String {
        print_tree(&canonicalize(&parse(src).unwrap(), arguments))
    }

    fn ints() -> ArgumentTypes {
        args("f", &[ArgType::Int, ArgType::Int])
    }

    #[test]
    fn comparisons_face_left() {
        assert_eq!(canon("def f(v0, v1):\n    return v0 > v1\n", &ints()), "def f(v0, v1):\n    return v1 < v0\n");
        assert_eq!(canon("def f(v0, v1):\n    return v0 >= 21\n", &ints()), "def f(v0, v1):\n    return 21 <= v0\n");
        assert_eq!(canon("def f(v0, v1):\n    return 3 == v0\n", &ints()), "def f(v0, v1):\n    return v0 == 3\n");
    }

    #[test]
    fn negated_comparisons_flip() {
        let out = canon("def f(v0, v1):\n    return not v0 == v1 or not v0 in v1\n", &ArgumentTypes::new());
        assert_eq!(out, "def f(v0, v1):\n    return v0 != v1 or v0 not in v1\n");
    }

    #[test]
    fn boolean_if_return_collapses() {
        let bools = args("f", &[ArgType::Int, ArgType::Bool]);
        let src = "def f(v0, v1):\n    if v0 < 21:\n        return False\n    else:\n        return True\n";
        assert_eq!(canon(src, &bools), "def f(v0, v1):\n    return not v0 < 21\n");

        let src = "def f(v0, v1):\n    if v1 == True:\n        return True\n    return False\n";
        assert_eq!(canon(src, &bools), "def f(v0, v1):\n    return v1\n");
    }

    #[test]
    fn non_boolean_condition_is_kept() {
        let src = "def f(v0):\n    if v0:\n        return True\n    return False\n";
        assert_eq!(canon(src, &ArgumentTypes::new()), src);
    }

    #[test]
    fn numeric_aug_assign_expands() {
        let src = "def f(v0, v1):\n    v0 += 1\n    return v0\n";
        assert_eq!(canon(src, &ints()), "def f(v0, v1):\n    v0 = 1 + v0\n    return v0\n");
        // Lists mutate in place; leave them alone.
        let lists = args("f", &[ArgType::List, ArgType::Int]);
        let src = "def f(v0, v1):\n    v0 += [v1]\n    return v0\n";
        assert_eq!(canon(src, &lists), src);
    }

    #[test]
    fn dead_code_and_passes_removed() {
        let src = "def f(v0, v1):\n    pass\n    return v0\n    v0 = 2\n";
        assert_eq!(canon(src, &ints()), "def f(v0, v1):\n    return v0\n");
        let src = "def f(v0, v1):\n    while False:\n        v0 = 1\n    if True:\n        return v1\n";
        assert_eq!(canon(src, &ints()), "def f(v0, v1):\n    return v1\n");
    }

    #[test]
    fn constants_fold() {
        let src = "def f(v0, v1):\n    return v0 * (60 * 60) + (2 - 5)\n";
        assert_eq!(canon(src, &ints()), "def f(v0, v1):\n    return -3 + 3600 * v0\n");
    }

    #[test]
    fn folding_follows_floor_semantics() {
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_mod(-7, 2), Some(1));
        assert_eq!(floor_mod(7, -2), Some(-1));
        assert_eq!(floor_div(1, 0), None);
    }

    #[test]
    fn bool_ops_flatten() {
        let src = "def f(v0, v1):\n    return v0 and (v1 and v0)\n";
        assert_eq!(canon(src, &ArgumentTypes::new()), "def f(v0, v1):\n    return v0 and v1 and v0\n");
    }

    #[test]
    fn strings_are_not_reordered() {
        let strs = args("f", &[ArgType::Str, ArgType::Str]);
        let src = "def f(v0, v1):\n    return v1 + v0\n";
        assert_eq!(canon(src, &strs), src);
    }

    #[test]
    fn equivalent_programs_share_a_canonical_form() {
        let bools = args("canDrinkAlcohol", &[ArgType::Int, ArgType::Bool]);
        let a = canon(
            "def canDrinkAlcohol(v0, v1):\n    if v0 >= 21 and v1 == False:\n        return True\n    else:\n        return False\n",
            &bools,
        );
        let b = canon("def canDrinkAlcohol(v0, v1):\n    return 21 <= v0 and not v1\n", &bools);
        assert_eq!(a, b);
    }

    #[test]
    fn rewritten_nodes_keep_ids() {
        let mut tree = parse("def f(v0, v1):\n    return v0 > v1\n").unwrap();
        tree.assign_ids();
        let compare_id = tree.get(&[0, 1, 0, 0]).and_then(|n| n.id);
        let out = canonicalize(&tree, &ints());
        assert_eq!(out.get(&[0, 1, 0, 0]).and_then(|n| n.id), compare_id);
    }
}
