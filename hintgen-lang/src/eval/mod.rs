// Tree-walking interpreter for the teaching language, used to run student
// submissions against test cases. Every statement, loop iteration, and call
// draws from a step budget so non-terminating programs fail cleanly.

mod builtins;
mod value;

use std::collections::HashMap;
use std::rc::Rc;

pub use value::{Function, Value, format_float};

use crate::ast::{Kind, Node};
use crate::{LangError, Result};

const MAX_DEPTH: usize = 200;

/// Materialized sequences larger than this are refused.
pub(crate) const MAX_ITEMS: usize = 1_000_000;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Interpreter state for one program run.
#[derive(Debug)]
pub struct Interpreter {
    /// `frames[0]` is the module scope.
    frames: Vec<HashMap<String, Value>>,
    steps: u64,
    fuel: u64,
    output: Vec<String>,
}

impl Interpreter {
    pub fn new(fuel: u64) -> Self {
        Self {
            frames: vec![HashMap::new()],
            steps: 0,
            fuel,
            output: Vec::new(),
        }
    }

    /// Execute a module's top-level statements.
    pub fn load(&mut self, module: &Node) -> Result<()> {
        match self.block(&module.children)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(runtime("SyntaxError: 'return' outside function")),
            Flow::Break | Flow::Continue => Err(runtime("SyntaxError: loop control outside loop")),
        }
    }

    /// Call a module-level function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let func = self
            .frames[0]
            .get(name)
            .cloned()
            .ok_or_else(|| runtime(format!("NameError: name '{name}' is not defined")))?;
        self.call_value(&func, args, Vec::new())
    }

    /// Evaluate an expression in module scope.
    pub fn evaluate(&mut self, expr: &Node) -> Result<Value> {
        self.expr(expr)
    }

    /// Lines written by `print`.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.fuel {
            return Err(LangError::OutOfFuel(self.fuel));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        let local = self.frames.last().and_then(|f| f.get(name));
        if let Some(v) = local.or_else(|| self.frames[0].get(name)) {
            return Ok(v.clone());
        }
        builtins::lookup(name).ok_or_else(|| runtime(format!("NameError: name '{name}' is not defined")))
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn block(&mut self, stmts: &[Node]) -> Result<Flow> {
        for stmt in stmts {
            match self.statement(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn statement(&mut self, node: &Node) -> Result<Flow> {
        self.tick()?;
        let c = &node.children;
        match node.kind {
            Kind::FunctionDef => {
                let params = c[0]
                    .children
                    .iter()
                    .map(|p| {
                        let default = p.children.first().map(|d| self.expr(d)).transpose()?;
                        Ok((p.label().to_string(), default))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let func = Function {
                    name: node.label().to_string(),
                    params,
                    body: c[1].clone(),
                };
                self.bind(node.label(), Value::Function(Rc::new(func)));
            }
            Kind::Return => {
                let value = c.first().map(|v| self.expr(v)).transpose()?;
                return Ok(Flow::Return(value.unwrap_or(Value::None)));
            }
            Kind::Assign => {
                let value = self.expr(&c[1])?;
                self.assign(&c[0], value)?;
            }
            Kind::AugAssign => {
                let current = self.expr(&c[0])?;
                let rhs = self.expr(&c[2])?;
                let value = match (&current, c[1].label()) {
                    // `xs += ys` extends in place.
                    (Value::List(items), "+") => {
                        let extra = self.iterate(&rhs)?;
                        items.borrow_mut().extend(extra);
                        current.clone()
                    }
                    (_, op) => builtins::binary(op, &current, &rhs)?,
                };
                self.assign(&c[0], value)?;
            }
            Kind::If => {
                let branch = if self.expr(&c[0])?.truthy() { &c[1] } else { &c[2] };
                return self.block(&branch.children);
            }
            Kind::While => {
                while self.expr(&c[0])?.truthy() {
                    self.tick()?;
                    match self.block(&c[1].children)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Kind::For => {
                let iterable = self.expr(&c[1])?;
                let mut index = 0usize;
                while let Some(item) = self.nth_item(&iterable, index)? {
                    index += 1;
                    self.tick()?;
                    self.assign(&c[0], item)?;
                    match self.block(&c[2].children)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Kind::Break => return Ok(Flow::Break),
            Kind::Continue => return Ok(Flow::Continue),
            Kind::Pass => {}
            Kind::ExprStmt => {
                self.expr(&c[0])?;
            }
            Kind::Import => {
                for alias in c {
                    let module = builtins::module(alias.label())?;
                    let bound = alias.children.first().map_or(alias.label(), Node::label);
                    self.bind(bound, module);
                }
            }
            Kind::ImportFrom => {
                let module = builtins::module(node.label())?;
                for alias in c {
                    if alias.label() == "*" {
                        for (name, value) in builtins::module_members(node.label()) {
                            self.bind(name, value);
                        }
                        continue;
                    }
                    let member = builtins::attribute(&module, alias.label())?;
                    let bound = alias.children.first().map_or(alias.label(), Node::label);
                    self.bind(bound, member);
                }
            }
            other => return Err(runtime(format!("cannot execute {}", other.describe()))),
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Node, value: Value) -> Result<()> {
        match target.kind {
            Kind::Name => {
                self.bind(target.label(), value);
                Ok(())
            }
            Kind::Tuple | Kind::List => {
                let items = self.iterate(&value)?;
                if items.len() != target.children.len() {
                    return Err(runtime(format!(
                        "ValueError: expected {} values to unpack, got {}",
                        target.children.len(),
                        items.len()
                    )));
                }
                for (t, v) in target.children.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
            Kind::Subscript => {
                let container = self.expr(&target.children[0])?;
                let key = self.expr(&target.children[1])?;
                builtins::set_item(&container, key, value)
            }
            _ => Err(runtime(format!("cannot assign to {}", target.kind.describe()))),
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn expr(&mut self, node: &Node) -> Result<Value> {
        let c = &node.children;
        match node.kind {
            Kind::Name => self.lookup(node.label()),
            Kind::Num => parse_number(node.label()),
            Kind::Str => parse_string(node.label()).map(Value::str),
            Kind::Bool => Ok(Value::Bool(node.label() == "True")),
            Kind::NoneLit => Ok(Value::None),
            Kind::BinOp => {
                let left = self.expr(&c[0])?;
                let right = self.expr(&c[2])?;
                builtins::binary(c[1].label(), &left, &right)
            }
            Kind::BoolOp => {
                let is_and = c[0].label() == "and";
                let mut last = Value::None;
                for operand in &c[1..] {
                    last = self.expr(operand)?;
                    if last.truthy() != is_and {
                        break;
                    }
                }
                Ok(last)
            }
            Kind::UnaryOp => {
                let operand = self.expr(&c[1])?;
                builtins::unary(c[0].label(), &operand)
            }
            Kind::Compare => {
                let mut left = self.expr(&c[0])?;
                for pair in c[1..].chunks(2) {
                    let [op, right] = pair else {
                        return Err(runtime("malformed comparison"));
                    };
                    let right = self.expr(right)?;
                    if !builtins::compare(op.label(), &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Kind::Call => {
                let func = self.expr(&c[0])?;
                let mut args = Vec::new();
                let mut kwargs = Vec::new();
                for arg in &c[1..] {
                    if arg.kind == Kind::Keyword {
                        kwargs.push((arg.label().to_string(), self.expr(&arg.children[0])?));
                    } else {
                        args.push(self.expr(arg)?);
                    }
                }
                self.call_value(&func, args, kwargs)
            }
            Kind::Attribute => {
                let object = self.expr(&c[0])?;
                builtins::attribute(&object, node.label())
            }
            Kind::Subscript => {
                let container = self.expr(&c[0])?;
                if c[1].kind == Kind::Slice {
                    let parts = c[1]
                        .children
                        .iter()
                        .map(|p| if p.kind == Kind::Empty { Ok(None) } else { self.expr(p).map(Some) })
                        .collect::<Result<Vec<_>>>()?;
                    return builtins::slice(&container, &parts[0], &parts[1], &parts[2]);
                }
                let key = self.expr(&c[1])?;
                builtins::get_item(&container, &key)
            }
            Kind::IfExp => {
                if self.expr(&c[1])?.truthy() {
                    self.expr(&c[0])
                } else {
                    self.expr(&c[2])
                }
            }
            Kind::List => Ok(Value::list(self.exprs(c)?)),
            Kind::Tuple => Ok(Value::tuple(self.exprs(c)?)),
            Kind::Dict => {
                let pairs = c
                    .iter()
                    .map(|p| Ok((self.expr(&p.children[0])?, self.expr(&p.children[1])?)))
                    .collect::<Result<Vec<_>>>()?;
                let dict = Value::dict(Vec::new());
                for (k, v) in pairs {
                    builtins::set_item(&dict, k, v)?;
                }
                Ok(dict)
            }
            Kind::ListComp => self.list_comprehension(node),
            other => Err(runtime(format!("cannot evaluate {}", other.describe()))),
        }
    }

    fn exprs(&mut self, nodes: &[Node]) -> Result<Vec<Value>> {
        nodes.iter().map(|n| self.expr(n)).collect()
    }

    fn list_comprehension(&mut self, node: &Node) -> Result<Value> {
        // Comprehension variables must not leak; remember what they shadowed.
        let targets: Vec<String> = node.children[1..]
            .iter()
            .flat_map(|clause| clause.children[0].names())
            .map(str::to_string)
            .collect();
        let saved: Vec<(String, Option<Value>)> = targets
            .iter()
            .map(|t| (t.clone(), self.frames.last().and_then(|f| f.get(t)).cloned()))
            .collect();

        let mut out = Vec::new();
        let result = self.comprehension_level(node, 1, &mut out);

        if let Some(frame) = self.frames.last_mut() {
            for (name, old) in saved {
                match old {
                    Some(v) => frame.insert(name, v),
                    None => frame.remove(&name),
                };
            }
        }
        result.map(|()| Value::list(out))
    }

    fn comprehension_level(&mut self, node: &Node, level: usize, out: &mut Vec<Value>) -> Result<()> {
        let Some(clause) = node.children.get(level) else {
            out.push(self.expr(&node.children[0])?);
            return Ok(());
        };
        let iterable = self.expr(&clause.children[1])?;
        let mut index = 0usize;
        'items: while let Some(item) = self.nth_item(&iterable, index)? {
            index += 1;
            self.tick()?;
            self.assign(&clause.children[0], item)?;
            for cond in &clause.children[2..] {
                if !self.expr(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension_level(node, level + 1, out)?;
        }
        Ok(())
    }

    // ── Calls and iteration ──────────────────────────────────────────

    pub(crate) fn call_value(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        self.tick()?;
        match func {
            Value::Function(f) => self.call_function(f, args, kwargs),
            Value::Builtin(name) => builtins::call(self, name, args, kwargs),
            Value::Method { receiver, name } => builtins::call_method(self, receiver, name, args, kwargs),
            other => Err(runtime(format!(
                "TypeError: '{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        if self.frames.len() > MAX_DEPTH {
            return Err(runtime("RecursionError: maximum recursion depth exceeded"));
        }
        if args.len() > func.params.len() {
            return Err(runtime(format!(
                "TypeError: {}() takes {} positional arguments but {} were given",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        let mut frame = HashMap::new();
        let mut args = args.into_iter();
        for (name, default) in &func.params {
            let value = match args.next() {
                Some(v) => v,
                None => match kwargs.iter().find(|(k, _)| k == name) {
                    Some((_, v)) => v.clone(),
                    None => default.clone().ok_or_else(|| {
                        runtime(format!(
                            "TypeError: {}() missing required argument: '{name}'",
                            func.name
                        ))
                    })?,
                },
            };
            frame.insert(name.clone(), value);
        }
        if let Some((unknown, _)) = kwargs.iter().find(|(k, _)| !func.params.iter().any(|(p, _)| p == k)) {
            return Err(runtime(format!(
                "TypeError: {}() got an unexpected keyword argument '{unknown}'",
                func.name
            )));
        }

        self.frames.push(frame);
        let flow = self.block(&func.body.children);
        self.frames.pop();
        match flow? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    /// Item `index` of an iterable, or `None` past the end. Lists are read
    /// live so loops observe in-place mutation like Python does.
    fn nth_item(&self, iterable: &Value, index: usize) -> Result<Option<Value>> {
        Ok(match iterable {
            Value::List(items) => items.borrow().get(index).cloned(),
            Value::Tuple(items) => items.get(index).cloned(),
            Value::Str(s) => s.chars().nth(index).map(|ch| Value::str(ch.to_string())),
            Value::Dict(pairs) => pairs.borrow().get(index).map(|(k, _)| k.clone()),
            Value::Range { start, step, .. } => (index < iterable.range_len()).then(|| {
                let offset = i64::try_from(index).unwrap_or(i64::MAX);
                Value::Int(start + offset * step)
            }),
            other => {
                return Err(runtime(format!(
                    "TypeError: '{}' object is not iterable",
                    other.type_name()
                )));
            }
        })
    }

    /// Collect every item of an iterable.
    pub(crate) fn iterate(&self, iterable: &Value) -> Result<Vec<Value>> {
        let len = match iterable {
            Value::Range { .. } => iterable.range_len(),
            _ => 0,
        };
        if len > MAX_ITEMS {
            return Err(runtime("MemoryError: range too large"));
        }
        let mut items = Vec::new();
        while let Some(item) = self.nth_item(iterable, items.len())? {
            items.push(item);
        }
        Ok(items)
    }

    pub(crate) fn print(&mut self, line: String) {
        self.output.push(line);
    }
}

pub(crate) fn runtime(message: impl Into<String>) -> LangError {
    LangError::Runtime(message.into())
}

fn parse_number(text: &str) -> Result<Value> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let radix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find(|(prefix, _)| lower.starts_with(prefix));
    if let Some((prefix, radix)) = radix {
        return i64::from_str_radix(&lower[prefix.len()..], radix)
            .map(Value::Int)
            .map_err(|e| runtime(format!("invalid literal `{text}`: {e}")));
    }
    if let Ok(i) = lower.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    lower
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|e| runtime(format!("invalid literal `{text}`: {e}")))
}

/// Decode a string literal's source text (quotes, prefixes, escapes).
pub fn parse_string(text: &str) -> Result<String> {
    let prefix_len = text.find(['\'', '"']).unwrap_or(0);
    let (prefix, body) = text.split_at(prefix_len);
    let raw = prefix.to_ascii_lowercase().contains('r');
    let quote = if body.starts_with("\"\"\"") || body.starts_with("'''") { 3 } else { 1 };
    if body.len() < quote * 2 {
        return Err(runtime(format!("malformed string literal {text}")));
    }
    let inner = &body[quote..body.len() - quote];
    if raw {
        return Ok(inner.to_string());
    }
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some(c @ ('\\' | '\'' | '"')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse, parse_expression};

    fn run(src: &str, func: &str, args: Vec<Value>) -> Result<Value> {
        let mut interp = Interpreter::new(10_000);
        interp.load(&parse(src).unwrap())?;
        interp.call(func, args)
    }

    #[test]
    fn calls_functions_with_python_semantics() {
        let src = "def f(a, b=3):\n    return a // b, a % b, -7 // 2, -7 % 2\n";
        let v = run(src, "f", vec![Value::Int(10)]).unwrap();
        assert_eq!(v.repr(), "(3, 1, -4, 1)");
    }

    #[test]
    fn loops_and_comprehensions() {
        let src = "def evens(n):\n    total = 0\n    for i in range(n):\n        if i % 2:\n            continue\n        total += i\n    return [x * x for x in range(total) if x > total - 3]\n";
        let v = run(src, "evens", vec![Value::Int(5)]).unwrap();
        assert_eq!(v.repr(), "[16, 25]");
    }

    #[test]
    fn infinite_loops_run_out_of_fuel() {
        let err = run("def spin():\n    while True:\n        pass\n", "spin", vec![]).unwrap_err();
        assert!(matches!(err, LangError::OutOfFuel(10_000)));
    }

    #[test]
    fn runtime_errors_are_reported() {
        let err = run("def f(x):\n    return x / 0\n", "f", vec![Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"), "{err}");
    }

    #[test]
    fn list_methods_mutate_in_place() {
        let src = "def f(xs):\n    xs.append(4)\n    xs.sort(reverse=True)\n    return xs\n";
        let input = Value::list(vec![Value::Int(2), Value::Int(3)]);
        let out = run(src, "f", vec![input.clone()]).unwrap();
        assert_eq!(out.repr(), "[4, 3, 2]");
        assert!(out.py_is(&input));
    }

    #[test]
    fn evaluates_literal_inputs() {
        let mut interp = Interpreter::new(100);
        let v = interp.evaluate(&parse_expression("(22, True, 'x\\n', [1.5])").unwrap()).unwrap();
        assert_eq!(v.repr(), "(22, True, 'x\\n', [1.5])");
    }

    #[test]
    fn math_imports() {
        let src = "from math import sqrt\nimport math as m\ndef f(x):\n    return sqrt(x) + m.floor(m.pi)\n";
        let v = run(src, "f", vec![Value::Int(16)]).unwrap();
        assert_eq!(v.repr(), "7.0");
    }
}
