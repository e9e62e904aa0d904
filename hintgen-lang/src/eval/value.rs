use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::ast::Node;
use crate::{LangError, Result};

/// A user-defined function captured at `def` time.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Option<Value>)>,
    pub body: Node,
}

/// Runtime value of the teaching language.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    /// Insertion-ordered key/value pairs.
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(&'static str),
    Module(&'static str),
    Method { receiver: Box<Value>, name: String },
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(Rc::new(items))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Self::Dict(Rc::new(RefCell::new(pairs)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range { .. } => "range",
            Self::Function(_) => "function",
            Self::Builtin(_) | Self::Method { .. } => "builtin_function_or_method",
            Self::Module(_) => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(pairs) => !pairs.borrow().is_empty(),
            Self::Range { .. } => self.range_len() > 0,
            _ => true,
        }
    }

    /// Numeric view used by arithmetic: bools count as ints.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    pub fn range_len(&self) -> usize {
        let Self::Range { start, stop, step } = *self else {
            return 0;
        };
        let span = if step > 0 { stop - start } else { start - stop };
        if span <= 0 {
            0
        } else {
            let step = step.unsigned_abs();
            usize::try_from((span.unsigned_abs() + step - 1) / step).unwrap_or(usize::MAX)
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => seq_eq(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .find(|(k2, _)| k.py_eq(k2))
                            .is_some_and(|(_, v2)| v.py_eq(v2))
                    })
            }
            (a @ Self::Range { .. }, b @ Self::Range { .. }) => a.repr() == b.repr(),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) | (Self::Module(a), Self::Module(b)) => a == b,
            _ => false,
        }
    }

    /// Python `is`: identity for containers, equality for immutable scalars.
    pub fn py_is(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::None, Self::None) => true,
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => a.py_eq(b),
            _ => false,
        }
    }

    /// Python ordering comparison (`<` and friends).
    pub fn py_cmp(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => a
                    .as_float()
                    .zip(b.as_float())
                    .and_then(|(x, y)| x.partial_cmp(&y))
                    .ok_or_else(|| LangError::Runtime("cannot order NaN".to_string())),
            },
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b),
            _ => Err(LangError::Runtime(format!(
                "TypeError: '<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Copy that shares no mutable storage with `self`.
    pub fn deep_copy(&self) -> Value {
        match self {
            Self::List(items) => Value::list(items.borrow().iter().map(Value::deep_copy).collect()),
            Self::Tuple(items) => Value::tuple(items.iter().map(Value::deep_copy).collect()),
            Self::Dict(pairs) => Value::dict(
                pairs
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.deep_copy(), v.deep_copy()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    /// Python `str()`.
    pub fn display(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&format_float(*f)),
            Self::Str(s) => {
                let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
                out.push(quote);
                for ch in s.chars() {
                    match ch {
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\\' => out.push_str("\\\\"),
                        c if c == quote => {
                            out.push('\\');
                            out.push(c);
                        }
                        c => out.push(c),
                    }
                }
                out.push(quote);
            }
            Self::List(items) => {
                out.push('[');
                write_items(&items.borrow(), out);
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                write_items(items, out);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out);
                    out.push_str(": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            Self::Range { start, stop, step } => {
                if *step == 1 {
                    let _ = write!(out, "range({start}, {stop})");
                } else {
                    let _ = write!(out, "range({start}, {stop}, {step})");
                }
            }
            Self::Function(f) => {
                let _ = write!(out, "<function {}>", f.name);
            }
            Self::Builtin(name) => {
                let _ = write!(out, "<built-in function {name}>");
            }
            Self::Module(name) => {
                let _ = write!(out, "<module '{name}'>");
            }
            Self::Method { name, receiver } => {
                let _ = write!(out, "<built-in method {name} of {} object>", receiver.type_name());
            }
        }
    }
}

fn write_items(items: &[Value], out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Result<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Float formatting in the style of Python's `repr(float)`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{f}");
    if text.contains(['.', 'e']) {
        text
    } else {
        format!("{text}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn reprs_match_python() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::str("a'b"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(v.repr(), "[1, 2.0, \"a'b\", (None,)]");
        assert_eq!(Value::dict(vec![(Value::str("k"), Value::Bool(true))]).repr(), "{'k': True}");
    }

    #[test]
    fn deep_copy_detaches_lists() {
        let original = Value::list(vec![Value::list(vec![Value::Int(1)])]);
        let copy = original.deep_copy();
        if let Value::List(outer) = &original {
            if let Value::List(inner) = &outer.borrow()[0] {
                inner.borrow_mut().push(Value::Int(2));
            }
        }
        assert!(!original.py_eq(&copy));
    }

    #[test]
    fn range_lengths() {
        let r = |start, stop, step| Value::Range { start, stop, step }.range_len();
        assert_eq!(r(0, 10, 1), 10);
        assert_eq!(r(0, 10, 3), 4);
        assert_eq!(r(10, 0, -2), 5);
        assert_eq!(r(5, 5, 1), 0);
    }
}
