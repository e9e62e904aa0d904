// Builtin functions, operators, container access, methods, and the `math`
// module subset.

use std::cmp::Ordering;

use super::value::Value;
use super::{Interpreter, MAX_ITEMS, runtime};
use crate::Result;
use crate::names::BUILTIN_FUNCTIONS;

const MATH: &[(&str, &str)] = &[
    ("sqrt", "math.sqrt"),
    ("floor", "math.floor"),
    ("ceil", "math.ceil"),
    ("fabs", "math.fabs"),
    ("log", "math.log"),
    ("exp", "math.exp"),
    ("pow", "math.pow"),
    ("gcd", "math.gcd"),
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];
const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "count", "isdigit", "isalpha", "isspace", "isupper", "islower",
    "capitalize",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update", "setdefault", "copy", "clear"];

type Kwargs = Vec<(String, Value)>;

pub(super) fn lookup(name: &str) -> Option<Value> {
    BUILTIN_FUNCTIONS
        .iter()
        .find(|b| **b == name)
        .map(|b| Value::Builtin(*b))
}

pub(super) fn module(name: &str) -> Result<Value> {
    match name {
        "math" => Ok(Value::Module("math")),
        other => Err(runtime(format!("ModuleNotFoundError: No module named '{other}'"))),
    }
}

pub(super) fn module_members(name: &str) -> Vec<(&'static str, Value)> {
    if name != "math" {
        return Vec::new();
    }
    let mut members: Vec<(&'static str, Value)> = MATH.iter().map(|(m, full)| (*m, Value::Builtin(*full))).collect();
    members.push(("pi", Value::Float(std::f64::consts::PI)));
    members.push(("e", Value::Float(std::f64::consts::E)));
    members.push(("inf", Value::Float(f64::INFINITY)));
    members
}

pub(super) fn attribute(object: &Value, name: &str) -> Result<Value> {
    let methods = match object {
        Value::Module(module) => {
            return module_members(module)
                .into_iter()
                .find(|(m, _)| *m == name)
                .map(|(_, v)| v)
                .ok_or_else(|| runtime(format!("AttributeError: module '{module}' has no attribute '{name}'")));
        }
        Value::List(_) => LIST_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => &[],
    };
    if methods.contains(&name) {
        Ok(Value::Method {
            receiver: Box::new(object.clone()),
            name: name.to_string(),
        })
    } else {
        Err(runtime(format!(
            "AttributeError: '{}' object has no attribute '{name}'",
            object.type_name()
        )))
    }
}

// ── Operators ────────────────────────────────────────────────────────

fn type_error(op: &str, a: &Value, b: &Value) -> crate::LangError {
    runtime(format!(
        "TypeError: unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

fn zero_division() -> crate::LangError {
    runtime("ZeroDivisionError: division by zero")
}

fn overflow() -> crate::LangError {
    runtime("OverflowError: integer result too large")
}

pub(super) fn binary(op: &str, a: &Value, b: &Value) -> Result<Value> {
    match (op, a, b) {
        ("+", Value::Str(x), Value::Str(y)) => Ok(Value::str(format!("{x}{y}"))),
        ("+", Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        ("+", Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        ("*", _, _) if !(a.is_number() && b.is_number()) => {
            if let Some(result) = repeat(a, b) {
                return result;
            }
            if let Some(result) = repeat(b, a) {
                return result;
            }
            Err(type_error(op, a, b))
        }
        _ if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => int_arith(op, x, y, a, b),
            _ => float_arith(op, a, b),
        },
        _ => Err(type_error(op, a, b)),
    }
}

fn repeat(seq: &Value, count: &Value) -> Option<Result<Value>> {
    let n = usize::try_from(count.as_int()?.max(0)).unwrap_or(0);
    let len = match seq {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => return None,
    };
    if len.saturating_mul(n) > MAX_ITEMS {
        return Some(Err(runtime("MemoryError: sequence too large")));
    }
    Some(Ok(match seq {
        Value::Str(s) => Value::str(s.repeat(n)),
        Value::List(items) => Value::list(repeat_items(&items.borrow(), n)),
        Value::Tuple(items) => Value::tuple(repeat_items(items, n)),
        _ => return None,
    }))
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

fn floor_div(x: i64, y: i64) -> i64 {
    let q = x / y;
    if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q }
}

fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x % y;
    if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
}

#[allow(clippy::cast_precision_loss)]
fn int_arith(op: &str, x: i64, y: i64, a: &Value, b: &Value) -> Result<Value> {
    let checked = |v: Option<i64>| v.map(Value::Int).ok_or_else(overflow);
    match op {
        "+" => checked(x.checked_add(y)),
        "-" => checked(x.checked_sub(y)),
        "*" => checked(x.checked_mul(y)),
        "/" if y == 0 => Err(zero_division()),
        "/" => Ok(Value::Float(x as f64 / y as f64)),
        "//" | "%" if y == 0 => Err(runtime("ZeroDivisionError: integer division or modulo by zero")),
        "//" => Ok(Value::Int(floor_div(x, y))),
        "%" => Ok(Value::Int(floor_mod(x, y))),
        "**" if y >= 0 => checked(u32::try_from(y).ok().and_then(|e| x.checked_pow(e))),
        "**" if x == 0 => Err(runtime("ZeroDivisionError: 0.0 cannot be raised to a negative power")),
        "**" => Ok(Value::Float((x as f64).powf(y as f64))),
        "&" => Ok(Value::Int(x & y)),
        "|" => Ok(Value::Int(x | y)),
        "^" => Ok(Value::Int(x ^ y)),
        "<<" | ">>" if y < 0 => Err(runtime("ValueError: negative shift count")),
        "<<" => checked(u32::try_from(y).ok().and_then(|s| x.checked_shl(s)).filter(|v| v >> y == x)),
        ">>" => Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })),
        _ => Err(type_error(op, a, b)),
    }
}

fn float_arith(op: &str, a: &Value, b: &Value) -> Result<Value> {
    let (Some(x), Some(y)) = (a.as_float(), b.as_float()) else {
        return Err(type_error(op, a, b));
    };
    let value = match op {
        "+" => x + y,
        "-" => x - y,
        "*" => x * y,
        "/" | "//" | "%" if y == 0.0 => return Err(runtime("ZeroDivisionError: float division by zero")),
        "/" => x / y,
        "//" => (x / y).floor(),
        "%" => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        "**" => x.powf(y),
        _ => return Err(type_error(op, a, b)),
    };
    Ok(Value::Float(value))
}

pub(super) fn unary(op: &str, v: &Value) -> Result<Value> {
    match (op, v) {
        ("not", _) => Ok(Value::Bool(!v.truthy())),
        ("-", Value::Float(f)) => Ok(Value::Float(-f)),
        ("-", _) => v
            .as_int()
            .ok_or_else(|| bad_unary(op, v))
            .and_then(|i| i.checked_neg().map(Value::Int).ok_or_else(overflow)),
        ("+", Value::Float(f)) => Ok(Value::Float(*f)),
        ("+", _) => v.as_int().map(Value::Int).ok_or_else(|| bad_unary(op, v)),
        ("~", _) => v.as_int().map(|i| Value::Int(!i)).ok_or_else(|| bad_unary(op, v)),
        _ => Err(bad_unary(op, v)),
    }
}

fn bad_unary(op: &str, v: &Value) -> crate::LangError {
    runtime(format!("TypeError: bad operand type for unary {op}: '{}'", v.type_name()))
}

pub(super) fn compare(op: &str, a: &Value, b: &Value) -> Result<bool> {
    Ok(match op {
        "==" => a.py_eq(b),
        "!=" => !a.py_eq(b),
        "<" => a.py_cmp(b)? == Ordering::Less,
        "<=" => a.py_cmp(b)? != Ordering::Greater,
        ">" => a.py_cmp(b)? == Ordering::Greater,
        ">=" => a.py_cmp(b)? != Ordering::Less,
        "in" => contains(b, a)?,
        "not in" => !contains(b, a)?,
        "is" => a.py_is(b),
        "is not" => !a.py_is(b),
        other => return Err(runtime(format!("unknown comparison `{other}`"))),
    })
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    Ok(match container {
        Value::Str(s) => match item {
            Value::Str(needle) => s.contains(&**needle),
            _ => {
                return Err(runtime(format!(
                    "TypeError: 'in <string>' requires string as left operand, not {}",
                    item.type_name()
                )));
            }
        },
        Value::List(items) => items.borrow().iter().any(|x| x.py_eq(item)),
        Value::Tuple(items) => items.iter().any(|x| x.py_eq(item)),
        Value::Dict(pairs) => pairs.borrow().iter().any(|(k, _)| k.py_eq(item)),
        Value::Range { start, stop, step } => item.as_int().is_some_and(|i| {
            let in_bounds = if *step > 0 { i >= *start && i < *stop } else { i <= *start && i > *stop };
            in_bounds && (i - start) % step == 0
        }),
        other => {
            return Err(runtime(format!(
                "TypeError: argument of type '{}' is not iterable",
                other.type_name()
            )));
        }
    })
}

// ── Container access ─────────────────────────────────────────────────

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize> {
    let i = index
        .as_int()
        .ok_or_else(|| runtime(format!("TypeError: {what} indices must be integers, not {}", index.type_name())))?;
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if i < 0 { i + len_i } else { i };
    if adjusted < 0 || adjusted >= len_i {
        return Err(runtime(format!("IndexError: {what} index out of range")));
    }
    usize::try_from(adjusted).map_err(|_| runtime(format!("IndexError: {what} index out of range")))
}

pub(super) fn get_item(container: &Value, key: &Value) -> Result<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[normalize_index(key, items.len(), "list")?].clone())
        }
        Value::Tuple(items) => Ok(items[normalize_index(key, items.len(), "tuple")?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(chars[normalize_index(key, chars.len(), "string")?].to_string()))
        }
        Value::Range { start, step, .. } => {
            let i = normalize_index(key, container.range_len(), "range")?;
            Ok(Value::Int(start + i64::try_from(i).unwrap_or(i64::MAX) * step))
        }
        Value::Dict(pairs) => pairs
            .borrow()
            .iter()
            .find(|(k, _)| k.py_eq(key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| runtime(format!("KeyError: {}", key.repr()))),
        other => Err(runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(super) fn set_item(container: &Value, key: Value, value: Value) -> Result<()> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(&key, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(pairs) => {
            if matches!(key, Value::List(_) | Value::Dict(_)) {
                return Err(runtime(format!("TypeError: unhashable type: '{}'", key.type_name())));
            }
            let mut pairs = pairs.borrow_mut();
            match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                Some((_, slot)) => *slot = value,
                None => pairs.push((key, value)),
            }
            Ok(())
        }
        other => Err(runtime(format!(
            "TypeError: '{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn opt_int(v: &Option<Value>) -> Result<Option<i64>> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => v
            .as_int()
            .map(Some)
            .ok_or_else(|| runtime("TypeError: slice indices must be integers or None")),
    }
}

/// Positions selected by `[lower:upper:step]` on a sequence of `len` items.
fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Result<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(runtime("ValueError: slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |i: i64| {
        if i < 0 {
            let i = i + len;
            if i < 0 { if step < 0 { -1 } else { 0 } } else { i }
        } else if i >= len {
            if step < 0 { len - 1 } else { len }
        } else {
            i
        }
    };
    let start = lower.map_or(if step > 0 { 0 } else { len - 1 }, clamp);
    let stop = upper.map_or(if step > 0 { len } else { -1 }, clamp);

    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(usize::try_from(i).unwrap_or(0));
        i += step;
    }
    Ok(positions)
}

pub(super) fn slice(container: &Value, lower: &Option<Value>, upper: &Option<Value>, step: &Option<Value>) -> Result<Value> {
    let (lower, upper, step) = (opt_int(lower)?, opt_int(upper)?, opt_int(step)?);
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_positions(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_positions(chars.len(), lower, upper, step)?;
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ── Builtin functions ────────────────────────────────────────────────

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
        return Err(runtime(format!(
            "TypeError: {name}() takes {expected} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn kwarg<'a>(kwargs: &'a Kwargs, key: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn int_arg(v: &Value, name: &str) -> Result<i64> {
    v.as_int().ok_or_else(|| {
        runtime(format!(
            "TypeError: {name}() expected an integer, got '{}'",
            v.type_name()
        ))
    })
}

fn float_arg(v: &Value, name: &str) -> Result<f64> {
    v.as_float().ok_or_else(|| {
        runtime(format!(
            "TypeError: {name}() expected a number, got '{}'",
            v.type_name()
        ))
    })
}

fn sort_values(interp: &mut Interpreter, items: Vec<Value>, kwargs: &Kwargs) -> Result<Vec<Value>> {
    let reverse = kwarg(kwargs, "reverse").is_some_and(Value::truthy);
    let keyed = match kwarg(kwargs, "key").filter(|k| !matches!(k, Value::None)) {
        Some(key) => items
            .into_iter()
            .map(|item| Ok((interp.call_value(key, vec![item.clone()], Vec::new())?, item)))
            .collect::<Result<Vec<_>>>()?,
        None => items.into_iter().map(|item| (item.clone(), item)).collect(),
    };
    let mut keyed = keyed;
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ord = if reverse { b.py_cmp(a) } else { a.py_cmp(b) };
        ord.unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn extreme(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: &Kwargs, want: Ordering) -> Result<Value> {
    let items = if args.len() == 1 { interp.iterate(&args[0])? } else { args };
    let key = kwarg(kwargs, "key").cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call_value(f, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_key, _)) => k.py_cmp(best_key)? == want,
        };
        if better {
            best = Some((k, item));
        }
    }
    best.map(|(_, item)| item)
        .ok_or_else(|| runtime(format!("ValueError: {name}() arg is an empty sequence")))
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(v: &Value) -> Result<Value> {
    match v {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(_) => Err(runtime("OverflowError: cannot convert float infinity or NaN to integer")),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| runtime(format!("ValueError: invalid literal for int() with base 10: {}", v.repr()))),
        other => other
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| runtime(format!("TypeError: int() argument must be a string or a number, not '{}'", other.type_name()))),
    }
}

fn to_float(v: &Value) -> Result<Value> {
    match v {
        Value::Str(s) => {
            let t = s.trim().to_ascii_lowercase();
            let parsed = match t.as_str() {
                "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                _ => t.parse::<f64>(),
            };
            parsed
                .map(Value::Float)
                .map_err(|_| runtime(format!("ValueError: could not convert string to float: {}", v.repr())))
        }
        other => other
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| runtime(format!("TypeError: float() argument must be a string or a number, not '{}'", other.type_name()))),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn round_value(args: &[Value]) -> Result<Value> {
    let digits = args.get(1).filter(|d| !matches!(d, Value::None));
    match (&args[0], digits) {
        (v, None) if v.as_int().is_some() => Ok(Value::Int(int_arg(v, "round")?)),
        (v, None) => {
            let f = float_arg(v, "round")?.round_ties_even();
            if f.is_finite() {
                Ok(Value::Int(f as i64))
            } else {
                Err(runtime("OverflowError: cannot convert float infinity to integer"))
            }
        }
        (v, Some(_)) if v.as_int().is_some() => Ok(Value::Int(int_arg(v, "round")?)),
        (v, Some(d)) => {
            let scale = 10f64.powi(i32::try_from(int_arg(d, "round")?).unwrap_or(0));
            Ok(Value::Float((float_arg(v, "round")? * scale).round_ties_even() / scale))
        }
    }
}

fn is_instance(v: &Value, ty: &Value) -> Result<bool> {
    match ty {
        Value::Tuple(types) => {
            for t in types.iter() {
                if is_instance(v, t)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) => Ok(v.type_name() == *name || (*name == "int" && matches!(v, Value::Bool(_)))),
        other => Err(runtime(format!(
            "TypeError: isinstance() arg 2 must be a type, not '{}'",
            other.type_name()
        ))),
    }
}

#[allow(clippy::too_many_lines)]
pub(super) fn call(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
    match name {
        "print" => {
            let line = args.iter().map(Value::display).collect::<Vec<_>>().join(" ");
            interp.print(line);
            Ok(Value::None)
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(pairs) => pairs.borrow().len(),
                r @ Value::Range { .. } => r.range_len(),
                other => {
                    return Err(runtime(format!(
                        "TypeError: object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(|a| int_arg(a, name)).collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(runtime("ValueError: range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => v
                    .as_int()
                    .and_then(i64::checked_abs)
                    .map(Value::Int)
                    .ok_or_else(|| bad_unary("abs()", v)),
            }
        }
        "min" => extreme(interp, name, args, &kwargs, Ordering::Less),
        "max" => extreme(interp, name, args, &kwargs, Ordering::Greater),
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in interp.iterate(&args[0])? {
                total = binary("+", &total, &item)?;
            }
            Ok(total)
        }
        "str" => Ok(Value::str(args.first().map(Value::display).unwrap_or_default())),
        "int" => args.first().map_or(Ok(Value::Int(0)), to_int),
        "float" => args.first().map_or(Ok(Value::Float(0.0)), to_float),
        "bool" => Ok(Value::Bool(args.first().is_some_and(Value::truthy))),
        "list" => Ok(Value::list(match args.first() {
            Some(v) => interp.iterate(v)?,
            None => Vec::new(),
        })),
        "tuple" => Ok(Value::tuple(match args.first() {
            Some(v) => interp.iterate(v)?,
            None => Vec::new(),
        })),
        "dict" => {
            let dict = Value::dict(Vec::new());
            if let Some(source) = args.first() {
                for pair in interp.iterate(source)? {
                    let kv = interp.iterate(&pair)?;
                    let [k, v] = <[Value; 2]>::try_from(kv)
                        .map_err(|_| runtime("ValueError: dictionary update sequence element has wrong length"))?;
                    set_item(&dict, k, v)?;
                }
            }
            for (k, v) in kwargs {
                set_item(&dict, Value::str(k), v)?;
            }
            Ok(dict)
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let items = interp.iterate(&args[0])?;
            Ok(Value::list(sort_values(interp, items, &kwargs)?))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = interp.iterate(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            round_value(&args)
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or_else(|| kwarg(&kwargs, "start")) {
                Some(s) => int_arg(s, name)?,
                None => 0,
            };
            let items = interp.iterate(&args[0])?;
            Ok(Value::list(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns = args.iter().map(|a| interp.iterate(a)).collect::<Result<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
                    .collect(),
            ))
        }
        "any" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args[0])?.iter().any(Value::truthy)))
        }
        "all" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args[0])?.iter().all(Value::truthy)))
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(is_instance(&args[0], &args[1])?))
        }
        math if math.starts_with("math.") => call_math(&math[5..], &args),
        other => Err(runtime(format!("NameError: name '{other}' is not defined"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn call_math(name: &str, args: &[Value]) -> Result<Value> {
    let x = || {
        args.first()
            .ok_or_else(|| runtime(format!("TypeError: {name}() missing argument")))
            .and_then(|v| float_arg(v, name))
    };
    match name {
        "sqrt" => {
            let v = x()?;
            if v < 0.0 {
                return Err(runtime("ValueError: math domain error"));
            }
            Ok(Value::Float(v.sqrt()))
        }
        "floor" | "ceil" => {
            let v = x()?;
            let r = if name == "floor" { v.floor() } else { v.ceil() };
            if r.is_finite() {
                Ok(Value::Int(r as i64))
            } else {
                Err(runtime("OverflowError: cannot convert float infinity to integer"))
            }
        }
        "fabs" => Ok(Value::Float(x()?.abs())),
        "exp" => Ok(Value::Float(x()?.exp())),
        "log" => {
            let v = x()?;
            if v <= 0.0 {
                return Err(runtime("ValueError: math domain error"));
            }
            match args.get(1) {
                Some(base) => Ok(Value::Float(v.ln() / float_arg(base, name)?.ln())),
                None => Ok(Value::Float(v.ln())),
            }
        }
        "pow" => {
            arity(name, args, 2, 2)?;
            Ok(Value::Float(x()?.powf(float_arg(&args[1], name)?)))
        }
        "gcd" => {
            let mut g = 0i64;
            for a in args {
                let mut b = int_arg(a, name)?.abs();
                let mut a2 = g;
                while b != 0 {
                    (a2, b) = (b, a2 % b);
                }
                g = a2;
            }
            Ok(Value::Int(g))
        }
        other => Err(runtime(format!("AttributeError: module 'math' has no attribute '{other}'"))),
    }
}

// ── Methods ──────────────────────────────────────────────────────────

fn str_arg<'a>(args: &'a [Value], i: usize, method: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(runtime(format!(
            "TypeError: {method}() argument must be str, not {}",
            other.type_name()
        ))),
        None => Err(runtime(format!("TypeError: {method}() missing argument"))),
    }
}

pub(super) fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value> {
    match receiver {
        Value::List(items) => list_method(interp, items, name, args, &kwargs),
        Value::Str(s) => str_method(interp, s, name, &args),
        Value::Dict(_) => dict_method(receiver, name, args),
        other => Err(runtime(format!(
            "AttributeError: '{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn list_method(
    interp: &mut Interpreter,
    items: &std::rc::Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    kwargs: &Kwargs,
) -> Result<Value> {
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            items.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.iterate(&args[0])?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let i = int_arg(&args[0], name)?;
            let i = if i < 0 { (i + len).max(0) } else { i.min(len) };
            items.insert(usize::try_from(i).unwrap_or(0), args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(runtime("IndexError: pop from empty list"));
            }
            let i = match args.first() {
                Some(index) => normalize_index(index, items.len(), "pop")?,
                None => items.len() - 1,
            };
            Ok(items.remove(i))
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let mut items = items.borrow_mut();
            let pos = items
                .iter()
                .position(|x| x.py_eq(&args[0]))
                .ok_or_else(|| runtime("ValueError: list.remove(x): x not in list"))?;
            items.remove(pos);
            Ok(Value::None)
        }
        "index" => {
            arity(name, &args, 1, 1)?;
            items
                .borrow()
                .iter()
                .position(|x| x.py_eq(&args[0]))
                .map(|p| Value::Int(i64::try_from(p).unwrap_or(i64::MAX)))
                .ok_or_else(|| runtime(format!("ValueError: {} is not in list", args[0].repr())))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let n = items.borrow().iter().filter(|x| x.py_eq(&args[0])).count();
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let current = items.borrow().clone();
            let sorted = sort_values(interp, current, kwargs)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(runtime(format!("AttributeError: 'list' object has no attribute '{other}'"))),
    }
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: &[Value]) -> Result<Value> {
    let flag = |b: bool| Ok(Value::Bool(b));
    let strip_set = |i: usize| -> Result<Option<Vec<char>>> {
        match args.get(i) {
            None | Some(Value::None) => Ok(None),
            Some(_) => Ok(Some(str_arg(args, i, name)?.chars().collect())),
        }
    };
    match name {
        "upper" => Ok(Value::str(s.to_uppercase())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "capitalize" => {
            let mut chars = s.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>(),
                None => String::new(),
            }))
        }
        "strip" | "lstrip" | "rstrip" => {
            let set = strip_set(0)?;
            let matches = |c: char| set.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
            Ok(Value::str(match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            }))
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(_) => {
                    let sep = str_arg(args, 0, name)?;
                    if sep.is_empty() {
                        return Err(runtime("ValueError: empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }
        "join" => {
            arity(name, args, 1, 1)?;
            let pieces = interp
                .iterate(&args[0])?
                .into_iter()
                .map(|v| match v {
                    Value::Str(p) => Ok(p.to_string()),
                    other => Err(runtime(format!(
                        "TypeError: sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::str(pieces.join(s)))
        }
        "replace" => Ok(Value::str(s.replace(str_arg(args, 0, name)?, str_arg(args, 1, name)?))),
        "startswith" => flag(s.starts_with(str_arg(args, 0, name)?)),
        "endswith" => flag(s.ends_with(str_arg(args, 0, name)?)),
        "find" => {
            let needle = str_arg(args, 0, name)?;
            Ok(Value::Int(s.find(needle).map_or(-1, |byte| {
                i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX)
            })))
        }
        "count" => {
            let needle = str_arg(args, 0, name)?;
            let n = if needle.is_empty() { s.chars().count() + 1 } else { s.matches(needle).count() };
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        "isdigit" => flag(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => flag(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isspace" => flag(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => flag(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)),
        "islower" => flag(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)),
        other => Err(runtime(format!("AttributeError: 'str' object has no attribute '{other}'"))),
    }
}

fn dict_method(dict: &Value, name: &str, args: Vec<Value>) -> Result<Value> {
    let Value::Dict(pairs) = dict else {
        return Err(runtime("expected a dict"));
    };
    let find = |key: &Value| pairs.borrow().iter().position(|(k, _)| k.py_eq(key));
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            Ok(match find(&args[0]) {
                Some(i) => pairs.borrow()[i].1.clone(),
                None => args.get(1).cloned().unwrap_or(Value::None),
            })
        }
        "keys" => Ok(Value::list(pairs.borrow().iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::list(pairs.borrow().iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::list(
            pairs
                .borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            arity(name, &args, 1, 2)?;
            match (find(&args[0]), args.get(1)) {
                (Some(i), _) => Ok(pairs.borrow_mut().remove(i).1),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(runtime(format!("KeyError: {}", args[0].repr()))),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            if let Some(i) = find(&args[0]) {
                return Ok(pairs.borrow()[i].1.clone());
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            set_item(dict, args[0].clone(), default.clone())?;
            Ok(default)
        }
        "update" => {
            arity(name, &args, 1, 1)?;
            let Value::Dict(other) = &args[0] else {
                return Err(runtime("TypeError: update() expects a dict"));
            };
            let incoming = other.borrow().clone();
            for (k, v) in incoming {
                set_item(dict, k, v)?;
            }
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(pairs.borrow().clone())),
        "clear" => {
            pairs.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(runtime(format!("AttributeError: 'dict' object has no attribute '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_follow_python_bounds() {
        let s = Value::str("hello");
        let at = |l: Option<i64>, u: Option<i64>, st: Option<i64>| {
            slice(&s, &l.map(Value::Int), &u.map(Value::Int), &st.map(Value::Int))
                .unwrap()
                .display()
        };
        assert_eq!(at(Some(1), Some(-1), None), "ell");
        assert_eq!(at(None, None, Some(-1)), "olleh");
        assert_eq!(at(Some(-100), Some(100), Some(2)), "hlo");
        assert_eq!(at(Some(3), Some(1), None), "");
    }

    #[test]
    fn floor_semantics() {
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_mod(7, -2), -1);
        assert_eq!(floor_mod(-7, 2), 1);
    }

    #[test]
    fn membership() {
        let xs = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert!(compare("in", &Value::Float(1.0), &xs).unwrap());
        assert!(compare("not in", &Value::str("b"), &xs).unwrap());
        let r = Value::Range { start: 0, stop: 10, step: 3 };
        assert!(compare("in", &Value::Int(9), &r).unwrap());
        assert!(!compare("in", &Value::Int(8), &r).unwrap());
    }

    #[test]
    fn banker_rounding() {
        assert_eq!(round_value(&[Value::Float(2.5)]).unwrap().repr(), "2");
        assert_eq!(round_value(&[Value::Float(3.5)]).unwrap().repr(), "4");
    }
}
