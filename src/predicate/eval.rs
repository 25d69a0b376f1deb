use serde_json::{Map, Number, Value};

use super::parser::{ArithOp, Builtin, CmpOp, Expr, Method};
use crate::error::PredicateError;
use crate::filter::{display_value, loose_eq};

type EvalResult = Result<Value, PredicateError>;

/// Evaluate `expr` against the payload. The payload is the only reachable state.
pub fn evaluate(expr: &Expr, arg: &Map<String, Value>) -> EvalResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Arg => Ok(Value::Object(arg.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, arg))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        // Lookups on the payload itself borrow from it instead of copying it.
        Expr::Index(target, key) => match (target.as_ref(), evaluate(key, arg)?) {
            (Expr::Arg, Value::String(k)) => {
                arg.get(&k).cloned().ok_or(PredicateError::KeyNotFound(k))
            }
            (target, key) => index(evaluate(target, arg)?, key),
        },
        Expr::Method(target, method, args) => {
            let args = args
                .iter()
                .map(|a| evaluate(a, arg))
                .collect::<Result<Vec<_>, _>>()?;
            match (target.as_ref(), method) {
                (Expr::Arg, Method::Get) => get(arg, args),
                (target, method) => call_method(evaluate(target, arg)?, *method, args),
            }
        }
        Expr::Call(builtin, args) => call_builtin(*builtin, evaluate(&args[0], arg)?),
        Expr::Neg(inner) => {
            let n = number(&evaluate(inner, arg)?, "unary '-'")?;
            to_value(-n)
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&evaluate(inner, arg)?))),
        // `and`/`or` yield one of their operands, like the dynamic languages users write these in.
        Expr::And(lhs, rhs) => {
            let lhs = evaluate(lhs, arg)?;
            if truthy(&lhs) {
                evaluate(rhs, arg)
            } else {
                Ok(lhs)
            }
        }
        Expr::Or(lhs, rhs) => {
            let lhs = evaluate(lhs, arg)?;
            if truthy(&lhs) {
                Ok(lhs)
            } else {
                evaluate(rhs, arg)
            }
        }
        Expr::Compare(lhs, op, rhs) => {
            compare(&evaluate(lhs, arg)?, *op, &evaluate(rhs, arg)?).map(Value::Bool)
        }
        Expr::Arith(lhs, op, rhs) => arith(evaluate(lhs, arg)?, *op, evaluate(rhs, arg)?),
        Expr::In {
            needle,
            haystack,
            negated,
        } => {
            let needle = evaluate(needle, arg)?;
            let found = match haystack.as_ref() {
                Expr::Arg => arg.contains_key(string_arg(&needle)?),
                haystack => contains(&evaluate(haystack, arg)?, &needle)?,
            };
            Ok(Value::Bool(found != *negated))
        }
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn index(target: Value, key: Value) -> EvalResult {
    match (target, key) {
        (Value::Object(mut map), Value::String(k)) => map
            .remove(&k)
            .ok_or(PredicateError::KeyNotFound(k)),
        (Value::Array(mut items), key) => {
            let i = integer(&key)?;
            let len = items.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if (0..len).contains(&resolved) {
                Ok(items.swap_remove(resolved as usize))
            } else {
                Err(PredicateError::KeyNotFound(i.to_string()))
            }
        }
        (target, _) => Err(type_error("cannot index", &target)),
    }
}

fn call_method(target: Value, method: Method, args: Vec<Value>) -> EvalResult {
    match (method, target) {
        (Method::Get, Value::Object(map)) => get(&map, args),
        (Method::Lower, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (Method::Upper, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        (Method::Strip, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        (Method::StartsWith, Value::String(s)) => {
            let prefix = string_arg(&args[0])?;
            Ok(Value::Bool(s.starts_with(prefix)))
        }
        (Method::EndsWith, Value::String(s)) => {
            let suffix = string_arg(&args[0])?;
            Ok(Value::Bool(s.ends_with(suffix)))
        }
        (method, target) => Err(type_error(&format!("no method {:?} on", method), &target)),
    }
}

fn get(map: &Map<String, Value>, mut args: Vec<Value>) -> EvalResult {
    let default = if args.len() > 1 { args.pop() } else { None };
    let key = match args.pop() {
        Some(Value::String(k)) => k,
        Some(other) => return Err(type_error("get() key must be a string, got", &other)),
        None => return Err(PredicateError::Type("get() needs a key".into())),
    };
    Ok(map.get(&key).cloned().or(default).unwrap_or(Value::Null))
}

fn call_builtin(builtin: Builtin, arg: Value) -> EvalResult {
    match builtin {
        Builtin::Len => match &arg {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            other => Err(type_error("len() of", other)),
        },
        Builtin::Abs => to_value(number(&arg, "abs()")?.abs()),
        Builtin::Str => Ok(Value::String(display_value(&arg))),
        Builtin::Float => match &arg {
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| PredicateError::Type(format!("float() cannot parse {:?}", s)))
                .and_then(to_value),
            Value::Bool(b) => to_value(if *b { 1.0 } else { 0.0 }),
            other => Err(type_error("float() of", other)),
        },
    }
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> Result<bool, PredicateError> {
    match op {
        CmpOp::Eq => return Ok(loose_eq(lhs, rhs)),
        CmpOp::Ne => return Ok(!loose_eq(lhs, rhs)),
        _ => {}
    }

    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
    .ok_or_else(|| {
        PredicateError::Type(format!(
            "cannot order {} and {}",
            kind(lhs),
            kind(rhs)
        ))
    })?;

    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn arith(lhs: Value, op: ArithOp, rhs: Value) -> EvalResult {
    match (op, &lhs, &rhs) {
        (ArithOp::Add, Value::String(a), Value::String(b)) => {
            return Ok(Value::String(format!("{}{}", a, b)))
        }
        (ArithOp::Add, Value::Array(a), Value::Array(b)) => {
            return Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        _ => {}
    }

    let a = number(&lhs, "arithmetic")?;
    let b = number(&rhs, "arithmetic")?;
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return Err(PredicateError::DivisionByZero),
        ArithOp::Div => a / b,
        ArithOp::Rem if b == 0.0 => return Err(PredicateError::DivisionByZero),
        // Result takes the sign of the divisor.
        ArithOp::Rem => a - b * (a / b).floor(),
    };
    to_value(result)
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, PredicateError> {
    match haystack {
        Value::String(s) => Ok(s.contains(string_arg(needle)?)),
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(map.contains_key(string_arg(needle)?)),
        other => Err(type_error("'in' needs a string, list or object, got", other)),
    }
}

fn number(value: &Value, context: &str) -> Result<f64, PredicateError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| PredicateError::Type(format!("{}: number out of range", context))),
        other => Err(type_error(&format!("{} needs a number, got", context), other)),
    }
}

fn integer(value: &Value) -> Result<i64, PredicateError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| type_error("list index must be an integer, got", value)),
        other => Err(type_error("list index must be an integer, got", other)),
    }
}

fn string_arg(value: &Value) -> Result<&str, PredicateError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(type_error("expected a string, got", other)),
    }
}

fn to_value(n: f64) -> EvalResult {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| PredicateError::Type(format!("non-finite result {}", n)))
}

fn type_error(context: &str, value: &Value) -> PredicateError {
    PredicateError::Type(format!("{} {}", context, kind(value)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
