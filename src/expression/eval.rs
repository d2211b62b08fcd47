//! Tree-walking evaluator over `serde_json::Value`.
//!
//! `None` stands for `undefined`. Values borrowed from the context stay
//! borrowed along a path so `$.a.b.c` never clones the whole document.

use super::lexer::BinaryOp;
use super::parser::{Expr, Lambda, Literal, Method};
use super::ExpressionError;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::cmp::Ordering;

type Value<'s> = Option<Cow<'s, JsonValue>>;

/// Variables visible while evaluating.
///
/// Only one lambda parameter is bound at a time: a nested lambda replaces
/// the outer binding, so referring to the outer parameter from inside it
/// is an `UnboundVariable` error.
#[derive(Clone, Copy)]
pub struct Scope<'s> {
    root: &'s JsonValue,
    binding: Option<(&'s str, &'s JsonValue)>,
}

impl<'s> Scope<'s> {
    pub fn new(root: &'s JsonValue) -> Self {
        Self {
            root,
            binding: None,
        }
    }

    fn bind<'b>(&self, name: &'b str, value: &'b JsonValue) -> Scope<'b>
    where
        's: 'b,
    {
        Scope {
            root: self.root,
            binding: Some((name, value)),
        }
    }
}

/// Evaluate a parsed expression; `Ok(None)` is `undefined`.
pub fn eval_owned(expr: &Expr, scope: Scope<'_>) -> Result<Option<JsonValue>, ExpressionError> {
    Ok(eval(expr, scope)?.map(Cow::into_owned))
}

fn eval<'s>(expr: &'s Expr, scope: Scope<'s>) -> Result<Value<'s>, ExpressionError> {
    match expr {
        Expr::Literal(Literal::Value(v)) => Ok(Some(Cow::Borrowed(v))),
        Expr::Literal(Literal::Undefined) => Ok(None),
        Expr::Root => Ok(Some(Cow::Borrowed(scope.root))),
        Expr::Var(name) => match scope.binding {
            Some((bound, value)) if bound == name.as_str() => Ok(Some(Cow::Borrowed(value))),
            _ => Err(ExpressionError::UnboundVariable(name.clone())),
        },
        Expr::Property { target, name } => Ok(eval(target, scope)?.and_then(|t| property(t, name))),
        Expr::Index { target, index } => {
            let target = eval(target, scope)?;
            let key = eval(index, scope)?;
            Ok(match (target, key) {
                (Some(t), Some(k)) => index_value(t, &k),
                _ => None,
            })
        }
        Expr::Call { target, method } => {
            let target = match eval(target, scope)? {
                Some(t) if !t.is_null() => t,
                _ => return Ok(None),
            };
            call(target, method, scope).map(|v| v.map(Cow::Owned))
        }
        Expr::Object(fields) => {
            let mut map = serde_json::Map::new();
            for (key, value) in fields {
                // undefined members are dropped, as JSON serialization would
                if let Some(v) = eval(value, scope)? {
                    map.insert(key.clone(), v.into_owned());
                }
            }
            Ok(Some(Cow::Owned(JsonValue::Object(map))))
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, scope)?.map(Cow::into_owned).unwrap_or(JsonValue::Null));
            }
            Ok(Some(Cow::Owned(JsonValue::Array(out))))
        }
        Expr::Binary { op, lhs, rhs } => {
            let left = eval(lhs, scope)?;
            match op {
                BinaryOp::And => {
                    if truthy(left.as_deref()) {
                        eval(rhs, scope)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::Or => {
                    if truthy(left.as_deref()) {
                        Ok(left)
                    } else {
                        eval(rhs, scope)
                    }
                }
                _ => {
                    let right = eval(rhs, scope)?;
                    let result = compare(*op, left.as_deref(), right.as_deref());
                    Ok(Some(Cow::Owned(JsonValue::Bool(result))))
                }
            }
        }
        Expr::Not(inner) => {
            let value = eval(inner, scope)?;
            Ok(Some(Cow::Owned(JsonValue::Bool(!truthy(value.as_deref())))))
        }
    }
}

fn property<'s>(target: Cow<'s, JsonValue>, name: &str) -> Value<'s> {
    match target {
        Cow::Borrowed(JsonValue::Object(map)) => map.get(name).map(Cow::Borrowed),
        Cow::Owned(JsonValue::Object(mut map)) => map.remove(name).map(Cow::Owned),
        other => builtin_property(&other, name).map(Cow::Owned),
    }
}

/// `.length`, `.first` and friends written without parentheses.
fn builtin_property(target: &JsonValue, name: &str) -> Option<JsonValue> {
    match target {
        JsonValue::Array(items) => match name {
            "length" => Some(JsonValue::from(items.len())),
            "first" => items.first().cloned(),
            "last" => items.last().cloned(),
            "flat" => Some(flatten(items)),
            "reverse" => Some(JsonValue::Array(items.iter().rev().cloned().collect())),
            _ => None,
        },
        JsonValue::String(s) if name == "length" => Some(JsonValue::from(s.chars().count())),
        _ => None,
    }
}

fn index_value<'s>(target: Cow<'s, JsonValue>, key: &JsonValue) -> Value<'s> {
    let key = match key {
        JsonValue::Number(n) => match n.as_u64() {
            Some(idx) => IndexKey::Position(idx as usize),
            None => return None,
        },
        JsonValue::String(s) => IndexKey::Name(s.as_str()),
        _ => return None,
    };

    match (target, key) {
        (Cow::Borrowed(JsonValue::Array(items)), IndexKey::Position(i)) => {
            items.get(i).map(Cow::Borrowed)
        }
        (Cow::Borrowed(JsonValue::Object(map)), IndexKey::Name(k)) => map.get(k).map(Cow::Borrowed),
        (Cow::Borrowed(JsonValue::Object(map)), IndexKey::Position(i)) => {
            map.get(&i.to_string()).map(Cow::Borrowed)
        }
        (Cow::Owned(JsonValue::Array(mut items)), IndexKey::Position(i)) => {
            (i < items.len()).then(|| Cow::Owned(items.swap_remove(i)))
        }
        (Cow::Owned(JsonValue::Object(mut map)), IndexKey::Name(k)) => map.remove(k).map(Cow::Owned),
        (Cow::Owned(JsonValue::Object(mut map)), IndexKey::Position(i)) => {
            map.remove(&i.to_string()).map(Cow::Owned)
        }
        (other, IndexKey::Position(i)) => match &*other {
            JsonValue::String(s) => s.chars().nth(i).map(|c| Cow::Owned(JsonValue::String(c.to_string()))),
            _ => None,
        },
        _ => None,
    }
}

enum IndexKey<'k> {
    Position(usize),
    Name(&'k str),
}

fn call(
    target: Cow<'_, JsonValue>,
    method: &Method,
    scope: Scope<'_>,
) -> Result<Option<JsonValue>, ExpressionError> {
    let items = match &*target {
        JsonValue::Array(items) => items.as_slice(),
        JsonValue::String(s) if *method == Method::Length => {
            return Ok(Some(JsonValue::from(s.chars().count())));
        }
        JsonValue::Object(map) if *method == Method::Length => {
            return Ok(Some(JsonValue::from(map.len())));
        }
        other => {
            return Err(ExpressionError::TypeMismatch {
                method: method_name(method),
                found: type_name(other),
            })
        }
    };

    let result = match method {
        Method::Length => JsonValue::from(items.len()),
        Method::First => return Ok(items.first().cloned()),
        Method::Last => return Ok(items.last().cloned()),
        Method::Flat => flatten(items),
        Method::Reverse => JsonValue::Array(items.iter().rev().cloned().collect()),
        Method::Map(lambda) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(apply(lambda, item, scope)?.unwrap_or(JsonValue::Null));
            }
            JsonValue::Array(out)
        }
        Method::Filter(lambda) => {
            let mut out = Vec::new();
            for item in items {
                if truthy(apply(lambda, item, scope)?.as_ref()) {
                    out.push(item.clone());
                }
            }
            JsonValue::Array(out)
        }
        Method::Find(lambda) => {
            for item in items {
                if truthy(apply(lambda, item, scope)?.as_ref()) {
                    return Ok(Some(item.clone()));
                }
            }
            return Ok(None);
        }
        Method::Sort(key) => {
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                let sort_key = match key {
                    Some(lambda) => apply(lambda, item, scope)?,
                    None => Some(item.clone()),
                };
                keyed.push((sort_key, item));
            }
            keyed.sort_by(|(a, _), (b, _)| order(a.as_ref(), b.as_ref()));
            JsonValue::Array(keyed.into_iter().map(|(_, item)| item.clone()).collect())
        }
        Method::Slice { start, end } => {
            let len = items.len() as i64;
            let start = slice_bound(eval(start, scope)?.as_deref(), 0, len)?;
            let end = match end {
                Some(e) => slice_bound(eval(e, scope)?.as_deref(), len, len)?,
                None => len,
            };
            let out = if start < end {
                items[start as usize..end as usize].to_vec()
            } else {
                vec![]
            };
            JsonValue::Array(out)
        }
    };

    Ok(Some(result))
}

fn apply(
    lambda: &Lambda,
    item: &JsonValue,
    scope: Scope<'_>,
) -> Result<Option<JsonValue>, ExpressionError> {
    let inner = scope.bind(&lambda.param, item);
    eval_owned(&lambda.body, inner)
}

/// JavaScript `slice` bound: negative counts from the end, then clamp.
fn slice_bound(value: Option<&JsonValue>, default: i64, len: i64) -> Result<i64, ExpressionError> {
    let raw = match value {
        None => return Ok(default),
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0) as i64,
        Some(other) => {
            return Err(ExpressionError::InvalidArgument(format!(
                "slice bound must be a number, got {}",
                type_name(other)
            )))
        }
    };
    let bound = if raw < 0 { len + raw } else { raw };
    Ok(bound.clamp(0, len))
}

fn flatten(items: &[JsonValue]) -> JsonValue {
    let mut out = Vec::new();
    for item in items {
        match item {
            JsonValue::Array(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    JsonValue::Array(out)
}

/// JavaScript truthiness.
pub fn truthy(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn compare(op: BinaryOp, left: Option<&JsonValue>, right: Option<&JsonValue>) -> bool {
    match op {
        BinaryOp::Eq => loose_eq(left, right),
        BinaryOp::NotEq => !loose_eq(left, right),
        BinaryOp::StrictEq => strict_eq(left, right),
        BinaryOp::StrictNotEq => !strict_eq(left, right),
        BinaryOp::Gt => relation(left, right).is_some_and(|o| o == Ordering::Greater),
        BinaryOp::Gte => relation(left, right).is_some_and(|o| o != Ordering::Less),
        BinaryOp::Lt => relation(left, right).is_some_and(|o| o == Ordering::Less),
        BinaryOp::Lte => relation(left, right).is_some_and(|o| o != Ordering::Greater),
        BinaryOp::And | BinaryOp::Or => false,
    }
}

fn strict_eq(left: Option<&JsonValue>, right: Option<&JsonValue>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn loose_eq(left: Option<&JsonValue>, right: Option<&JsonValue>) -> bool {
    let nullish = |v: Option<&JsonValue>| matches!(v, None | Some(JsonValue::Null));
    if nullish(left) || nullish(right) {
        return nullish(left) && nullish(right);
    }
    match (left, right) {
        (Some(JsonValue::Number(a)), Some(JsonValue::String(s)))
        | (Some(JsonValue::String(s)), Some(JsonValue::Number(a))) => {
            s.trim().parse::<f64>().ok() == a.as_f64()
        }
        _ => strict_eq(left, right),
    }
}

/// Ordering for `<`/`>`: numbers numerically, strings lexically,
/// numeric strings against numbers numerically; anything else is unordered.
fn relation(left: Option<&JsonValue>, right: Option<&JsonValue>) -> Option<Ordering> {
    match (left?, right?) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Number(a), JsonValue::String(b)) => a.as_f64()?.partial_cmp(&b.trim().parse().ok()?),
        (JsonValue::String(a), JsonValue::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

/// Total order used by `sort`: numbers, then strings, then booleans,
/// then everything else; `null`/`undefined` sort last.
fn order(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            Some(JsonValue::Number(_)) => 0,
            Some(JsonValue::String(_)) => 1,
            Some(JsonValue::Bool(_)) => 2,
            Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => 3,
            Some(JsonValue::Null) | None => 4,
        }
    }
    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(_)), Some(JsonValue::Number(_)))
        | (Some(JsonValue::String(_)), Some(JsonValue::String(_))) => {
            relation(a, b).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::Map(_) => "map",
        Method::Filter(_) => "filter",
        Method::Find(_) => "find",
        Method::Sort(_) => "sort",
        Method::Slice { .. } => "slice",
        Method::Length => "length",
        Method::First => "first",
        Method::Last => "last",
        Method::Flat => "flat",
        Method::Reverse => "reverse",
    }
}

pub(crate) fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
