//! 表达式求值
//!
//! 求值器没有副作用：只读作用域，只调用固定集合内的内置函数。

use super::parser::{number_value, Access, BinaryOp, Expr, UnaryOp};
use super::path::Segment;
use super::{ExprError, Resolved};
use crate::runtime::AuthContext;
use serde_json::Value;
use std::cmp::Ordering;

/// 求值作用域：若干具名根值加上可选的权限上下文
///
/// 后加入的同名根会遮蔽先加入的。
#[derive(Clone, Default)]
pub struct Scope<'a> {
    roots: Vec<(&'a str, &'a Value)>,
    auth: Option<&'a dyn AuthContext>,
    auth_attributes: Option<Value>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'a str, value: &'a Value) -> Self {
        self.roots.push((name, value));
        self
    }

    pub fn with_auth(mut self, auth: &'a dyn AuthContext) -> Self {
        self.auth_attributes = Some(auth.attributes());
        self.auth = Some(auth);
        self
    }

    pub fn push(&mut self, name: &'a str, value: &'a Value) {
        self.roots.push((name, value));
    }

    fn root(&self, name: &str) -> Option<&Value> {
        if name == "auth" {
            if let Some(attrs) = &self.auth_attributes {
                return Some(attrs);
            }
        }
        self.roots
            .iter()
            .rev()
            .find(|(root, _)| *root == name)
            .map(|(_, value)| *value)
    }
}

pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Resolved, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(Resolved::Value(value.clone())),
        Expr::Unset => Ok(Resolved::Unset),
        Expr::Path { root, access } => eval_path(root, access, scope),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, scope)?.into_value_or_null());
            }
            Ok(Resolved::Value(Value::Array(out)))
        }
        Expr::Unary(op, inner) => {
            let value = evaluate(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Resolved::Value(Value::Bool(!value.is_truthy()))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(n) => Ok(Resolved::Value(number_value(-n))),
                    None if value.is_unset() => Ok(Resolved::Unset),
                    None => Err(ExprError::Type("cannot negate a non-number".to_string())),
                },
            }
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, scope),
        Expr::Conditional(cond, then, otherwise) => {
            if evaluate(cond, scope)?.is_truthy() {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        Expr::Call(name, args) => call(name, args, scope),
    }
}

fn eval_path(root: &str, access: &[Access], scope: &Scope<'_>) -> Result<Resolved, ExprError> {
    let Some(mut current) = scope.root(root) else {
        return Ok(Resolved::Unset);
    };
    for item in access {
        let segment = match item {
            Access::Static(segment) => segment.clone(),
            Access::Dynamic(inner) => match evaluate(inner, scope)? {
                Resolved::Value(Value::String(key)) => Segment::Key(key),
                Resolved::Value(Value::Number(n)) => match n.as_u64() {
                    Some(index) => Segment::Index(index as usize),
                    None => return Ok(Resolved::Unset),
                },
                _ => return Ok(Resolved::Unset),
            },
        };
        let next = match (&segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            // `list.length` 兼容写法
            (Segment::Key(key), Value::Array(items)) if key == "length" => {
                return Ok(Resolved::Value(Value::from(items.len())));
            }
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Resolved::Unset),
        }
    }
    Ok(Resolved::Value(current.clone()))
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Result<Resolved, ExprError> {
    // 短路
    match op {
        BinaryOp::And => {
            let l = evaluate(left, scope)?;
            if !l.is_truthy() {
                return Ok(l);
            }
            return evaluate(right, scope);
        }
        BinaryOp::Or => {
            let l = evaluate(left, scope)?;
            if l.is_truthy() {
                return Ok(l);
            }
            return evaluate(right, scope);
        }
        _ => {}
    }

    let l = evaluate(left, scope)?;
    let r = evaluate(right, scope)?;
    let bool_value = |b: bool| Ok(Resolved::Value(Value::Bool(b)));
    match op {
        BinaryOp::Eq => bool_value(loose_eq(&l, &r)),
        BinaryOp::Ne => bool_value(!loose_eq(&l, &r)),
        BinaryOp::Lt => bool_value(compare(&l, &r) == Some(Ordering::Less)),
        BinaryOp::Le => bool_value(matches!(compare(&l, &r), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => bool_value(compare(&l, &r) == Some(Ordering::Greater)),
        BinaryOp::Ge => bool_value(matches!(compare(&l, &r), Some(Ordering::Greater | Ordering::Equal))),
        BinaryOp::Add => {
            if matches!(l, Resolved::Value(Value::String(_))) || matches!(r, Resolved::Value(Value::String(_))) {
                return Ok(Resolved::Value(Value::String(format!("{}{}", l.to_display(), r.to_display()))));
            }
            arithmetic(&l, &r, |a, b| Ok(a + b))
        }
        BinaryOp::Sub => arithmetic(&l, &r, |a, b| Ok(a - b)),
        BinaryOp::Mul => arithmetic(&l, &r, |a, b| Ok(a * b)),
        BinaryOp::Div => arithmetic(&l, &r, |a, b| {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(a / b)
            }
        }),
        BinaryOp::Rem => arithmetic(&l, &r, |a, b| {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(a % b)
            }
        }),
        BinaryOp::And | BinaryOp::Or => Ok(Resolved::Unset),
    }
}

fn arithmetic(
    l: &Resolved,
    r: &Resolved,
    f: impl Fn(f64, f64) -> Result<f64, ExprError>,
) -> Result<Resolved, ExprError> {
    if l.is_unset() || r.is_unset() {
        return Ok(Resolved::Unset);
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Resolved::Value(number_value(f(a, b)?))),
        _ => Err(ExprError::Type(format!(
            "arithmetic on non-numbers `{}` and `{}`",
            l.to_display(),
            r.to_display()
        ))),
    }
}

fn loose_eq(l: &Resolved, r: &Resolved) -> bool {
    match (l, r) {
        (Resolved::Unset, Resolved::Unset) => true,
        (Resolved::Value(Value::Number(a)), Resolved::Value(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Resolved::Value(a), Resolved::Value(b)) => a == b,
        _ => false,
    }
}

fn compare(l: &Resolved, r: &Resolved) -> Option<Ordering> {
    match (l, r) {
        (Resolved::Value(Value::Number(a)), Resolved::Value(Value::Number(b))) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Resolved::Value(Value::String(a)), Resolved::Value(Value::String(b))) => Some(a.cmp(b)),
        _ => None,
    }
}

/// 内置函数的封闭集合
fn call(name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Resolved, ExprError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExprError::Arity {
                function: name.to_string(),
                expected: n,
                found: args.len(),
            })
        }
    };
    let value = |v: Value| Ok(Resolved::Value(v));

    match name {
        "isUnset" => {
            arity(1)?;
            value(Value::Bool(evaluate(&args[0], scope)?.is_unset()))
        }
        "isNull" => {
            arity(1)?;
            value(Value::Bool(matches!(evaluate(&args[0], scope)?, Resolved::Value(Value::Null))))
        }
        "isEmpty" => {
            arity(1)?;
            let empty = match evaluate(&args[0], scope)? {
                Resolved::Unset | Resolved::Value(Value::Null) => true,
                Resolved::Value(Value::String(s)) => s.is_empty(),
                Resolved::Value(Value::Array(a)) => a.is_empty(),
                Resolved::Value(Value::Object(o)) => o.is_empty(),
                Resolved::Value(_) => false,
            };
            value(Value::Bool(empty))
        }
        "len" => {
            arity(1)?;
            match evaluate(&args[0], scope)? {
                Resolved::Value(Value::String(s)) => value(Value::from(s.chars().count())),
                Resolved::Value(Value::Array(a)) => value(Value::from(a.len())),
                Resolved::Value(Value::Object(o)) => value(Value::from(o.len())),
                Resolved::Unset => Ok(Resolved::Unset),
                _ => Err(ExprError::Type("len() expects a string, list or object".to_string())),
            }
        }
        "coalesce" => {
            for arg in args {
                let resolved = evaluate(arg, scope)?;
                if !matches!(resolved, Resolved::Unset | Resolved::Value(Value::Null)) {
                    return Ok(resolved);
                }
            }
            Ok(Resolved::Unset)
        }
        "hasRole" | "hasPermission" => {
            arity(1)?;
            let key = evaluate(&args[0], scope)?.to_display();
            let granted = scope.auth.is_some_and(|auth| {
                if name == "hasRole" {
                    auth.has_role(&key)
                } else {
                    auth.has_permission(&key)
                }
            });
            value(Value::Bool(granted))
        }
        "lower" | "upper" | "trim" => {
            arity(1)?;
            let resolved = evaluate(&args[0], scope)?;
            if resolved.is_unset() {
                return Ok(Resolved::Unset);
            }
            let text = resolved.to_display();
            value(Value::String(match name {
                "lower" => text.to_lowercase(),
                "upper" => text.to_uppercase(),
                _ => text.trim().to_string(),
            }))
        }
        "contains" => {
            arity(2)?;
            let haystack = evaluate(&args[0], scope)?;
            let needle = evaluate(&args[1], scope)?;
            let found = match (&haystack, &needle) {
                (Resolved::Value(Value::String(h)), n) => h.contains(&n.to_display()),
                (Resolved::Value(Value::Array(items)), Resolved::Value(n)) => items.contains(n),
                (Resolved::Value(Value::Object(map)), n) => map.contains_key(&n.to_display()),
                _ => false,
            };
            value(Value::Bool(found))
        }
        "startsWith" => {
            arity(2)?;
            let text = evaluate(&args[0], scope)?.to_display();
            let prefix = evaluate(&args[1], scope)?.to_display();
            value(Value::Bool(text.starts_with(&prefix)))
        }
        "number" => {
            arity(1)?;
            let resolved = evaluate(&args[0], scope)?;
            match resolved.as_f64() {
                Some(n) => value(number_value(n)),
                None => Ok(Resolved::Unset),
            }
        }
        "string" => {
            arity(1)?;
            let resolved = evaluate(&args[0], scope)?;
            if resolved.is_unset() {
                return Ok(Resolved::Unset);
            }
            value(Value::String(resolved.to_display()))
        }
        "round" => {
            if args.is_empty() || args.len() > 2 {
                return Err(ExprError::Arity {
                    function: name.to_string(),
                    expected: 2,
                    found: args.len(),
                });
            }
            let Some(n) = evaluate(&args[0], scope)?.as_f64() else {
                return Ok(Resolved::Unset);
            };
            let digits = match args.get(1) {
                Some(arg) => evaluate(arg, scope)?.as_f64().unwrap_or(0.0),
                None => 0.0,
            };
            let factor = 10f64.powi(digits as i32);
            value(number_value((n * factor).round() / factor))
        }
        "concat" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&evaluate(arg, scope)?.to_display());
            }
            value(Value::String(out))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}
