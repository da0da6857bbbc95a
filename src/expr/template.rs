//! 模板插值 - 处理 `{{expr}}` 占位符

use super::{evaluate, Expr, ExprError, Resolved, Scope};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is a valid regex"));

/// 插值替换 `{{expression}}`
///
/// 整个字符串恰好是一个占位符时保留求值结果的原始类型，
/// 否则按文本拼接，`Unset` 拼接为空串。
pub fn interpolate(template: &str, scope: &Scope<'_>) -> Result<Value, ExprError> {
    let trimmed = template.trim();
    if let Some(inner) = whole_placeholder(trimmed) {
        return Ok(match evaluate(&Expr::parse(inner)?, scope)? {
            Resolved::Value(value) => value,
            Resolved::Unset => Value::Null,
        });
    }

    if !template.contains("{{") {
        return Ok(Value::String(template.to_string()));
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        let resolved = evaluate(&Expr::parse(inner.as_str().trim())?, scope)?;
        out.push_str(&resolved.to_display());
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(Value::String(out))
}

/// 递归替换 JSON 值中所有字符串里的占位符
pub fn render_template(template: &Value, scope: &Scope<'_>) -> Result<Value, ExprError> {
    match template {
        Value::String(s) => interpolate(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| render_template(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), render_template(value, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// `{{ a }}` 且中间不再有其他占位符
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
