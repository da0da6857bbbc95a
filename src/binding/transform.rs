//! 声明式转换：format / map / filter

use crate::expr::{evaluate, json_to_string, Expr, ExprError, Path, Resolved, Scope};
use crate::model::Transform;
use serde_json::Value;

/// 依次应用转换；`Unset` 原样穿过所有转换
pub fn apply_transforms(
    value: Resolved,
    transforms: &[Transform],
    scope: &Scope<'_>,
) -> Result<Resolved, ExprError> {
    let mut current = value;
    for transform in transforms {
        let Resolved::Value(value) = current else {
            return Ok(Resolved::Unset);
        };
        current = Resolved::Value(apply_one(value, transform, scope)?);
    }
    Ok(current)
}

fn apply_one(value: Value, transform: &Transform, scope: &Scope<'_>) -> Result<Value, ExprError> {
    match transform {
        Transform::Format { pattern, decimals } => {
            let text = match (decimals, value.as_f64()) {
                (Some(decimals), Some(n)) => format!("{:.*}", *decimals as usize, n),
                _ => json_to_string(&value),
            };
            Ok(Value::String(match pattern {
                Some(pattern) => pattern.replace("{value}", &text),
                None => text,
            }))
        }
        Transform::Map { field, expr } => {
            let expr = expr.as_deref().map(Expr::parse).transpose()?;
            let field = field.as_deref().map(Path::parse);
            let map_item = |item: &Value| -> Result<Value, ExprError> {
                if let Some(expr) = &expr {
                    let mut scope = scope.clone();
                    scope.push("item", item);
                    return Ok(evaluate(expr, &scope)?.into_value_or_null());
                }
                Ok(match &field {
                    Some(path) => path.get(item).cloned().unwrap_or(Value::Null),
                    None => item.clone(),
                })
            };
            match &value {
                Value::Array(items) => items
                    .iter()
                    .map(map_item)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                single => map_item(single),
            }
        }
        Transform::Filter { predicate } => {
            let predicate = Expr::parse(predicate)?;
            let Value::Array(items) = value else {
                return Err(ExprError::Type("filter expects a list".to_string()));
            };
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                let keep = {
                    let mut scope = scope.clone();
                    scope.push("item", &item);
                    evaluate(&predicate, &scope)?.is_truthy()
                };
                if keep {
                    kept.push(item);
                }
            }
            Ok(Value::Array(kept))
        }
    }
}
