//! 表单校验

use crate::error::ValidationError;
use crate::expr::Resolved;
use crate::model::{CompareOp, PageConfig, ValidationRule, WidgetDescriptor};
use crate::state::LocalState;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// 校验控件并把结果写回本地状态；`widget_ids` 为空时校验所有带规则的控件
///
/// 通过校验的控件会清除旧的行内信息。
pub fn validate_widgets(page: &PageConfig, state: &LocalState, widget_ids: &[String]) -> Vec<ValidationError> {
    let mut targets: Vec<&WidgetDescriptor> = Vec::new();
    if widget_ids.is_empty() {
        page.visit_widgets(|widget| {
            if !widget.validation.is_empty() {
                targets.push(widget);
            }
        });
    } else {
        for id in widget_ids {
            match page.find_widget(id) {
                Some(widget) => targets.push(widget),
                None => tracing::warn!(widget = %id, "validate references unknown widget"),
            }
        }
    }

    let mut errors = Vec::new();
    for widget in targets {
        let value = state.get_str(widget.value_path());
        let messages: Vec<String> = widget
            .validation
            .iter()
            .filter_map(|rule| check_rule(rule, &value, page, state).err())
            .collect();
        state.set_validation(&widget.id, messages.clone());
        errors.extend(messages.into_iter().map(|message| ValidationError {
            widget_id: widget.id.clone(),
            message,
        }));
    }
    errors
}

fn is_blank(value: &Resolved) -> bool {
    match value {
        Resolved::Unset | Resolved::Value(Value::Null) => true,
        Resolved::Value(Value::String(s)) => s.trim().is_empty(),
        Resolved::Value(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

fn check_rule(rule: &ValidationRule, value: &Resolved, page: &PageConfig, state: &LocalState) -> Result<(), String> {
    // 非必填规则只检查已填写的值
    if !matches!(rule, ValidationRule::Required { .. }) && is_blank(value) {
        return Ok(());
    }

    match rule {
        ValidationRule::Required { message } => {
            if is_blank(value) {
                return Err(message.clone().unwrap_or_else(|| "this field is required".to_string()));
            }
        }
        ValidationRule::Pattern { pattern, message } => {
            let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
            if !regex.is_match(&value.to_display()) {
                return Err(message.clone().unwrap_or_else(|| "invalid format".to_string()));
            }
        }
        ValidationRule::Range { min, max, message } => {
            let Some(n) = value.as_f64() else {
                return Err(message.clone().unwrap_or_else(|| "must be a number".to_string()));
            };
            let below = min.is_some_and(|min| n < min);
            let above = max.is_some_and(|max| n > max);
            if below || above {
                return Err(message.clone().unwrap_or_else(|| range_message(*min, *max)));
            }
        }
        ValidationRule::Length { min, max, message } => {
            let len = match value {
                Resolved::Value(Value::Array(items)) => items.len(),
                other => other.to_display().chars().count(),
            };
            let short = min.is_some_and(|min| len < min);
            let long = max.is_some_and(|max| len > max);
            if short || long {
                return Err(message.clone().unwrap_or_else(|| length_message(*min, *max)));
            }
        }
        ValidationRule::Compare { op, other, message } => {
            let other_path = page
                .find_widget(other)
                .map(WidgetDescriptor::value_path)
                .unwrap_or(other.as_str());
            let other_value = state.get_str(other_path);
            if !compare(*op, value, &other_value) {
                return Err(message
                    .clone()
                    .unwrap_or_else(|| format!("must be {op:?} `{other}`").to_lowercase()));
            }
        }
    }
    Ok(())
}

fn range_message(min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("must be between {min} and {max}"),
        (Some(min), None) => format!("must be at least {min}"),
        (None, Some(max)) => format!("must be at most {max}"),
        (None, None) => "out of range".to_string(),
    }
}

fn length_message(min: Option<usize>, max: Option<usize>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("length must be between {min} and {max}"),
        (Some(min), None) => format!("must be at least {min} characters"),
        (None, Some(max)) => format!("must be at most {max} characters"),
        (None, None) => "invalid length".to_string(),
    }
}

/// 两侧都是数字时按数值比较，否则按文本比较
fn compare(op: CompareOp, left: &Resolved, right: &Resolved) -> bool {
    let ordering = match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(left.to_display().cmp(&right.to_display())),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
    }
}
