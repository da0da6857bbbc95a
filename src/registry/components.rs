//! 内置组件
//!
//! 只把解析好的属性整理成 [`UiNode`]，不做任何 I/O。

use super::{RenderProps, UiNode, WidgetRenderer};
use crate::error::RenderError;
use crate::expr::Resolved;
use serde_json::Value;

/// 容器 - 只承载子节点
pub struct ContainerComponent;

impl WidgetRenderer for ContainerComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let mut node = UiNode::new("container");
        if let Some(title) = props.text("title") {
            node = node.attr("title", title);
        }
        if let Some(layout) = props.text("layout") {
            node = node.attr("layout", layout);
        }
        Ok(node)
    }
}

/// 文本，优先取 `text`，其次 `value`
pub struct TextComponent;

impl WidgetRenderer for TextComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let text = props
            .text("text")
            .or_else(|| props.text("value"))
            .unwrap_or_default();
        Ok(UiNode::new("text").text(text))
    }
}

pub struct ButtonComponent;

impl WidgetRenderer for ButtonComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let label = props.text("label").unwrap_or_else(|| props.widget_id.clone());
        let disabled = props.get("disabled").is_truthy();
        Ok(UiNode::new("button").attr("disabled", disabled).text(label))
    }
}

/// 输入框，未设置的值显示为空串
pub struct InputComponent;

impl WidgetRenderer for InputComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let mut node = UiNode::new("input").attr("value", props.text("value").unwrap_or_default());
        if let Some(label) = props.text("label") {
            node = node.attr("label", label);
        }
        if let Some(placeholder) = props.text("placeholder") {
            node = node.attr("placeholder", placeholder);
        }
        Ok(node)
    }
}

/// 指标卡，值未到达时标记为加载中
///
/// 没有绑定 `value` 时显示主数据源的值 `data`。
pub struct KpiComponent;

impl WidgetRenderer for KpiComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let label = props.text("label").unwrap_or_default();
        let node = UiNode::new("kpi").attr("label", label);
        let value = match props.get("value") {
            Resolved::Unset => props.get("data"),
            bound => bound,
        };
        Ok(match value {
            Resolved::Unset => node.attr("loading", true),
            Resolved::Value(value) => node
                .attr("loading", false)
                .text(crate::expr::json_to_string(value)),
        })
    }
}

/// 列表，`items` 必须是数组
pub struct ListComponent;

impl WidgetRenderer for ListComponent {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        let items = match props.get("items") {
            Resolved::Unset | Resolved::Value(Value::Null) => Vec::new(),
            Resolved::Value(Value::Array(items)) => items.clone(),
            Resolved::Value(_) => {
                return Err(RenderError::new(&props.widget_type, "`items` must be a list"));
            }
        };
        Ok(UiNode::new("list")
            .attr("count", items.len())
            .attr("items", Value::Array(items)))
    }
}
