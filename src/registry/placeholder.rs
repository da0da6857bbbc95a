//! 占位节点

use super::{RenderProps, UiNode, WidgetRenderer};
use crate::error::RenderError;
use serde::Serialize;

/// 占位原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaceholderKind {
    /// 未注册的控件类型
    UnknownType,
    ConfigError,
    DataError,
    RenderError,
}

impl PlaceholderKind {
    fn as_str(self) -> &'static str {
        match self {
            PlaceholderKind::UnknownType => "unknownType",
            PlaceholderKind::ConfigError => "configError",
            PlaceholderKind::DataError => "dataError",
            PlaceholderKind::RenderError => "renderError",
        }
    }
}

/// 未注册类型使用的渲染器，输出不响应任何交互的占位节点
pub struct FallbackRenderer;

impl WidgetRenderer for FallbackRenderer {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        Ok(UiNode::new("placeholder")
            .attr("reason", PlaceholderKind::UnknownType.as_str())
            .attr("widgetType", props.widget_type.as_str())
            .text(format!("unsupported widget `{}`", props.widget_type)))
    }
}

pub fn error_placeholder(kind: PlaceholderKind, message: &str) -> UiNode {
    UiNode::new("placeholder")
        .attr("reason", kind.as_str())
        .text(message)
}
