//! 渲染结果树

use crate::datasource::DataStatus;
use crate::registry::{PlaceholderKind, RenderProps, UiNode};
use serde::Serialize;
use serde_json::Value;

/// 事件到动作的挂载点
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub event: String,
    pub action_id: String,
    /// 触发时以事件数据为作用域渲染
    pub payload: Value,
}

/// 单个控件的渲染结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: String,
    pub widget_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<PlaceholderKind>,
    pub ui: UiNode,
    /// 主数据源状态
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DataStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub props: RenderProps,
    /// 行内校验信息
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<EventHandler>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

impl RenderNode {
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn handler(&self, event: &str) -> Option<&EventHandler> {
        self.handlers.iter().find(|handler| handler.event == event)
    }
}

/// 一次渲染的输出
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTree {
    pub page_id: String,
    pub nodes: Vec<RenderNode>,
}

impl RenderTree {
    /// 深度优先展开
    pub fn flatten(&self) -> Vec<&RenderNode> {
        fn walk<'a>(nodes: &'a [RenderNode], out: &mut Vec<&'a RenderNode>) {
            for node in nodes {
                out.push(node);
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.flatten().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&RenderNode> {
        self.flatten().into_iter().find(|node| node.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.flatten().into_iter().map(|node| node.id.as_str()).collect()
    }

    pub fn handler(&self, widget_id: &str, event: &str) -> Option<&EventHandler> {
        self.find(widget_id)?.handler(event)
    }
}
