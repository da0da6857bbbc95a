//! 事件系统 - 控件交互转成带类型的消息

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 控件事件
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
    Tap,
    /// 表单值变化，运行时先写入控件的状态路径再派发
    Change { value: Value },
    Submit,
    Custom {
        name: String,
        #[serde(default)]
        data: Value,
    },
}

impl UiEvent {
    /// 事件名，与控件 `events` 的键对应
    pub fn name(&self) -> &str {
        match self {
            UiEvent::Tap => "tap",
            UiEvent::Change { .. } => "change",
            UiEvent::Submit => "submit",
            UiEvent::Custom { name, .. } => name,
        }
    }

    /// 负载模板中以 `event.*` 引用的数据
    pub fn data(&self) -> Value {
        match self {
            UiEvent::Tap | UiEvent::Submit => json!({}),
            UiEvent::Change { value } => json!({ "value": value }),
            UiEvent::Custom { data, .. } => data.clone(),
        }
    }
}

/// 派发给动作引擎的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub widget_id: String,
    pub event: String,
    pub action_id: String,
    pub payload: Value,
}
