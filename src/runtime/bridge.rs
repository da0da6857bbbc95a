//! 宿主桥接层 - 权限、导航、通知能力
//!
//! 核心只依赖这里的窄接口；具体的登录、路由和提示框由宿主实现。
//! [`QueueBridge`] 把导航与通知请求排进队列，供轮询式宿主取走。

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// 权限上下文，必须能同步求值
pub trait AuthContext: Send + Sync {
    fn has_role(&self, role: &str) -> bool;
    fn has_permission(&self, permission: &str) -> bool;
    /// 暴露给表达式的 `auth.*` 属性
    fn attributes(&self) -> Value {
        Value::Null
    }
}

/// 导航能力，调用即返回
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str, params: &Value);
    fn open_dialog(&self, dialog_id: &str, params: &Value);
}

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NotifyKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "success" => NotifyKind::Success,
            "warning" | "warn" => NotifyKind::Warning,
            "error" => NotifyKind::Error,
            _ => NotifyKind::Info,
        }
    }
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotifyKind::Info => "info",
            NotifyKind::Success => "success",
            NotifyKind::Warning => "warning",
            NotifyKind::Error => "error",
        };
        f.write_str(name)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotifyKind, message: &str);
}

/// 固定角色与权限集合
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    roles: BTreeSet<String>,
    permissions: BTreeSet<String>,
    attributes: Value,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未登录：无任何角色与权限
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_string());
        self
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }
}

impl AuthContext for StaticAuth {
    fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    fn attributes(&self) -> Value {
        let mut attrs = match &self.attributes {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        attrs.insert("roles".to_string(), Value::from(self.roles.iter().cloned().collect::<Vec<_>>()));
        attrs.insert(
            "permissions".to_string(),
            Value::from(self.permissions.iter().cloned().collect::<Vec<_>>()),
        );
        Value::Object(attrs)
    }
}

/// 桥接事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeEvent {
    Notify { kind: NotifyKind, message: String },
    NavigateTo { target: String, params: Value },
    OpenDialog { dialog_id: String, params: Value },
}

/// 基于队列的桥接实现
#[derive(Clone, Default)]
pub struct QueueBridge {
    event_queue: Arc<Mutex<Vec<BridgeEvent>>>,
}

impl QueueBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: BridgeEvent) {
        self.event_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// 取走所有待处理事件
    pub fn drain_events(&self) -> Vec<BridgeEvent> {
        std::mem::take(&mut *self.event_queue.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// 查看但不取走
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.event_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notifications(&self) -> Vec<(NotifyKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BridgeEvent::Notify { kind, message } => Some((kind, message)),
                _ => None,
            })
            .collect()
    }
}

impl Navigator for QueueBridge {
    fn navigate(&self, target: &str, params: &Value) {
        tracing::info!(target_page = target, "navigate");
        self.push(BridgeEvent::NavigateTo {
            target: target.to_string(),
            params: params.clone(),
        });
    }

    fn open_dialog(&self, dialog_id: &str, params: &Value) {
        self.push(BridgeEvent::OpenDialog {
            dialog_id: dialog_id.to_string(),
            params: params.clone(),
        });
    }
}

impl Notifier for QueueBridge {
    fn notify(&self, kind: NotifyKind, message: &str) {
        self.push(BridgeEvent::Notify {
            kind,
            message: message.to_string(),
        });
    }
}
