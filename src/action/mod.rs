//! 动作引擎 - 按顺序执行动作步骤
//!
//! 步骤类型是封闭集合：`httpCall`、`navigate`、`setState`、`validate`、
//! `showNotification`、`openDialog`、`custom`、`delay`。`custom` 只能调用
//! 宿主预先注册的 [`CustomStepHandler`]。

mod engine;
mod steps;
mod validate;

pub use engine::ActionEngine;
pub use validate::validate_widgets;

use crate::config::RuntimeConfig;
use crate::datasource::DatasourceResolver;
use crate::error::ActionError;
use crate::model::PageConfig;
use crate::runtime::Services;
use crate::state::LocalState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 调用状态：`Idle → Running → {Succeeded, Failed, Cancelled}`
#[derive(Debug, Clone, PartialEq)]
pub enum ActionStatus {
    Idle,
    Running,
    Succeeded,
    Failed(ActionError),
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed(_) | ActionStatus::Cancelled
        )
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            ActionStatus::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// 一次调用的句柄
#[derive(Clone)]
pub struct ActionHandle {
    invocation_id: u64,
    action_id: String,
    status: watch::Receiver<ActionStatus>,
    token: CancellationToken,
}

impl ActionHandle {
    fn new(invocation_id: u64, action_id: &str, status: watch::Receiver<ActionStatus>, token: CancellationToken) -> Self {
        Self {
            invocation_id,
            action_id: action_id.to_string(),
            status,
            token,
        }
    }

    pub fn invocation_id(&self) -> u64 {
        self.invocation_id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn status(&self) -> ActionStatus {
        self.status.borrow().clone()
    }

    /// 取消后不再调度后续步骤，在途结果被丢弃
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 等待调用结束
    pub async fn finished(&self) -> ActionStatus {
        let mut status = self.status.clone();
        let finished = match status.wait_for(ActionStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => ActionStatus::Failed(ActionError::Custom("action worker stopped".to_string())),
        };
        finished
    }
}

/// 传给自定义步骤的请求
#[derive(Clone)]
pub struct CustomStep {
    pub action_id: String,
    /// 已完成模板替换的步骤参数
    pub params: Value,
    pub payload: Value,
    pub state: LocalState,
}

/// 宿主注册的自定义步骤
#[async_trait]
pub trait CustomStepHandler: Send + Sync {
    async fn run(&self, step: CustomStep) -> Result<Value, ActionError>;
}

/// 自定义步骤表，按名称查找
#[derive(Clone, Default)]
pub struct CustomHandlers {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn CustomStepHandler>>>>,
}

impl CustomHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn CustomStepHandler>) {
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
        if previous.is_some() {
            tracing::warn!(handler = name, "custom step handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomStepHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// 动作执行环境，每个页面一份
pub struct ActionEnv {
    pub page: Arc<PageConfig>,
    pub state: LocalState,
    pub resolver: DatasourceResolver,
    pub services: Services,
    pub config: Arc<RuntimeConfig>,
    pub custom: CustomHandlers,
}
