//! 页面级本地状态
//!
//! 所有并发运行的动作共享同一份状态。同一路径的并发写入按到达顺序
//! 覆盖（last-write-wins），不做合并。

use crate::expr::{Path, Resolved};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// 状态变更通知
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Value { path: String },
    Validation { widget_id: String },
    Reset,
}

#[derive(Debug, Default)]
struct Inner {
    data: Value,
    validation: BTreeMap<String, Vec<String>>,
    version: u64,
}

/// 共享本地状态，克隆得到同一份存储的句柄
#[derive(Clone)]
pub struct LocalState {
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<StateChange>,
}

impl LocalState {
    pub fn new() -> Self {
        Self::with_initial(Value::Object(Map::new()))
    }

    pub fn with_initial(data: Value) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Default::default()
            })),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 状态只包含纯数据，持锁线程崩溃后数据仍然可用
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// 读取路径，不存在时返回 `Unset`
    pub fn get(&self, path: &Path) -> Resolved {
        let inner = self.lock();
        path.get(&inner.data).into()
    }

    pub fn get_str(&self, path: &str) -> Resolved {
        self.get(&Path::parse(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        let inner = self.lock();
        path.get(&inner.data).is_some()
    }

    /// 整体快照，供表达式作用域使用
    pub fn snapshot(&self) -> Value {
        self.lock().data.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// 写入路径，返回旧值
    pub fn set(&self, path: &Path, value: Value) -> Option<Value> {
        let previous = {
            let mut inner = self.lock();
            inner.version += 1;
            path.set(&mut inner.data, value)
        };
        tracing::debug!(path = %path, "state updated");
        let _ = self.changes.send(StateChange::Value { path: path.to_string() });
        previous
    }

    pub fn remove(&self, path: &Path) -> Option<Value> {
        let removed = {
            let mut inner = self.lock();
            inner.version += 1;
            path.remove(&mut inner.data)
        };
        let _ = self.changes.send(StateChange::Value { path: path.to_string() });
        removed
    }

    /// 记录控件的行内校验信息；空列表即清除
    pub fn set_validation(&self, widget_id: &str, messages: Vec<String>) {
        {
            let mut inner = self.lock();
            if messages.is_empty() {
                inner.validation.remove(widget_id);
            } else {
                inner.validation.insert(widget_id.to_string(), messages);
            }
        }
        let _ = self.changes.send(StateChange::Validation {
            widget_id: widget_id.to_string(),
        });
    }

    pub fn validation_errors(&self, widget_id: &str) -> Vec<String> {
        self.lock().validation.get(widget_id).cloned().unwrap_or_default()
    }

    /// 页面切换时清空
    pub fn reset(&self, data: Value) {
        {
            let mut inner = self.lock();
            inner.data = data;
            inner.validation.clear();
            inner.version += 1;
        }
        let _ = self.changes.send(StateChange::Reset);
    }
}

impl Default for LocalState {
    fn default() -> Self {
        Self::new()
    }
}
