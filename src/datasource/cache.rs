//! 缓存条目与解析结果

use crate::error::DataError;
use crate::model::DatasourceDescriptor;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// 数据状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    Loading,
    Success,
    Error,
}

/// 一次 `resolve` 的结果：值加显式状态
///
/// 出错或重新加载时 `value` 保留上一次成功的值。
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: DataStatus,
    pub value: Option<Value>,
    pub error: Option<DataError>,
}

impl Resolution {
    pub fn loading(previous: Option<Value>) -> Self {
        Self {
            status: DataStatus::Loading,
            value: previous,
            error: None,
        }
    }

    pub fn success(value: Value) -> Self {
        Self {
            status: DataStatus::Success,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(error: DataError, previous: Option<Value>) -> Self {
        Self {
            status: DataStatus::Error,
            value: previous,
            error: Some(error),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != DataStatus::Loading
    }

    /// 出错但仍持有旧值
    pub fn is_stale(&self) -> bool {
        self.status != DataStatus::Success && self.value.is_some()
    }
}

/// 缓存键：数据源 id + 参数的规范化序列化
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    datasource_id: String,
    params: String,
}

impl CacheKey {
    /// `serde_json::Map` 按键排序，序列化结果即规范形式
    pub fn new(datasource_id: &str, params: &Map<String, Value>) -> Self {
        Self {
            datasource_id: datasource_id.to_string(),
            params: serde_json::to_string(params).unwrap_or_default(),
        }
    }

    pub fn datasource_id(&self) -> &str {
        &self.datasource_id
    }

    /// 规范化后的参数 JSON
    pub fn params(&self) -> &str {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.datasource_id, self.params)
    }
}

/// 解析器持有的缓存条目
pub(crate) struct CacheEntry {
    pub descriptor: DatasourceDescriptor,
    pub params: Map<String, Value>,
    pub fingerprint: String,
    /// 每次发起新请求递增，迟到的旧结果据此丢弃
    pub generation: u64,
    pub in_flight: bool,
    pub fetched_at: Option<Instant>,
    pub ttl: Option<Duration>,
    pub state: watch::Sender<Resolution>,
}

impl CacheEntry {
    pub fn new(
        descriptor: &DatasourceDescriptor,
        params: &Map<String, Value>,
        default_ttl: Option<Duration>,
        initial: Resolution,
    ) -> Self {
        let ttl = if descriptor.cache.manual {
            None
        } else {
            descriptor.cache.ttl_ms.map(Duration::from_millis).or(default_ttl)
        };
        let (state, _) = watch::channel(initial);
        Self {
            descriptor: descriptor.clone(),
            params: params.clone(),
            fingerprint: descriptor.fingerprint(),
            generation: 0,
            in_flight: false,
            fetched_at: None,
            ttl,
            state,
        }
    }

    pub fn current(&self) -> Resolution {
        self.state.borrow().clone()
    }

    pub fn last_value(&self) -> Option<Value> {
        self.state.borrow().value.clone()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match (self.fetched_at, self.ttl) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(ttl)) => now.duration_since(at) >= ttl,
        }
    }

    pub fn publish(&self, resolution: Resolution) {
        self.state.send_replace(resolution);
    }
}
