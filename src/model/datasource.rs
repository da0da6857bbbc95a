//! 数据源描述符

use super::page::str_field;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 数据源描述符，`kind` 决定其余字段
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceDescriptor {
    pub id: String,
    #[serde(flatten)]
    pub kind: DatasourceKind,
    #[serde(default)]
    pub cache: CachePolicy,
    /// 后端在描述符语义变化时递增
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatasourceKind {
    Static {
        #[serde(default)]
        value: Value,
    },
    Http {
        http: HttpSpec,
    },
    Websocket {
        #[serde(default)]
        websocket: WebsocketSpec,
    },
    /// 无法解析的描述符，引用它的控件渲染配置错误占位
    #[serde(skip)]
    Malformed { reason: String },
}

/// HTTP 请求描述，`url`、`params`、`body` 中可含 `{{expr}}` 占位符
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketSpec {
    /// 缺省时使用数据源 id 作为频道
    #[serde(default)]
    pub channel: Option<String>,
}

/// 缓存策略
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// 只在显式刷新时失效
    #[serde(default)]
    pub manual: bool,
}

impl DatasourceDescriptor {
    /// 逐个解析数据源，未知 `kind` 或字段错误只影响引用它的控件
    pub fn from_value_lenient(value: &Value) -> Self {
        match DatasourceDescriptor::deserialize(value) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                let id = str_field(value, "id");
                tracing::warn!(datasource = %id, "malformed datasource descriptor: {}", error);
                DatasourceDescriptor {
                    id,
                    kind: DatasourceKind::Malformed {
                        reason: error.to_string(),
                    },
                    cache: CachePolicy::default(),
                    version: None,
                }
            }
        }
    }

    /// 描述符无法解析时的原因
    pub fn malformed(&self) -> Option<&str> {
        match &self.kind {
            DatasourceKind::Malformed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, DatasourceKind::Websocket { .. })
    }

    /// 推送频道名
    pub fn channel(&self) -> Option<&str> {
        match &self.kind {
            DatasourceKind::Websocket { websocket } => {
                Some(websocket.channel.as_deref().unwrap_or(&self.id))
            }
            _ => None,
        }
    }

    /// 描述符指纹，用于检测页面重新加载后描述符是否变化
    pub fn fingerprint(&self) -> String {
        match self.version {
            Some(version) => format!("{}@v{}", self.id, version),
            None => format!(
                "{}@{}",
                self.id,
                serde_json::to_string(&self.kind).unwrap_or_default()
            ),
        }
    }
}
