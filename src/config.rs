//! 运行时配置

use crate::error::ConfigError;
use crate::model::CURRENT_SCHEMA_VERSION;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// runtime.json 配置结构
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default = "default_schema_version")]
    pub max_schema_version: u32,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// 相对 URL 的前缀
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 附加到每个请求的请求头
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// 描述符未声明 TTL 时使用；`None` 表示不过期
    #[serde(default)]
    pub default_ttl_ms: Option<u64>,
}

fn default_schema_version() -> u32 { CURRENT_SCHEMA_VERSION }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_backoff_ms() -> u64 { 500 }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_schema_version: default_schema_version(),
            http: HttpConfig::default(),
            websocket: WebsocketConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// 从文件加载
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{path}: {e}")))?;
        Self::from_json_str(&content)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.http.timeout_ms)
    }

    /// 把相对 URL 拼到 `baseUrl` 上
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.http.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
            None => url.to_string(),
        }
    }
}
