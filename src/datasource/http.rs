//! HTTP 传输
//!
//! 核心只通过 [`HttpTransport`] 发请求；默认实现基于 ureq，
//! 在阻塞线程池里执行以免占住异步运行时。

use crate::config::RuntimeConfig;
use crate::error::DataError;
use crate::expr::{render_template, Scope};
use crate::model::HttpSpec;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// 已完成模板替换的请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// 按描述渲染请求，`params` 作为查询参数，并可在模板里以 `params.*` 引用
    pub fn from_spec(
        spec: &HttpSpec,
        params: &Map<String, Value>,
        scope: &Scope<'_>,
        config: &RuntimeConfig,
    ) -> Result<Self, DataError> {
        let params_value = Value::Object(params.clone());
        let mut scope = scope.clone();
        scope.push("params", &params_value);

        let url = render_template(&Value::String(spec.url.clone()), &scope)
            .map_err(|e| DataError::Template(e.to_string()))?;
        let url = crate::expr::json_to_string(&url);

        let body = match &spec.body {
            Some(template) => Some(
                render_template(template, &scope).map_err(|e| DataError::Template(e.to_string()))?,
            ),
            None => None,
        };

        let mut headers = config.http.headers.clone();
        for (name, value) in &spec.headers {
            let rendered = render_template(&Value::String(value.clone()), &scope)
                .map_err(|e| DataError::Template(e.to_string()))?;
            headers.insert(name.clone(), crate::expr::json_to_string(&rendered));
        }

        let query = params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), crate::expr::json_to_string(value)))
            .collect();

        Ok(Self {
            method: spec.method.to_ascii_uppercase(),
            url: config.resolve_url(&url),
            headers,
            query,
            body,
        })
    }
}

/// 按描述渲染 `params` 模板，结果同时作为缓存键的一部分
pub fn render_params(spec: &HttpSpec, scope: &Scope<'_>) -> Result<Map<String, Value>, DataError> {
    let mut out = Map::new();
    for (name, template) in &spec.params {
        let value =
            render_template(template, scope).map_err(|e| DataError::Template(e.to_string()))?;
        out.insert(name.clone(), value);
    }
    Ok(out)
}

/// HTTP 传输接口，返回解码后的 JSON 响应体
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<Value, DataError>;
}

/// 基于 ureq 的默认实现
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.request_timeout())
    }
}

#[async_trait]
impl HttpTransport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, DataError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || send_blocking(&agent, request))
            .await
            .map_err(|e| DataError::Transport(e.to_string()))?
    }
}

fn send_blocking(agent: &ureq::Agent, request: HttpRequest) -> Result<Value, DataError> {
    tracing::debug!(method = %request.method, url = %request.url, "http request");

    let mut call = agent.request(&request.method, &request.url);
    for (name, value) in &request.headers {
        call = call.set(name, value);
    }
    for (name, value) in &request.query {
        call = call.query(name, value);
    }

    let result = match request.body {
        Some(body) => call.send_json(body),
        None => call.call(),
    };

    match result {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|e| DataError::Decode(e.to_string()))?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|e| DataError::Decode(e.to_string()))
        }
        Err(ureq::Error::Status(status, response)) => Err(DataError::Http {
            status,
            message: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(DataError::Transport(transport.to_string())),
    }
}
