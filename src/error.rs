//! 错误分类
//!
//! 每类错误都在最小的封闭单元内被吸收：配置错误在节点，数据错误在数据源，
//! 校验错误在字段，动作错误在单次动作调用。只有 [`EngineError`] 允许
//! 冒泡到页面级别。

use crate::expr::ExprError;
use thiserror::Error;

/// 配置错误：描述符格式错误或无法识别
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("malformed page document: {0}")]
    Parse(String),

    #[error("schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("duplicate widget id `{0}`")]
    DuplicateWidgetId(String),

    #[error("malformed widget `{widget}`: {reason}")]
    MalformedWidget { widget: String, reason: String },

    #[error("malformed datasource `{datasource}`: {reason}")]
    MalformedDatasource { datasource: String, reason: String },

    #[error("widget `{widget}` binds prop `{prop}` more than once")]
    AmbiguousBinding { widget: String, prop: String },

    #[error("widget `{widget}` references unknown datasource `{datasource}`")]
    UnknownDatasource { widget: String, datasource: String },

    #[error("invalid expression `{source_text}`: {error}")]
    Expression { source_text: String, error: ExprError },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// 数据错误：拉取或推送失败，以状态形式暴露给控件
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataError {
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("no async runtime available to run the request")]
    NoRuntime,

    #[error("request template error: {0}")]
    Template(String),

    #[error("datasource resolver closed")]
    Closed,

    #[error("invalid datasource descriptor: {0}")]
    InvalidDescriptor(String),
}

/// 控件渲染器返回的错误
#[derive(Debug, Clone, Error, PartialEq)]
#[error("renderer for `{widget_type}` failed: {message}")]
pub struct RenderError {
    pub widget_type: String,
    pub message: String,
}

impl RenderError {
    pub fn new(widget_type: &str, message: impl Into<String>) -> Self {
        Self {
            widget_type: widget_type.to_string(),
            message: message.into(),
        }
    }
}

/// 单个字段的校验失败
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{widget_id}: {message}")]
pub struct ValidationError {
    pub widget_id: String,
    pub message: String,
}

/// 动作错误：步骤失败、未知动作或被取消
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("malformed action `{action}`: {reason}")]
    MalformedAction { action: String, reason: String },

    #[error("unknown widget `{0}`")]
    UnknownWidget(String),

    #[error("unknown step kind `{0}`")]
    UnknownStepKind(String),

    #[error("no custom handler registered as `{0}`")]
    UnknownHandler(String),

    #[error("step `{step}` references missing onError step `{target}`")]
    MissingErrorStep { step: String, target: String },

    #[error("invalid step parameters: {0}")]
    InvalidParams(String),

    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("validation failed for {} field(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("custom step failed: {0}")]
    Custom(String),

    #[error("action cancelled")]
    Cancelled,
}

/// 引擎级故障：没有可渲染的页面，或页面文档整体无法加载
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("no page loaded")]
    NoPage,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
