//! 声明式表达式解释器
//!
//! 绑定、步骤守卫、可见性策略和请求模板共用一套固定语法。
//! 后端下发的字符串只会被解析成 [`Expr`] 语法树再求值，
//! 不存在任何把配置当作代码执行的路径。

mod eval;
mod lexer;
mod parser;
mod path;
mod template;

pub use eval::{evaluate, Scope};
pub use parser::{Access, BinaryOp, Expr, UnaryOp};
pub use path::{Path, Segment};
pub use template::{interpolate, render_template};

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// 表达式错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// 求值结果
///
/// `Unset` 表示路径不存在，与 `null`、空字符串是不同的状态。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Resolved {
    #[default]
    Unset,
    Value(Value),
}

impl Resolved {
    pub fn is_unset(&self) -> bool {
        matches!(self, Resolved::Unset)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::Unset => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::Unset => None,
        }
    }

    /// 跨越 JSON 边界时 `Unset` 只能落成 `null`
    pub fn into_value_or_null(self) -> Value {
        self.into_value().unwrap_or(Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Resolved::Unset => false,
            Resolved::Value(value) => is_truthy(value),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Resolved::Value(Value::Number(n)) => n.as_f64(),
            Resolved::Value(Value::String(s)) => s.trim().parse().ok(),
            Resolved::Value(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// 用于字符串拼接的文本形式
    pub fn to_display(&self) -> String {
        match self {
            Resolved::Unset => String::new(),
            Resolved::Value(value) => json_to_string(value),
        }
    }
}

impl From<Option<&Value>> for Resolved {
    fn from(value: Option<&Value>) -> Self {
        match value {
            Some(value) => Resolved::Value(value.clone()),
            None => Resolved::Unset,
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

/// 序列化时 `Unset` 输出为 `{"$unset": true}`，保持与 `null` 可区分
impl Serialize for Resolved {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Resolved::Value(value) => value.serialize(serializer),
            Resolved::Unset => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$unset", &true)?;
                map.end()
            }
        }
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

pub fn json_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// 解析并求值，便于一次性调用
pub fn eval_str(source: &str, scope: &Scope<'_>) -> Result<Resolved, ExprError> {
    evaluate(&Expr::parse(source)?, scope)
}
