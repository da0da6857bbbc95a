//! 动作与步骤描述符

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 动作：有序步骤序列
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub id: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// 只能通过 `onError` 引用到的步骤
    #[serde(default)]
    pub handlers: Vec<Step>,
    /// 描述符无法解析时的原因，调用直接失败
    #[serde(skip)]
    pub malformed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: StepKind,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub on_error: Option<String>,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// 步骤类型；无法识别的类型保留原名，执行时按步骤失败处理
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    HttpCall,
    Navigate,
    SetState,
    Validate,
    ShowNotification,
    OpenDialog,
    Custom,
    Delay,
    Unknown(String),
}

impl From<String> for StepKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "httpCall" => StepKind::HttpCall,
            "navigate" => StepKind::Navigate,
            "setState" => StepKind::SetState,
            "validate" => StepKind::Validate,
            "showNotification" => StepKind::ShowNotification,
            "openDialog" => StepKind::OpenDialog,
            "custom" => StepKind::Custom,
            "delay" => StepKind::Delay,
            _ => StepKind::Unknown(kind),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::HttpCall => "httpCall",
            StepKind::Navigate => "navigate",
            StepKind::SetState => "setState",
            StepKind::Validate => "validate",
            StepKind::ShowNotification => "showNotification",
            StepKind::OpenDialog => "openDialog",
            StepKind::Custom => "custom",
            StepKind::Delay => "delay",
            StepKind::Unknown(name) => name,
        };
        f.write_str(name)
    }
}

impl Step {
    /// 步骤 id，未声明时按位置生成
    pub fn id_or(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("step{index}"))
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

impl ActionDescriptor {
    pub fn from_value_lenient(value: &Value) -> Self {
        match ActionDescriptor::deserialize(value) {
            Ok(action) => action,
            Err(error) => {
                let action = ActionDescriptor {
                    id: super::page::str_field(value, "id"),
                    malformed: Some(error.to_string()),
                    ..ActionDescriptor::default()
                };
                tracing::warn!(action = %action.id, "malformed action descriptor: {}", error);
                action
            }
        }
    }

    /// 按 id 查找 `onError` 目标：先找 handlers，再找主序列
    pub fn error_step(&self, id: &str) -> Option<&Step> {
        self.handlers
            .iter()
            .chain(self.steps.iter())
            .find(|step| step.id.as_deref() == Some(id))
    }
}

/// 控件级校验规则
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "rule", rename_all = "camelCase")]
pub enum ValidationRule {
    Required {
        #[serde(default)]
        message: Option<String>,
    },
    Pattern {
        pattern: String,
        #[serde(default)]
        message: Option<String>,
    },
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
        #[serde(default)]
        message: Option<String>,
    },
    /// 跨字段比较，`other` 为另一个控件 id
    Compare {
        op: CompareOp,
        other: String,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}
