//! 页面与控件描述符

use super::{ActionDescriptor, DatasourceDescriptor, RawBindings, ValidationRule};
use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

/// 页面配置，一次渲染期间不可变
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub page_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, deserialize_with = "lenient_widgets")]
    pub widgets: Vec<WidgetDescriptor>,
    #[serde(default, deserialize_with = "lenient_datasources")]
    pub datasources: Vec<DatasourceDescriptor>,
    #[serde(default, deserialize_with = "lenient_actions")]
    pub actions: Vec<ActionDescriptor>,
}

/// 控件描述符
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub widget_type: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "RawBindings::is_empty")]
    pub bindings: RawBindings,
    #[serde(default)]
    pub events: BTreeMap<String, EventBinding>,
    /// 可见性策略表达式，求值为假时整个子树不渲染
    #[serde(default)]
    pub policy: Option<String>,
    /// 主数据源
    #[serde(default)]
    pub datasource_id: Option<String>,
    /// 表单值所在的本地状态路径，缺省为控件 id
    #[serde(default)]
    pub state_path: Option<String>,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    #[serde(default, deserialize_with = "lenient_widgets")]
    pub children: Vec<WidgetDescriptor>,
    /// 描述符无法解析时的原因，渲染为配置错误占位
    #[serde(skip)]
    pub malformed: Option<String>,
}

/// 事件到动作的映射
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EventBinding {
    Action(String),
    Detailed {
        action: String,
        #[serde(default)]
        payload: Value,
    },
}

impl EventBinding {
    pub fn action_id(&self) -> &str {
        match self {
            EventBinding::Action(id) => id,
            EventBinding::Detailed { action, .. } => action,
        }
    }

    pub fn payload_template(&self) -> Value {
        match self {
            EventBinding::Action(_) => Value::Null,
            EventBinding::Detailed { payload, .. } => payload.clone(),
        }
    }
}

impl WidgetDescriptor {
    /// 逐个解析控件，失败的控件保留 id 和类型，其余字段置空
    pub fn from_value_lenient(value: &Value) -> Self {
        match WidgetDescriptor::deserialize(value) {
            Ok(widget) => widget,
            Err(error) => {
                let widget = WidgetDescriptor {
                    id: str_field(value, "id"),
                    widget_type: str_field(value, "type"),
                    malformed: Some(error.to_string()),
                    ..WidgetDescriptor::default()
                };
                tracing::warn!(widget = %widget.id, "malformed widget descriptor: {}", error);
                widget
            }
        }
    }

    /// 表单值路径
    pub fn value_path(&self) -> &str {
        self.state_path.as_deref().unwrap_or(&self.id)
    }
}

impl PageConfig {
    /// 解析页面 JSON，拒绝高于 `max_schema_version` 的文档
    pub fn from_json_str(input: &str, max_schema_version: u32) -> Result<Self, ConfigError> {
        let page: PageConfig = serde_json::from_str(input)?;
        page.check_schema(max_schema_version)?;
        Ok(page)
    }

    pub fn from_value(value: Value, max_schema_version: u32) -> Result<Self, ConfigError> {
        let page: PageConfig = serde_json::from_value(value)?;
        page.check_schema(max_schema_version)?;
        Ok(page)
    }

    fn check_schema(&self, max_schema_version: u32) -> Result<(), ConfigError> {
        if self.schema_version > max_schema_version {
            return Err(ConfigError::UnsupportedSchema {
                found: self.schema_version,
                supported: max_schema_version,
            });
        }
        Ok(())
    }

    pub fn datasource(&self, id: &str) -> Option<&DatasourceDescriptor> {
        self.datasources.iter().find(|ds| ds.id == id)
    }

    pub fn action(&self, id: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|action| action.id == id)
    }

    /// 深度优先查找控件
    pub fn find_widget(&self, id: &str) -> Option<&WidgetDescriptor> {
        fn find<'a>(widgets: &'a [WidgetDescriptor], id: &str) -> Option<&'a WidgetDescriptor> {
            for widget in widgets {
                if widget.id == id {
                    return Some(widget);
                }
                if let Some(found) = find(&widget.children, id) {
                    return Some(found);
                }
            }
            None
        }
        find(&self.widgets, id)
    }

    /// 深度优先遍历全部控件
    pub fn visit_widgets<'a>(&'a self, mut f: impl FnMut(&'a WidgetDescriptor)) {
        fn walk<'a>(widgets: &'a [WidgetDescriptor], f: &mut impl FnMut(&'a WidgetDescriptor)) {
            for widget in widgets {
                f(widget);
                walk(&widget.children, f);
            }
        }
        walk(&self.widgets, &mut f);
    }
}

/// 描述符里的字符串字段，缺失或类型不对时为空
pub(crate) fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn lenient_widgets<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<WidgetDescriptor>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw.iter().map(WidgetDescriptor::from_value_lenient).collect())
}

fn lenient_datasources<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DatasourceDescriptor>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw.iter().map(DatasourceDescriptor::from_value_lenient).collect())
}

fn lenient_actions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ActionDescriptor>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw.iter().map(ActionDescriptor::from_value_lenient).collect())
}
