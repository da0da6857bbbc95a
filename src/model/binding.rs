//! 绑定描述
//!
//! 绑定在 JSON 中有两种写法：
//!
//! ```json
//! "bindings": { "value": "data.revenue.total" }
//! "bindings": [ { "prop": "value", "datasource": "revenue", "path": "total" } ]
//! ```
//!
//! 两种写法都保留重复项，同一属性被绑定两次属于配置歧义，由渲染器报告。

use crate::error::ConfigError;
use crate::expr::{Expr, Path};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// 绑定的数据来源
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSource {
    /// 数据源值；本地状态 `<id>.<path>`（或显式 `statePath`）存在时优先
    Datasource {
        id: String,
        path: Path,
        state_path: Path,
    },
    State(Path),
    Literal(Value),
    Expression(Expr),
}

/// 声明式转换，只允许这三种
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Transform {
    /// `pattern` 中的 `{value}` 替换为当前值
    Format {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        decimals: Option<u32>,
    },
    /// 对列表逐项取字段或求值（`item` 指向当前项）
    Map {
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        expr: Option<String>,
    },
    /// 保留谓词为真的列表项
    Filter { predicate: String },
}

/// 编译后的绑定
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub prop: String,
    pub source: BindingSource,
    pub transforms: Vec<Transform>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingObject {
    #[serde(default)]
    datasource: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    state_path: Option<String>,
    #[serde(default)]
    literal: Option<Value>,
    #[serde(default)]
    expr: Option<String>,
    #[serde(default)]
    transforms: Vec<Transform>,
}

impl Binding {
    /// 从原始 JSON 编译一条绑定
    pub fn compile(prop: &str, raw: &Value) -> Result<Binding, ConfigError> {
        match raw {
            Value::String(source) => Ok(Binding {
                prop: prop.to_string(),
                source: source_from_expression(source)?,
                transforms: Vec::new(),
            }),
            Value::Object(_) => {
                let object: BindingObject = serde_json::from_value(raw.clone())?;
                let source = match (object.datasource, object.literal, object.expr) {
                    (Some(id), _, _) => {
                        let path = Path::parse(object.path.as_deref().unwrap_or(""));
                        let state_path = match object.state_path.as_deref() {
                            Some(explicit) => Path::parse(explicit),
                            None => {
                                let mut segments = vec![crate::expr::Segment::Key(id.clone())];
                                segments.extend(path.segments().iter().cloned());
                                Path::from_segments(segments)
                            }
                        };
                        BindingSource::Datasource { id, path, state_path }
                    }
                    (None, Some(literal), _) => BindingSource::Literal(literal),
                    (None, None, Some(expr)) => source_from_expression(&expr)?,
                    (None, None, None) => match object.state_path.or(object.path) {
                        Some(path) => BindingSource::State(Path::parse(&path)),
                        None => {
                            return Err(ConfigError::Parse(format!(
                                "binding for `{prop}` names no source"
                            )))
                        }
                    },
                };
                Ok(Binding {
                    prop: prop.to_string(),
                    source,
                    transforms: object.transforms,
                })
            }
            other => Ok(Binding {
                prop: prop.to_string(),
                source: BindingSource::Literal(other.clone()),
                transforms: Vec::new(),
            }),
        }
    }

    /// 该绑定读取的数据源 id
    pub fn datasources(&self) -> Vec<String> {
        match &self.source {
            BindingSource::Datasource { id, .. } => vec![id.clone()],
            BindingSource::Expression(expr) => {
                let mut out = Vec::new();
                expr.referenced_datasources(&mut out);
                out
            }
            BindingSource::State(_) | BindingSource::Literal(_) => Vec::new(),
        }
    }
}

/// 纯路径表达式折叠成结构化来源，使本地状态覆盖规则同样适用
fn source_from_expression(source: &str) -> Result<BindingSource, ConfigError> {
    let expr = Expr::parse(source).map_err(|error| ConfigError::Expression {
        source_text: source.to_string(),
        error,
    })?;
    if let Some((root, path)) = expr.as_static_path() {
        match root {
            "data" | "ds" => {
                if let Some(id) = path.first_key() {
                    return Ok(BindingSource::Datasource {
                        id: id.to_string(),
                        path: path.tail(),
                        state_path: path.clone(),
                    });
                }
            }
            "state" => return Ok(BindingSource::State(path)),
            _ => {}
        }
    }
    Ok(BindingSource::Expression(expr))
}

/// 原始绑定表，按声明顺序保留全部条目（包括重复的属性名）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBindings {
    entries: Vec<(String, Value)>,
}

impl RawBindings {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// 第一个被重复绑定的属性名
    pub fn duplicate_prop(&self) -> Option<&str> {
        self.entries.iter().enumerate().find_map(|(i, (prop, _))| {
            self.entries[..i]
                .iter()
                .any(|(earlier, _)| earlier == prop)
                .then_some(prop.as_str())
        })
    }

    pub fn compile(&self) -> Result<Vec<Binding>, ConfigError> {
        self.entries
            .iter()
            .map(|(prop, raw)| Binding::compile(prop, raw))
            .collect()
    }
}

impl<'de> Deserialize<'de> for RawBindings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawBindingsVisitor;

        impl<'de> Visitor<'de> for RawBindingsVisitor {
            type Value = RawBindings;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of prop -> binding or a list of bindings with `prop`")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawBindings, A::Error> {
                let mut entries = Vec::new();
                while let Some((prop, value)) = map.next_entry::<String, Value>()? {
                    entries.push((prop, value));
                }
                Ok(RawBindings { entries })
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawBindings, A::Error> {
                let mut entries = Vec::new();
                while let Some(mut value) = seq.next_element::<Value>()? {
                    let prop = value
                        .as_object_mut()
                        .and_then(|object| object.remove("prop"))
                        .and_then(|prop| prop.as_str().map(str::to_string))
                        .ok_or_else(|| de::Error::missing_field("prop"))?;
                    entries.push((prop, value));
                }
                Ok(RawBindings { entries })
            }
        }

        deserializer.deserialize_any(RawBindingsVisitor)
    }
}

impl Serialize for RawBindings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (prop, value) in &self.entries {
            map.serialize_entry(prop, value)?;
        }
        map.end()
    }
}
