//! 控件注册表
//!
//! 控件类型名到渲染器的映射。注册表由宿主显式构造后注入运行时，
//! 没有全局实例。查找未知类型时返回占位渲染器，不会失败。

mod components;
mod placeholder;

pub use components::{
    ButtonComponent, ContainerComponent, InputComponent, KpiComponent, ListComponent, TextComponent,
};
pub use placeholder::{error_placeholder, FallbackRenderer, PlaceholderKind};

use crate::error::RenderError;
use crate::expr::Resolved;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// 渲染器产出的 UI 片段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiNode {
    pub element: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl UiNode {
    pub fn new(element: &str) -> Self {
        Self {
            element: element.to_string(),
            attrs: Map::new(),
            text: None,
        }
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// 传给渲染器的已解析属性
///
/// 绑定结果保留 `Unset`，渲染器可以区分“未设置”和 `null`。
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RenderProps {
    pub widget_id: String,
    pub widget_type: String,
    pub values: BTreeMap<String, Resolved>,
}

impl RenderProps {
    pub fn new(widget_id: &str, widget_type: &str) -> Self {
        Self {
            widget_id: widget_id.to_string(),
            widget_type: widget_type.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: Resolved) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> &Resolved {
        static UNSET: Resolved = Resolved::Unset;
        self.values.get(name).unwrap_or(&UNSET)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).value()
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.value(name).map(crate::expr::json_to_string)
    }

    /// `Unset` 落成 `null` 后的 JSON 对象
    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().into_value_or_null()))
            .collect()
    }
}

/// 渲染能力契约：属性进，UI 出
pub trait WidgetRenderer: Send + Sync {
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError>;
}

impl<F> WidgetRenderer for F
where
    F: Fn(&RenderProps) -> Result<UiNode, RenderError> + Send + Sync,
{
    fn render(&self, props: &RenderProps) -> Result<UiNode, RenderError> {
        self(props)
    }
}

/// 注册结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    /// 同一个渲染器重复注册，无变化
    Unchanged,
    Replaced,
}

/// 控件注册表，类型名不区分大小写（`KPI` 与 `kpi` 是同一类型）
pub struct WidgetRegistry {
    renderers: HashMap<String, Arc<dyn WidgetRenderer>>,
    fallback: Arc<dyn WidgetRenderer>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
            fallback: Arc::new(FallbackRenderer),
        }
    }

    /// 带内置组件的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("container", Arc::new(ContainerComponent));
        registry.register("view", Arc::new(ContainerComponent));
        registry.register("text", Arc::new(TextComponent));
        registry.register("button", Arc::new(ButtonComponent));
        registry.register("input", Arc::new(InputComponent));
        registry.register("kpi", Arc::new(KpiComponent));
        registry.register("list", Arc::new(ListComponent));
        registry
    }

    /// 幂等注册：同一个 `Arc` 再次注册无变化，不同渲染器覆盖并告警
    pub fn register(&mut self, widget_type: &str, renderer: Arc<dyn WidgetRenderer>) -> RegisterOutcome {
        let key = type_key(widget_type);
        match self.renderers.get(&key) {
            Some(existing) if same_renderer(existing, &renderer) => RegisterOutcome::Unchanged,
            Some(_) => {
                tracing::warn!(widget_type, "renderer replaced");
                self.renderers.insert(key, renderer);
                RegisterOutcome::Replaced
            }
            None => {
                self.renderers.insert(key, renderer);
                RegisterOutcome::Inserted
            }
        }
    }

    /// 查找渲染器，未注册时返回占位渲染器
    pub fn lookup(&self, widget_type: &str) -> Arc<dyn WidgetRenderer> {
        match self.renderers.get(&type_key(widget_type)) {
            Some(renderer) => Arc::clone(renderer),
            None => Arc::clone(&self.fallback),
        }
    }

    pub fn contains(&self, widget_type: &str) -> bool {
        self.renderers.contains_key(&type_key(widget_type))
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.renderers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// 调用渲染器，渲染器内部的 panic 被转换成错误
    pub fn render(&self, widget_type: &str, props: &RenderProps) -> Result<UiNode, RenderError> {
        let renderer = self.lookup(widget_type);
        match catch_unwind(AssertUnwindSafe(|| renderer.render(props))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "renderer panicked".to_string());
                tracing::warn!(widget_type, widget = %props.widget_id, "renderer panicked: {}", message);
                Err(RenderError::new(widget_type, message))
            }
        }
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn type_key(widget_type: &str) -> String {
    widget_type.to_ascii_lowercase()
}

fn same_renderer(a: &Arc<dyn WidgetRenderer>, b: &Arc<dyn WidgetRenderer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
