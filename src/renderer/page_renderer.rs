//! 页面渲染
//!
//! 一次渲染遍历整棵控件树：先判定可见性策略，隐藏的节点不解析绑定也不
//! 触发数据源；可见节点依次解析数据源、绑定，再交给注册表产出 UI。
//! 任何节点级错误都只替换该节点为占位，兄弟节点照常渲染。

use super::node::{EventHandler, RenderNode, RenderTree};
use crate::binding::{resolve_binding, BindingContext};
use crate::datasource::{request_params, DataStatus, DatasourceResolver, Resolution};
use crate::error::ConfigError;
use crate::expr::{eval_str, Resolved, Scope};
use crate::model::{Binding, BindingSource, PageConfig, WidgetDescriptor};
use crate::registry::{error_placeholder, PlaceholderKind, RenderProps, WidgetRegistry};
use crate::runtime::AuthContext;
use crate::state::LocalState;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// 页面渲染器，每次渲染新建一个
pub struct PageRenderer<'a> {
    page: &'a PageConfig,
    registry: &'a WidgetRegistry,
    resolver: &'a DatasourceResolver,
    state: &'a LocalState,
    auth: &'a dyn AuthContext,
    snapshot: Value,
    /// 本次渲染已解析的数据源
    resolutions: HashMap<String, Resolution>,
    data: Value,
    /// 页面里声明过的全部 id，派生 id 不得与之相同
    declared_ids: HashSet<String>,
    claimed_ids: HashSet<String>,
    duplicates: HashMap<String, usize>,
    anonymous: usize,
}

impl<'a> PageRenderer<'a> {
    pub fn new(
        page: &'a PageConfig,
        registry: &'a WidgetRegistry,
        resolver: &'a DatasourceResolver,
        state: &'a LocalState,
        auth: &'a dyn AuthContext,
    ) -> Self {
        let mut declared_ids = HashSet::new();
        page.visit_widgets(|widget| {
            if !widget.id.is_empty() {
                declared_ids.insert(widget.id.clone());
            }
        });
        Self {
            page,
            registry,
            resolver,
            state,
            auth,
            snapshot: state.snapshot(),
            resolutions: HashMap::new(),
            data: Value::Object(Map::new()),
            declared_ids,
            claimed_ids: HashSet::new(),
            duplicates: HashMap::new(),
            anonymous: 0,
        }
    }

    pub fn render(mut self) -> RenderTree {
        let page = self.page;
        let nodes = self.render_list(&page.widgets);
        tracing::debug!(page = %page.page_id, nodes = nodes.len(), "render pass complete");
        RenderTree {
            page_id: page.page_id.clone(),
            nodes,
        }
    }

    fn render_list(&mut self, widgets: &'a [WidgetDescriptor]) -> Vec<RenderNode> {
        widgets
            .iter()
            .filter_map(|widget| self.render_widget(widget))
            .collect()
    }

    fn render_widget(&mut self, widget: &'a WidgetDescriptor) -> Option<RenderNode> {
        let id = self.claim_id(widget);
        if id != widget.id && !widget.id.is_empty() {
            let error = ConfigError::DuplicateWidgetId(widget.id.clone());
            return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
        }

        if let Some(reason) = &widget.malformed {
            let error = ConfigError::MalformedWidget {
                widget: id.clone(),
                reason: reason.clone(),
            };
            return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
        }

        // 策略求值失败不隐藏，渲染配置错误占位
        if let Some(policy) = &widget.policy {
            match self.evaluate_policy(policy) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(widget = %id, "hidden by policy");
                    return None;
                }
                Err(error) => {
                    tracing::warn!(widget = %id, "policy failed: {}", error);
                    return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
                }
            }
        }

        let bindings = match compile_bindings(widget) {
            Ok(bindings) => bindings,
            Err(error) => {
                tracing::warn!(widget = %id, "bad bindings: {}", error);
                return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
            }
        };

        if let Err(error) = self.resolve_datasources(widget, &bindings) {
            tracing::warn!(widget = %id, "{}", error);
            return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
        }

        let primary = widget
            .datasource_id
            .as_ref()
            .and_then(|ds| self.resolutions.get(ds))
            .cloned();

        let children = self.render_list(&widget.children);

        if let Some(resolution) = &primary {
            if resolution.status == DataStatus::Error {
                let message = resolution
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "datasource failed".to_string());
                let mut node = self.placeholder(&id, widget, PlaceholderKind::DataError, &message);
                node.status = Some(DataStatus::Error);
                node.error = Some(message);
                node.children = children;
                return Some(node);
            }
        }

        let props = match self.build_props(&id, widget, &bindings, primary.as_ref()) {
            Ok(props) => props,
            Err(error) => {
                tracing::warn!(widget = %id, "binding failed: {}", error);
                return Some(self.placeholder(&id, widget, PlaceholderKind::ConfigError, &error.to_string()));
            }
        };

        let (ui, placeholder) = match self.registry.render(&widget.widget_type, &props) {
            Ok(ui) if self.registry.contains(&widget.widget_type) => (ui, None),
            Ok(ui) => {
                tracing::warn!(widget = %id, widget_type = %widget.widget_type, "unknown widget type");
                (ui, Some(PlaceholderKind::UnknownType))
            }
            Err(error) => (
                error_placeholder(PlaceholderKind::RenderError, &error.to_string()),
                Some(PlaceholderKind::RenderError),
            ),
        };

        Some(RenderNode {
            handlers: if placeholder.is_some() { Vec::new() } else { handlers_of(widget) },
            errors: self.state.validation_errors(&widget.id),
            id,
            widget_type: widget.widget_type.clone(),
            placeholder,
            ui,
            status: primary.as_ref().map(|r| r.status),
            error: None,
            props,
            children,
        })
    }

    /// 分配输出 id：重复的 id 得到 `<id>~<n>`，空 id 得到 `<type>@<n>`
    ///
    /// 派生 id 跳过页面中已声明或已分配的 id。
    fn claim_id(&mut self, widget: &WidgetDescriptor) -> String {
        if !widget.id.is_empty() && self.claimed_ids.insert(widget.id.clone()) {
            return widget.id.clone();
        }
        loop {
            let candidate = if widget.id.is_empty() {
                self.anonymous += 1;
                format!("{}@{}", widget.widget_type, self.anonymous)
            } else {
                let count = self.duplicates.entry(widget.id.clone()).or_insert(0);
                *count += 1;
                format!("{}~{}", widget.id, count)
            };
            if !self.declared_ids.contains(&candidate) && self.claimed_ids.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// 策略只看本地状态和权限，不触发数据源
    fn evaluate_policy(&self, policy: &str) -> Result<bool, ConfigError> {
        let scope = Scope::new().with("state", &self.snapshot).with_auth(self.auth);
        eval_str(policy, &scope)
            .map(|resolved| resolved.is_truthy())
            .map_err(|error| ConfigError::Expression {
                source_text: policy.to_string(),
                error,
            })
    }

    fn resolve_datasources(&mut self, widget: &WidgetDescriptor, bindings: &[Binding]) -> Result<(), ConfigError> {
        let mut ids: Vec<String> = widget.datasource_id.iter().cloned().collect();
        for binding in bindings {
            ids.extend(binding.datasources());
        }
        ids.dedup();

        for ds_id in ids {
            if self.resolutions.contains_key(&ds_id) {
                continue;
            }
            let Some(descriptor) = self.page.datasource(&ds_id) else {
                return Err(ConfigError::UnknownDatasource {
                    widget: widget.id.clone(),
                    datasource: ds_id,
                });
            };
            if let Some(reason) = descriptor.malformed() {
                return Err(ConfigError::MalformedDatasource {
                    datasource: ds_id,
                    reason: reason.to_string(),
                });
            }
            let scope = Scope::new().with("state", &self.snapshot).with_auth(self.auth);
            let resolution = match request_params(descriptor, &scope) {
                Ok(params) => self.resolver.resolve(descriptor, &params),
                Err(error) => Resolution::failed(error, None),
            };
            if let (Some(value), Value::Object(data)) = (&resolution.value, &mut self.data) {
                data.insert(ds_id.clone(), value.clone());
            }
            self.resolutions.insert(ds_id, resolution);
        }
        Ok(())
    }

    fn build_props(
        &self,
        id: &str,
        widget: &WidgetDescriptor,
        bindings: &[Binding],
        primary: Option<&Resolution>,
    ) -> Result<RenderProps, ConfigError> {
        let mut props = RenderProps::new(id, &widget.widget_type);
        for (name, value) in &widget.props {
            props.insert(name, Resolved::Value(value.clone()));
        }

        if let Some(value) = primary.and_then(|r| r.value.as_ref()) {
            props.insert("data", Resolved::Value(value.clone()));
        }

        let bound_value = bindings.iter().any(|b| b.prop == "value");
        if !bound_value && !widget.props.contains_key("value") {
            let local = self.state.get_str(widget.value_path());
            if !local.is_unset() {
                props.insert("value", local);
            }
        }

        let context = BindingContext::new(&self.snapshot, &self.data).with_auth(self.auth);
        for binding in bindings {
            let resolved = resolve_binding(binding, &context).map_err(|error| ConfigError::Expression {
                source_text: describe_source(&binding.source),
                error,
            })?;
            props.insert(&binding.prop, resolved);
        }
        Ok(props)
    }

    fn placeholder(&self, id: &str, widget: &WidgetDescriptor, kind: PlaceholderKind, message: &str) -> RenderNode {
        RenderNode {
            id: id.to_string(),
            widget_type: widget.widget_type.clone(),
            placeholder: Some(kind),
            ui: error_placeholder(kind, message),
            status: None,
            error: Some(message.to_string()),
            props: RenderProps::new(id, &widget.widget_type),
            errors: Vec::new(),
            handlers: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// 同一属性被绑定多次时整体拒绝
fn compile_bindings(widget: &WidgetDescriptor) -> Result<Vec<Binding>, ConfigError> {
    if let Some(prop) = widget.bindings.duplicate_prop() {
        return Err(ConfigError::AmbiguousBinding {
            widget: widget.id.clone(),
            prop: prop.to_string(),
        });
    }
    widget.bindings.compile()
}

fn handlers_of(widget: &WidgetDescriptor) -> Vec<EventHandler> {
    widget
        .events
        .iter()
        .map(|(event, binding)| EventHandler {
            event: event.clone(),
            action_id: binding.action_id().to_string(),
            payload: binding.payload_template(),
        })
        .collect()
}

fn describe_source(source: &BindingSource) -> String {
    match source {
        BindingSource::Datasource { id, path, .. } => format!("data.{id}.{path}"),
        BindingSource::State(path) => format!("state.{path}"),
        BindingSource::Literal(value) => value.to_string(),
        BindingSource::Expression(expr) => format!("{expr:?}"),
    }
}
