//! 页面运行时
//!
//! 持有当前页面、本地状态、数据源缓存和动作引擎。切换页面时取消旧页面
//! 的令牌，旧页面排队和执行中的动作随之取消；数据源缓存跨页面保留，
//! 只丢弃描述符变化的条目。

use super::Services;
use crate::action::{ActionEngine, ActionEnv, ActionHandle, CustomHandlers, CustomStepHandler};
use crate::config::RuntimeConfig;
use crate::datasource::{CacheKey, DatasourceResolver};
use crate::error::{ActionError, ConfigError, EngineError};
use crate::event::{EventMessage, UiEvent};
use crate::expr::{render_template, Path, Scope};
use crate::model::PageConfig;
use crate::registry::WidgetRegistry;
use crate::renderer::{PageRenderer, RenderTree};
use crate::state::LocalState;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct LoadedPage {
    config: Arc<PageConfig>,
    engine: ActionEngine,
    token: CancellationToken,
}

/// 页面运行时
pub struct PageRuntime {
    config: Arc<RuntimeConfig>,
    registry: WidgetRegistry,
    services: Services,
    resolver: DatasourceResolver,
    state: LocalState,
    custom: CustomHandlers,
    root_token: CancellationToken,
    page: Option<LoadedPage>,
}

impl PageRuntime {
    pub fn new(config: RuntimeConfig, registry: WidgetRegistry, services: Services) -> Self {
        let resolver = DatasourceResolver::new(
            Arc::clone(&services.http),
            Arc::clone(&services.stream),
            config.clone(),
        );
        Self {
            config: Arc::new(config),
            registry,
            services,
            resolver,
            state: LocalState::new(),
            custom: CustomHandlers::new(),
            root_token: CancellationToken::new(),
            page: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WidgetRegistry {
        &mut self.registry
    }

    pub fn register_custom(&self, name: &str, handler: Arc<dyn CustomStepHandler>) {
        self.custom.register(name, handler);
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn resolver(&self) -> &DatasourceResolver {
        &self.resolver
    }

    pub fn page(&self) -> Option<&PageConfig> {
        self.page.as_ref().map(|page| page.config.as_ref())
    }

    /// 数据源条目更新通知，宿主据此安排重新渲染
    pub fn subscribe_changes(&self) -> broadcast::Receiver<CacheKey> {
        self.resolver.subscribe()
    }

    /// 解析并加载页面 JSON
    pub fn load_page_json(&mut self, input: &str) -> Result<(), ConfigError> {
        let page = PageConfig::from_json_str(input, self.config.max_schema_version)?;
        self.load_page(page);
        Ok(())
    }

    /// 加载页面，替换当前页面
    pub fn load_page(&mut self, page: PageConfig) {
        self.navigate_away();

        self.resolver.retain_descriptors(&page.datasources);
        self.state.reset(Value::Object(Map::new()));

        let page = Arc::new(page);
        let token = self.root_token.child_token();
        let engine = ActionEngine::new(
            ActionEnv {
                page: Arc::clone(&page),
                state: self.state.clone(),
                resolver: self.resolver.clone(),
                services: self.services.clone(),
                config: Arc::clone(&self.config),
                custom: self.custom.clone(),
            },
            token.clone(),
        );
        tracing::info!(
            page = %page.page_id,
            widgets = page.widgets.len(),
            datasources = page.datasources.len(),
            actions = page.actions.len(),
            "page loaded"
        );
        self.page = Some(LoadedPage {
            config: page,
            engine,
            token,
        });
    }

    /// 离开当前页面：取消页面令牌下的所有动作
    pub fn navigate_away(&mut self) {
        if let Some(page) = self.page.take() {
            page.token.cancel();
            tracing::info!(page = %page.config.page_id, "page unloaded");
        }
    }

    fn loaded(&self) -> Result<&LoadedPage, EngineError> {
        self.page.as_ref().ok_or(EngineError::NoPage)
    }

    /// 渲染当前页面
    pub fn render(&self) -> Result<RenderTree, EngineError> {
        let page = self.loaded()?;
        let renderer = PageRenderer::new(
            &page.config,
            &self.registry,
            &self.resolver,
            &self.state,
            self.services.auth.as_ref(),
        );
        Ok(renderer.render())
    }

    /// 派发控件事件；控件没有绑定该事件时返回 `None`
    pub fn emit(&self, widget_id: &str, event: UiEvent) -> Result<Option<ActionHandle>, ActionError> {
        let page = self.loaded().map_err(|_| ActionError::UnknownWidget(widget_id.to_string()))?;
        let widget = page
            .config
            .find_widget(widget_id)
            .ok_or_else(|| ActionError::UnknownWidget(widget_id.to_string()))?;

        if let UiEvent::Change { value } = &event {
            self.state.set(&Path::parse(widget.value_path()), value.clone());
        }

        let Some(binding) = widget.events.get(event.name()) else {
            return Ok(None);
        };

        let data = event.data();
        let snapshot = self.state.snapshot();
        let scope = Scope::new()
            .with("state", &snapshot)
            .with("event", &data)
            .with_auth(self.services.auth.as_ref());
        let payload = match binding.payload_template() {
            Value::Null => data.clone(),
            template => render_template(&template, &scope)?,
        };

        let message = EventMessage {
            widget_id: widget_id.to_string(),
            event: event.name().to_string(),
            action_id: binding.action_id().to_string(),
            payload,
        };
        tracing::debug!(widget = %message.widget_id, event = %message.event, action = %message.action_id, "event");
        page.engine
            .dispatch(&message.action_id, message.payload)
            .map(Some)
    }

    /// 直接派发动作
    pub fn dispatch(&self, action_id: &str, payload: Value) -> Result<ActionHandle, ActionError> {
        let page = self.loaded().map_err(|_| ActionError::UnknownAction(action_id.to_string()))?;
        page.engine.dispatch(action_id, payload)
    }

    pub fn refresh(&self, datasource_id: &str) -> usize {
        self.resolver.refresh(datasource_id)
    }

    /// 等待在途的数据源请求完成
    pub async fn settle(&self) {
        self.resolver.settle().await;
    }
}

impl Drop for PageRuntime {
    fn drop(&mut self) {
        self.root_token.cancel();
        self.resolver.close();
    }
}
