//! Mini SDUI - 配置驱动的界面运行时
//! 后端下发页面 JSON，运行时负责数据源、绑定、渲染与动作执行

// 表达式解释器
pub mod expr;

// 配置模型
pub mod model;

pub mod config;
pub mod error;
pub mod state;

// 事件系统
pub mod event;

// 数据源与缓存
pub mod datasource;

// 绑定解析
pub mod binding;

// 控件注册表
pub mod registry;

// 页面渲染器
pub mod renderer;

// 动作引擎
pub mod action;

// 应用运行时
pub mod runtime;

pub use action::{ActionEngine, ActionHandle, ActionStatus, CustomStep, CustomStepHandler};
pub use config::RuntimeConfig;
pub use datasource::{DataStatus, DatasourceResolver, Resolution};
pub use error::{ActionError, ConfigError, DataError, EngineError, RenderError, ValidationError};
pub use event::UiEvent;
pub use expr::Resolved;
pub use model::PageConfig;
pub use registry::{RegisterOutcome, RenderProps, UiNode, WidgetRegistry, WidgetRenderer};
pub use renderer::{RenderNode, RenderTree};
pub use runtime::{PageRuntime, QueueBridge, Services, StaticAuth};
pub use state::LocalState;

// 单元测试
#[cfg(test)]
mod tests;
