//! 配置模型 - 后端下发的页面、控件、数据源、绑定与动作描述

mod action;
mod binding;
mod datasource;
mod page;

pub use action::{ActionDescriptor, CompareOp, Step, StepKind, ValidationRule};
pub use binding::{Binding, BindingSource, RawBindings, Transform};
pub use datasource::{CachePolicy, DatasourceDescriptor, DatasourceKind, HttpSpec, WebsocketSpec};
pub use page::{EventBinding, PageConfig, WidgetDescriptor, CURRENT_SCHEMA_VERSION};
