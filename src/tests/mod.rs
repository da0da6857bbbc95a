//! 单元测试模块
//! 覆盖表达式、绑定、数据源、注册表、渲染与动作执行

mod support;

pub mod datasource_tests;
pub mod registry_tests;
pub mod renderer_tests;
