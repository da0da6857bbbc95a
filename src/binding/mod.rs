//! 绑定解析 - 把控件属性绑定到本地状态、数据源值或表达式
//!
//! 数据源绑定的优先级：本地状态中存在 `<数据源id>.<路径>`（或显式的
//! `statePath`）时使用本地值，否则使用数据源值。用户编辑因此不会被
//! 后台刷新覆盖。

mod transform;

pub use transform::apply_transforms;

use crate::expr::{evaluate, ExprError, Resolved, Scope};
use crate::model::{Binding, BindingSource};
use crate::runtime::AuthContext;
use serde_json::Value;

/// 绑定求值所需的只读上下文
pub struct BindingContext<'a> {
    /// 本地状态快照
    pub state: &'a Value,
    /// 数据源 id 到当前值的对象；加载中且无旧值的数据源不在其中
    pub data: &'a Value,
    pub auth: Option<&'a dyn AuthContext>,
}

impl<'a> BindingContext<'a> {
    pub fn new(state: &'a Value, data: &'a Value) -> Self {
        Self {
            state,
            data,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: &'a dyn AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    /// 表达式作用域：`state`、`data`（别名 `ds`）以及 `auth`
    pub fn scope(&self) -> Scope<'a> {
        let scope = Scope::new()
            .with("state", self.state)
            .with("data", self.data)
            .with("ds", self.data);
        match self.auth {
            Some(auth) => scope.with_auth(auth),
            None => scope,
        }
    }
}

/// 解析单条绑定，路径不存在时得到 `Unset`
pub fn resolve_binding(binding: &Binding, context: &BindingContext<'_>) -> Result<Resolved, ExprError> {
    let scope = context.scope();
    let source = match &binding.source {
        BindingSource::Datasource {
            id,
            path,
            state_path,
        } => match state_path.get(context.state) {
            Some(local) => Resolved::Value(local.clone()),
            None => context
                .data
                .get(id.as_str())
                .and_then(|value| path.get(value))
                .into(),
        },
        BindingSource::State(path) => path.get(context.state).into(),
        BindingSource::Literal(value) => Resolved::Value(value.clone()),
        BindingSource::Expression(expr) => evaluate(expr, &scope)?,
    };
    apply_transforms(source, &binding.transforms, &scope)
}
