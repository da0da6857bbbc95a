//! 单个步骤的执行
//!
//! 每个挂起点（请求、自定义步骤、延时）都同时等待取消令牌；
//! 令牌已取消时不再提交任何副作用。

use super::validate::validate_widgets;
use super::{ActionEnv, CustomStep};
use crate::datasource::{render_params, HttpRequest};
use crate::error::{ActionError, DataError};
use crate::expr::{eval_str, render_template, Path, Resolved, Scope};
use crate::model::{HttpSpec, Step, StepKind};
use crate::runtime::{AuthContext, NotifyKind};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 步骤求值上下文
pub(crate) struct StepScope<'a> {
    pub action_id: &'a str,
    pub payload: &'a Value,
    /// 已完成步骤的输出，按步骤 id
    pub steps: &'a Value,
    /// 仅在执行 `onError` 步骤时存在
    pub error: Option<&'a Value>,
}

impl<'a> StepScope<'a> {
    pub fn scope<'s>(&'s self, state: &'s Value, auth: &'s dyn AuthContext) -> Scope<'s> {
        let mut scope = Scope::new()
            .with("state", state)
            .with("payload", self.payload)
            .with("event", self.payload)
            .with("steps", self.steps)
            .with_auth(auth);
        if let Some(error) = self.error {
            scope.push("error", error);
        }
        scope
    }
}

/// 执行一个步骤，返回其输出
pub(crate) async fn run_step(
    env: &ActionEnv,
    step: &Step,
    step_scope: &StepScope<'_>,
    token: &CancellationToken,
) -> Result<Value, ActionError> {
    if token.is_cancelled() {
        return Err(ActionError::Cancelled);
    }

    let snapshot = env.state.snapshot();
    let scope = step_scope.scope(&snapshot, env.services.auth.as_ref());

    match &step.kind {
        StepKind::HttpCall => http_call(env, step, &scope, token).await,
        StepKind::Navigate => {
            let params = render_template(&step.params, &scope)?;
            let target = params
                .get("target")
                .or_else(|| params.get("page"))
                .and_then(Value::as_str)
                .ok_or_else(|| ActionError::InvalidParams("navigate requires `target`".to_string()))?;
            let nav_params = params.get("params").cloned().unwrap_or(Value::Null);
            env.services.navigator.navigate(target, &nav_params);
            Ok(Value::Null)
        }
        StepKind::SetState => {
            let path = step
                .param_str("path")
                .ok_or_else(|| ActionError::InvalidParams("setState requires `path`".to_string()))?;
            let path = Path::parse(path);
            let value = match step.param_str("expr") {
                Some(expr) => eval_str(expr, &scope)?,
                None => match step.param("value") {
                    Some(template) => Resolved::Value(render_template(template, &scope)?),
                    None => Resolved::Unset,
                },
            };
            match value {
                Resolved::Value(value) => {
                    env.state.set(&path, value.clone());
                    Ok(value)
                }
                Resolved::Unset => {
                    env.state.remove(&path);
                    Ok(Value::Null)
                }
            }
        }
        StepKind::Validate => {
            let widgets: Vec<String> = match step.param("widgets") {
                Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                Some(Value::String(id)) => vec![id.clone()],
                _ => Vec::new(),
            };
            let errors = validate_widgets(&env.page, &env.state, &widgets);
            if errors.is_empty() {
                Ok(Value::Bool(true))
            } else {
                Err(ActionError::Validation(errors))
            }
        }
        StepKind::ShowNotification => {
            let params = render_template(&step.params, &scope)?;
            let kind = NotifyKind::parse(params.get("kind").and_then(Value::as_str).unwrap_or("info"));
            let message = params
                .get("message")
                .map(crate::expr::json_to_string)
                .unwrap_or_default();
            env.services.notifier.notify(kind, &message);
            Ok(Value::Null)
        }
        StepKind::OpenDialog => {
            let params = render_template(&step.params, &scope)?;
            let dialog_id = params
                .get("dialog")
                .or_else(|| params.get("dialogId"))
                .and_then(Value::as_str)
                .ok_or_else(|| ActionError::InvalidParams("openDialog requires `dialog`".to_string()))?;
            let dialog_params = params.get("params").cloned().unwrap_or(Value::Null);
            env.services.navigator.open_dialog(dialog_id, &dialog_params);
            Ok(Value::Null)
        }
        StepKind::Custom => {
            let name = step
                .param_str("handler")
                .ok_or_else(|| ActionError::InvalidParams("custom requires `handler`".to_string()))?;
            let handler = env
                .custom
                .get(name)
                .ok_or_else(|| ActionError::UnknownHandler(name.to_string()))?;
            let request = CustomStep {
                action_id: step_scope.action_id.to_string(),
                params: render_template(&step.params, &scope)?,
                payload: step_scope.payload.clone(),
                state: env.state.clone(),
            };
            tokio::select! {
                _ = token.cancelled() => Err(ActionError::Cancelled),
                result = handler.run(request) => result,
            }
        }
        StepKind::Delay => {
            let ms = step.param("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::select! {
                _ = token.cancelled() => Err(ActionError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(Value::Null),
            }
        }
        StepKind::Unknown(kind) => Err(ActionError::UnknownStepKind(kind.clone())),
    }
}

/// `httpCall`：发请求，可选写入 `resultPath` 并刷新数据源
async fn http_call(
    env: &ActionEnv,
    step: &Step,
    scope: &Scope<'_>,
    token: &CancellationToken,
) -> Result<Value, ActionError> {
    let spec: HttpSpec = serde_json::from_value(step.params.clone())
        .map_err(|e| ActionError::InvalidParams(format!("httpCall: {e}")))?;
    let query = render_params(&spec, scope)?;
    let request = HttpRequest::from_spec(&spec, &query, scope, &env.config)?;
    let timeout = env.config.request_timeout();

    tracing::debug!(method = %request.method, url = %request.url, "httpCall");
    let response = tokio::select! {
        _ = token.cancelled() => return Err(ActionError::Cancelled),
        result = tokio::time::timeout(timeout, env.services.http.send(request)) => match result {
            Ok(result) => result?,
            Err(_) => return Err(DataError::Timeout(timeout.as_millis() as u64).into()),
        },
    };

    // 请求返回时动作可能已被取消
    if token.is_cancelled() {
        return Err(ActionError::Cancelled);
    }

    if let Some(path) = step.param_str("resultPath") {
        env.state.set(&Path::parse(path), response.clone());
    }
    if let Some(Value::Array(ids)) = step.param("refresh") {
        for id in ids.iter().filter_map(Value::as_str) {
            env.resolver.refresh(id);
        }
    }
    Ok(response)
}
