//! 动作引擎
//!
//! 事件转成 [`Invocation`] 消息，进入按动作 id 划分的队列：
//! 同一动作的调用按到达顺序逐个执行，不同动作并发执行。

use super::steps::{run_step, StepScope};
use super::{ActionEnv, ActionHandle, ActionStatus};
use crate::error::{ActionError, DataError};
use crate::expr::eval_str;
use crate::model::{ActionDescriptor, Step};
use crate::runtime::NotifyKind;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// 一次动作调用
struct Invocation {
    invocation_id: u64,
    descriptor: ActionDescriptor,
    payload: Value,
    status: watch::Sender<ActionStatus>,
    token: CancellationToken,
}

/// 动作引擎，克隆得到同一引擎的句柄
#[derive(Clone)]
pub struct ActionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    env: Arc<ActionEnv>,
    /// 页面令牌，所有调用的令牌都是它的子令牌
    token: CancellationToken,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Invocation>>>,
    next_id: AtomicU64,
}

impl ActionEngine {
    pub fn new(env: ActionEnv, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                env: Arc::new(env),
                token,
                queues: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 把一次调用排进该动作的队列，立即返回句柄
    pub fn dispatch(&self, action_id: &str, payload: Value) -> Result<ActionHandle, ActionError> {
        let Some(descriptor) = self.inner.env.page.action(action_id).cloned() else {
            tracing::warn!(action = action_id, "dispatch of unknown action");
            return Err(ActionError::UnknownAction(action_id.to_string()));
        };
        if let Some(reason) = &descriptor.malformed {
            tracing::warn!(action = action_id, "dispatch of malformed action");
            return Err(ActionError::MalformedAction {
                action: action_id.to_string(),
                reason: reason.clone(),
            });
        }
        let runtime = Handle::try_current().map_err(|_| ActionError::Data(DataError::NoRuntime))?;

        let invocation_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.token.child_token();
        let (status, receiver) = watch::channel(ActionStatus::Idle);
        let mut invocation = Invocation {
            invocation_id,
            descriptor,
            payload,
            status,
            token: token.clone(),
        };

        let mut queues = self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let sender = match queues.get(action_id) {
                Some(sender) if !sender.is_closed() => sender.clone(),
                _ => {
                    let (sender, queue) = mpsc::unbounded_channel();
                    runtime.spawn(worker(Arc::clone(&self.inner.env), action_id.to_string(), queue));
                    queues.insert(action_id.to_string(), sender.clone());
                    sender
                }
            };
            match sender.send(invocation) {
                Ok(()) => break,
                // 工作任务刚好退出，换一个新队列重试
                Err(mpsc::error::SendError(returned)) => {
                    queues.remove(action_id);
                    invocation = returned;
                }
            }
        }
        drop(queues);

        tracing::debug!(action = action_id, invocation = invocation_id, "action queued");
        Ok(ActionHandle::new(invocation_id, action_id, receiver, token))
    }

    /// 排队并等待结束
    pub async fn run(&self, action_id: &str, payload: Value) -> Result<ActionStatus, ActionError> {
        Ok(self.dispatch(action_id, payload)?.finished().await)
    }

    /// 取消页面令牌：排队中和执行中的调用全部取消
    pub fn cancel_all(&self) {
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

async fn worker(env: Arc<ActionEnv>, action_id: String, mut queue: mpsc::UnboundedReceiver<Invocation>) {
    while let Some(invocation) = queue.recv().await {
        if invocation.token.is_cancelled() {
            invocation.status.send_replace(ActionStatus::Cancelled);
            continue;
        }
        invocation.status.send_replace(ActionStatus::Running);
        tracing::info!(action = %action_id, invocation = invocation.invocation_id, "action started");

        let status = run_action(&env, &invocation.descriptor, &invocation.payload, &invocation.token).await;

        match &status {
            ActionStatus::Failed(error) => {
                tracing::warn!(action = %action_id, invocation = invocation.invocation_id, "action failed: {}", error)
            }
            other => {
                tracing::info!(action = %action_id, invocation = invocation.invocation_id, status = ?other, "action finished")
            }
        }
        invocation.status.send_replace(status);
    }
    tracing::debug!(action = %action_id, "action queue closed");
}

/// 按顺序执行步骤
async fn run_action(
    env: &ActionEnv,
    descriptor: &ActionDescriptor,
    payload: &Value,
    token: &CancellationToken,
) -> ActionStatus {
    let mut outputs = Value::Object(Map::new());

    for (index, step) in descriptor.steps.iter().enumerate() {
        if token.is_cancelled() {
            return ActionStatus::Cancelled;
        }
        let step_id = step.id_or(index);
        let step_scope = StepScope {
            action_id: &descriptor.id,
            payload,
            steps: &outputs,
            error: None,
        };

        if let Some(guard) = &step.guard {
            let snapshot = env.state.snapshot();
            let scope = step_scope.scope(&snapshot, env.services.auth.as_ref());
            match eval_str(guard, &scope) {
                Ok(resolved) if !resolved.is_truthy() => {
                    tracing::debug!(action = %descriptor.id, step = %step_id, "guard false, step skipped");
                    continue;
                }
                Ok(_) => {}
                Err(error) => {
                    let error = ActionError::Expression(error);
                    return handle_failure(env, descriptor, step, &step_id, error, payload, &outputs, token).await;
                }
            }
        }

        tracing::debug!(action = %descriptor.id, step = %step_id, kind = %step.kind, "step started");
        match run_step(env, step, &step_scope, token).await {
            Ok(output) => {
                if let Value::Object(outputs) = &mut outputs {
                    outputs.insert(step_id, output);
                }
            }
            Err(ActionError::Cancelled) => return ActionStatus::Cancelled,
            // 校验失败只在字段上提示，不走 onError 也不弹通知
            Err(ActionError::Validation(errors)) => {
                tracing::debug!(action = %descriptor.id, failed = errors.len(), "validation blocked action");
                return ActionStatus::Failed(ActionError::Validation(errors));
            }
            Err(error) => {
                return handle_failure(env, descriptor, step, &step_id, error, payload, &outputs, token).await;
            }
        }
    }

    ActionStatus::Succeeded
}

/// 有 `onError` 时执行该步骤，否则通过通知渠道报告；两种情况都以失败结束
#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    env: &ActionEnv,
    descriptor: &ActionDescriptor,
    step: &Step,
    step_id: &str,
    error: ActionError,
    payload: &Value,
    outputs: &Value,
    token: &CancellationToken,
) -> ActionStatus {
    tracing::warn!(action = %descriptor.id, step = step_id, "step failed: {}", error);

    let Some(target) = &step.on_error else {
        env.services
            .notifier
            .notify(NotifyKind::Error, &format!("{} failed: {}", descriptor.id, error));
        return ActionStatus::Failed(error);
    };

    let Some(error_step) = descriptor.error_step(target) else {
        let missing = ActionError::MissingErrorStep {
            step: step_id.to_string(),
            target: target.clone(),
        };
        env.services
            .notifier
            .notify(NotifyKind::Error, &format!("{} failed: {}", descriptor.id, missing));
        return ActionStatus::Failed(error);
    };

    let error_value = json!({ "message": error.to_string(), "step": step_id });
    let step_scope = StepScope {
        action_id: &descriptor.id,
        payload,
        steps: outputs,
        error: Some(&error_value),
    };
    match run_step(env, error_step, &step_scope, token).await {
        Ok(_) => {}
        Err(ActionError::Cancelled) => return ActionStatus::Cancelled,
        Err(handler_error) => {
            tracing::warn!(action = %descriptor.id, step = %target, "onError step failed: {}", handler_error);
        }
    }
    ActionStatus::Failed(error)
}
