//! 测试辅助：内存传输与运行时构造

use crate::config::RuntimeConfig;
use crate::datasource::{HttpRequest, HttpTransport, StreamEnvelope, StreamTransport};
use crate::error::DataError;
use crate::registry::WidgetRegistry;
use crate::runtime::{PageRuntime, QueueBridge, Services, StaticAuth};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// 让请求停在半路，直到测试放行
#[derive(Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

/// 按 URL 返回预设结果并记录调用
#[derive(Default)]
pub struct FakeHttp {
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<HashMap<String, Result<Value, DataError>>>,
    gate: Option<Arc<Gate>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn respond(self, url: &str, result: Result<Value, DataError>) -> Self {
        self.set_response(url, result);
        self
    }

    pub fn set_response(&self, url: &str, result: Result<Value, DataError>) {
        self.responses.lock().unwrap().insert(url.to_string(), result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeHttp {
    async fn send(&self, request: HttpRequest) -> Result<Value, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        let response = self.responses.lock().unwrap().get(&request.url).cloned();
        response.unwrap_or_else(|| {
            Err(DataError::Http {
                status: 404,
                message: format!("no fake response for {}", request.url),
            })
        })
    }
}

/// 可手动推送和断开的推送传输
#[derive(Default)]
pub struct FakeStream {
    subscriptions: AtomicUsize,
    senders: Mutex<HashMap<String, mpsc::Sender<StreamEnvelope>>>,
    connected: Notify,
}

impl FakeStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// 等待下一次订阅建立
    pub async fn wait_connected(&self) {
        self.connected.notified().await;
    }

    pub async fn push(&self, channel: &str, datasource_id: &str, data: Value) {
        let sender = self.senders.lock().unwrap().get(channel).cloned();
        if let Some(sender) = sender {
            let _ = sender
                .send(StreamEnvelope {
                    datasource_id: datasource_id.to_string(),
                    data,
                })
                .await;
        }
    }

    /// 关闭频道的接收端，模拟断线
    pub fn disconnect(&self, channel: &str) {
        self.senders.lock().unwrap().remove(channel);
    }
}

#[async_trait]
impl StreamTransport for FakeStream {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<StreamEnvelope>, DataError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(16);
        self.senders.lock().unwrap().insert(channel.to_string(), sender);
        self.connected.notify_one();
        Ok(receiver)
    }
}

pub fn services(http: Arc<FakeHttp>, stream: Arc<FakeStream>, auth: StaticAuth) -> (Services, QueueBridge) {
    let bridge = QueueBridge::new();
    let services = Services {
        http,
        stream,
        navigator: Arc::new(bridge.clone()),
        notifier: Arc::new(bridge.clone()),
        auth: Arc::new(auth),
    };
    (services, bridge)
}

/// 带内置组件的运行时，已加载给定页面
pub fn runtime_with(page: Value, http: Arc<FakeHttp>) -> (PageRuntime, QueueBridge) {
    let (services, bridge) = services(http, Arc::new(FakeStream::new()), StaticAuth::new());
    let mut runtime = PageRuntime::new(RuntimeConfig::default(), WidgetRegistry::with_builtins(), services);
    runtime
        .load_page_json(&page.to_string())
        .expect("test page should parse");
    (runtime, bridge)
}
