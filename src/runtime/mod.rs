//! 应用运行时

mod app;
mod bridge;

pub use app::PageRuntime;
pub use bridge::{
    AuthContext, BridgeEvent, Navigator, NotifyKind, Notifier, QueueBridge, StaticAuth,
};

use crate::config::RuntimeConfig;
use crate::datasource::{
    DisabledStream, HttpTransport, StreamTransport, TungsteniteTransport, UreqTransport,
};
use std::sync::Arc;

/// 运行时依赖的外部能力，全部以接口注入
#[derive(Clone)]
pub struct Services {
    pub http: Arc<dyn HttpTransport>,
    pub stream: Arc<dyn StreamTransport>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
    pub auth: Arc<dyn AuthContext>,
}

impl Services {
    /// 按配置创建默认传输，导航与通知交给队列桥接
    pub fn from_config(config: &RuntimeConfig, bridge: QueueBridge, auth: Arc<dyn AuthContext>) -> Self {
        let stream: Arc<dyn StreamTransport> = match &config.websocket.url {
            Some(url) => Arc::new(TungsteniteTransport::new(url, config.request_timeout())),
            None => Arc::new(DisabledStream),
        };
        Self {
            http: Arc::new(UreqTransport::from_config(config)),
            stream,
            navigator: Arc::new(bridge.clone()),
            notifier: Arc::new(bridge),
            auth,
        }
    }
}
