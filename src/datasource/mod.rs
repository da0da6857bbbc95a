//! 数据源 - 缓存、去重、HTTP 拉取与 WebSocket 推送

mod cache;
mod http;
mod resolver;
mod stream;

pub use cache::{CacheKey, DataStatus, Resolution};
pub use http::{render_params, HttpRequest, HttpTransport, UreqTransport};
pub use resolver::{request_params, DatasourceResolver};
pub use stream::{DisabledStream, StreamEnvelope, StreamTransport, TungsteniteTransport};
