//! 推送通道
//!
//! 每个频道只建立一个订阅，收到的消息按数据源 id 分发给绑定的缓存条目。

use crate::error::DataError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// 推送消息信封
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnvelope {
    /// 等于频道名时广播给频道上的所有数据源
    pub datasource_id: String,
    pub data: Value,
}

/// 推送传输接口
///
/// 返回的接收端关闭即视为连接断开，由调用方按配置重连。
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<StreamEnvelope>, DataError>;
}

/// 基于 tokio-tungstenite 的 WebSocket 实现
///
/// 连接后发送 `{"type":"subscribe","channel":..}`，之后把每个文本帧
/// 解析为 [`StreamEnvelope`]。
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    url: String,
    connect_timeout: Duration,
}

impl TungsteniteTransport {
    pub fn new(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<StreamEnvelope>, DataError> {
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| DataError::Timeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| DataError::Stream(e.to_string()))?;

        let (mut write, mut read) = socket.split();
        let subscribe = json!({ "type": "subscribe", "channel": channel }).to_string();
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| DataError::Stream(e.to_string()))?;

        tracing::info!(channel, url = %self.url, "stream subscribed");

        let (tx, rx) = mpsc::channel(64);
        let channel = channel.to_string();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(channel = %channel, "stream read failed: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<StreamEnvelope>(&text) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!(channel = %channel, "ignoring frame: {}", e),
                }
            }
            tracing::info!(channel = %channel, "stream closed");
        });

        Ok(rx)
    }
}

/// 未配置推送地址时使用，订阅总是失败
#[derive(Debug, Clone, Default)]
pub struct DisabledStream;

#[async_trait]
impl StreamTransport for DisabledStream {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<StreamEnvelope>, DataError> {
        Err(DataError::Stream(format!(
            "no websocket endpoint configured for channel `{channel}`"
        )))
    }
}
