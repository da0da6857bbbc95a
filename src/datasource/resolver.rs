//! 数据源解析器
//!
//! `resolve` 总是立即返回当前状态，需要时在后台发起请求：
//! - 同一缓存键同时只有一个请求在途，并发调用方共享结果
//! - 重新请求期间保留旧值（stale-while-revalidate）
//! - 描述符指纹变化时丢弃旧条目
//! - 每次发起请求递增代号，迟到的旧结果直接丢弃

use super::cache::{CacheEntry, CacheKey, DataStatus, Resolution};
use super::http::{render_params, HttpRequest, HttpTransport};
use super::stream::{StreamEnvelope, StreamTransport};
use crate::config::RuntimeConfig;
use crate::error::DataError;
use crate::expr::Scope;
use crate::model::{DatasourceDescriptor, DatasourceKind};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 计算数据源的请求参数，HTTP 数据源渲染 `params` 模板，其余为空
pub fn request_params(
    descriptor: &DatasourceDescriptor,
    scope: &Scope<'_>,
) -> Result<Map<String, Value>, DataError> {
    match &descriptor.kind {
        DatasourceKind::Http { http } => render_params(http, scope),
        _ => Ok(Map::new()),
    }
}

#[derive(Default)]
struct ChannelState {
    active: bool,
    /// 每个数据源 id 最近一次推送的值，用于回放
    latest: HashMap<String, Value>,
}

struct Shared {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    channels: Mutex<HashMap<String, ChannelState>>,
    http: Arc<dyn HttpTransport>,
    stream: Arc<dyn StreamTransport>,
    config: RuntimeConfig,
    changes: broadcast::Sender<CacheKey>,
    shutdown: CancellationToken,
}

/// 数据源解析器，克隆得到同一份缓存的句柄
#[derive(Clone)]
pub struct DatasourceResolver {
    shared: Arc<Shared>,
}

impl DatasourceResolver {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        stream: Arc<dyn StreamTransport>,
        config: RuntimeConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                http,
                stream,
                config,
                changes,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// 条目更新（请求完成、推送到达、失效）时广播缓存键
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.shared.changes.subscribe()
    }

    /// 返回当前状态，必要时在后台发起请求，从不阻塞
    pub fn resolve(&self, descriptor: &DatasourceDescriptor, params: &Map<String, Value>) -> Resolution {
        let key = CacheKey::new(&descriptor.id, params);
        let now = Instant::now();
        let mut entries = self.shared.lock_entries();

        let fingerprint = descriptor.fingerprint();
        if entries.get(&key).is_some_and(|entry| entry.fingerprint != fingerprint) {
            tracing::debug!(key = %key, "descriptor changed, dropping cached entry");
            entries.remove(&key);
        }

        match &descriptor.kind {
            DatasourceKind::Static { value } => entries
                .entry(key)
                .or_insert_with(|| {
                    let mut entry =
                        CacheEntry::new(descriptor, params, None, Resolution::success(value.clone()));
                    entry.ttl = None;
                    entry.fetched_at = Some(now);
                    entry
                })
                .current(),
            DatasourceKind::Http { .. } => {
                let default_ttl = self.shared.config.cache.default_ttl_ms.map(Duration::from_millis);
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| CacheEntry::new(descriptor, params, default_ttl, Resolution::loading(None)));
                if entry.in_flight || !entry.is_expired(now) {
                    tracing::trace!(key = %key, "cache hit");
                    return entry.current();
                }
                self.shared.start_fetch(&key, entry)
            }
            DatasourceKind::Websocket { .. } => {
                let channel = descriptor.channel().unwrap_or(&descriptor.id).to_string();
                let current = match entries.get(&key) {
                    Some(entry) => entry.current(),
                    None => {
                        let initial = match self.shared.latest_for(&channel, &descriptor.id) {
                            Some(value) => Resolution::success(value),
                            None => Resolution::loading(None),
                        };
                        let entry = CacheEntry::new(descriptor, params, None, initial);
                        let current = entry.current();
                        entries.insert(key, entry);
                        current
                    }
                };
                drop(entries);
                Shared::ensure_channel(&self.shared, &channel);
                current
            }
            DatasourceKind::Malformed { reason } => {
                Resolution::failed(DataError::InvalidDescriptor(reason.clone()), None)
            }
        }
    }

    /// 等到该键不再处于加载中
    ///
    /// 推送数据源在第一条消息到达前会一直等待，调用方自行加超时。
    pub async fn resolve_settled(
        &self,
        descriptor: &DatasourceDescriptor,
        params: &Map<String, Value>,
    ) -> Resolution {
        let current = self.resolve(descriptor, params);
        if current.is_settled() {
            return current;
        }
        let key = CacheKey::new(&descriptor.id, params);
        let receiver = self.shared.lock_entries().get(&key).map(|entry| entry.state.subscribe());
        let Some(mut receiver) = receiver else {
            return current;
        };
        let settled = match receiver.wait_for(|resolution| resolution.is_settled()).await {
            Ok(resolution) => resolution.clone(),
            Err(_) => current,
        };
        settled
    }

    /// 只读当前状态，不触发请求
    pub fn peek(&self, descriptor: &DatasourceDescriptor, params: &Map<String, Value>) -> Option<Resolution> {
        let key = CacheKey::new(&descriptor.id, params);
        self.shared.lock_entries().get(&key).map(CacheEntry::current)
    }

    /// 显式刷新：该数据源的所有 HTTP 条目立即重新请求，旧值保留到新结果到达
    ///
    /// 返回重新发起的请求数。
    pub fn refresh(&self, datasource_id: &str) -> usize {
        let mut refreshed = Vec::new();
        {
            let mut entries = self.shared.lock_entries();
            for (key, entry) in entries.iter_mut() {
                if entry.descriptor.id != datasource_id
                    || !matches!(entry.descriptor.kind, DatasourceKind::Http { .. })
                {
                    continue;
                }
                entry.fetched_at = None;
                self.shared.start_fetch(key, entry);
                refreshed.push(key.clone());
            }
        }
        tracing::info!(datasource = datasource_id, count = refreshed.len(), "refresh");
        for key in &refreshed {
            let _ = self.shared.changes.send(key.clone());
        }
        refreshed.len()
    }

    /// 丢弃该数据源的全部条目，在途请求的结果会被忽略
    pub fn invalidate(&self, datasource_id: &str) {
        self.shared
            .lock_entries()
            .retain(|_, entry| entry.descriptor.id != datasource_id);
    }

    /// 页面重新加载后调用：丢弃不再声明或指纹变化的数据源条目
    pub fn retain_descriptors(&self, descriptors: &[DatasourceDescriptor]) {
        let fingerprints: HashMap<&str, String> = descriptors
            .iter()
            .map(|descriptor| (descriptor.id.as_str(), descriptor.fingerprint()))
            .collect();
        let mut entries = self.shared.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| {
            fingerprints.get(entry.descriptor.id.as_str()) == Some(&entry.fingerprint)
        });
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, "evicted cache entries for changed datasources");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared
            .lock_entries()
            .values()
            .filter(|entry| entry.in_flight)
            .count()
    }

    /// 等待当前所有在途请求完成
    pub async fn settle(&self) {
        loop {
            let receivers: Vec<_> = self
                .shared
                .lock_entries()
                .values()
                .filter(|entry| entry.in_flight)
                .map(|entry| entry.state.subscribe())
                .collect();
            if receivers.is_empty() {
                return;
            }
            for mut receiver in receivers {
                let _ = receiver.wait_for(|resolution| resolution.is_settled()).await;
            }
        }
    }

    /// 停止所有后台请求与推送订阅
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, ChannelState>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 调用方持有条目锁
    fn start_fetch(self: &Arc<Self>, key: &CacheKey, entry: &mut CacheEntry) -> Resolution {
        let previous = entry.last_value();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(key = %key, "no runtime to run request");
                entry.fetched_at = Some(Instant::now());
                let failed = Resolution::failed(DataError::NoRuntime, previous);
                entry.publish(failed.clone());
                return failed;
            }
        };

        let DatasourceKind::Http { http } = &entry.descriptor.kind else {
            return entry.current();
        };
        let request = match HttpRequest::from_spec(http, &entry.params, &Scope::new(), &self.config) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(key = %key, "cannot build request: {}", error);
                entry.fetched_at = Some(Instant::now());
                let failed = Resolution::failed(error, previous);
                entry.publish(failed.clone());
                return failed;
            }
        };

        entry.generation += 1;
        entry.in_flight = true;
        let loading = Resolution::loading(previous);
        entry.publish(loading.clone());

        tracing::debug!(key = %key, generation = entry.generation, "fetch started");
        let shared = Arc::clone(self);
        let key = key.clone();
        let generation = entry.generation;
        let timeout = self.config.request_timeout();
        handle.spawn(async move {
            let result = tokio::select! {
                _ = shared.shutdown.cancelled() => Err(DataError::Closed),
                result = tokio::time::timeout(timeout, shared.http.send(request)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(DataError::Timeout(timeout.as_millis() as u64)),
                },
            };
            shared.complete(&key, generation, result);
        });

        loading
    }

    fn complete(&self, key: &CacheKey, generation: u64, result: Result<Value, DataError>) {
        {
            let mut entries = self.lock_entries();
            let Some(entry) = entries.get_mut(key) else {
                tracing::debug!(key = %key, "discarding result for evicted entry");
                return;
            };
            if entry.generation != generation {
                tracing::debug!(key = %key, generation, "discarding stale result");
                return;
            }
            entry.in_flight = false;
            entry.fetched_at = Some(Instant::now());
            let resolution = match result {
                Ok(value) => Resolution::success(value),
                Err(error) => {
                    tracing::warn!(key = %key, "fetch failed: {}", error);
                    Resolution::failed(error, entry.last_value())
                }
            };
            entry.publish(resolution);
        }
        let _ = self.changes.send(key.clone());
    }

    fn latest_for(&self, channel: &str, datasource_id: &str) -> Option<Value> {
        let channels = self.lock_channels();
        let state = channels.get(channel)?;
        state
            .latest
            .get(datasource_id)
            .or_else(|| state.latest.get(channel))
            .cloned()
    }

    fn ensure_channel(self: &Arc<Self>, channel: &str) {
        {
            let mut channels = self.lock_channels();
            let state = channels.entry(channel.to_string()).or_default();
            if state.active {
                return;
            }
            state.active = true;
        }

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(pump(Arc::clone(self), channel.to_string()));
            }
            Err(_) => {
                self.fail_channel(channel, DataError::NoRuntime);
                self.deactivate(channel);
            }
        }
    }

    fn deactivate(&self, channel: &str) {
        if let Some(state) = self.lock_channels().get_mut(channel) {
            state.active = false;
        }
    }

    fn wants_channel(&self, channel: &str) -> bool {
        self.lock_entries()
            .values()
            .any(|entry| entry.descriptor.channel() == Some(channel))
    }

    /// 对频道上绑定的条目逐个应用 `update`，返回发生变化的键
    fn update_channel(&self, channel: &str, mut update: impl FnMut(&CacheEntry) -> Option<Resolution>) {
        let mut changed = Vec::new();
        {
            let entries = self.lock_entries();
            for (key, entry) in entries.iter() {
                if entry.descriptor.channel() != Some(channel) {
                    continue;
                }
                if let Some(resolution) = update(entry) {
                    entry.publish(resolution);
                    changed.push(key.clone());
                }
            }
        }
        for key in changed {
            let _ = self.changes.send(key);
        }
    }

    fn route(&self, channel: &str, envelope: StreamEnvelope) {
        self.lock_channels()
            .entry(channel.to_string())
            .or_default()
            .latest
            .insert(envelope.datasource_id.clone(), envelope.data.clone());

        let fan_out = envelope.datasource_id == channel;
        self.update_channel(channel, |entry| {
            (fan_out || entry.descriptor.id == envelope.datasource_id)
                .then(|| Resolution::success(envelope.data.clone()))
        });
    }

    /// 重连后把最近的值回放给频道上的条目
    fn replay(&self, channel: &str) {
        let latest: HashMap<String, Value> = match self.lock_channels().get(channel) {
            Some(state) => state.latest.clone(),
            None => return,
        };
        if latest.is_empty() {
            return;
        }
        self.update_channel(channel, |entry| {
            let value = latest
                .get(&entry.descriptor.id)
                .or_else(|| latest.get(channel))?;
            let current = entry.current();
            (current.status != DataStatus::Success || current.value.as_ref() != Some(value))
                .then(|| Resolution::success(value.clone()))
        });
    }

    fn fail_channel(&self, channel: &str, error: DataError) {
        self.update_channel(channel, |entry| {
            Some(Resolution::failed(error.clone(), entry.last_value()))
        });
    }
}

/// 单个频道的订阅循环，断开后按配置退避重连
async fn pump(shared: Arc<Shared>, channel: String) {
    let max_attempts = shared.config.websocket.reconnect_attempts;
    let backoff = Duration::from_millis(shared.config.websocket.reconnect_backoff_ms);
    let mut failures: u32 = 0;

    loop {
        let subscribed = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            subscribed = shared.stream.subscribe(&channel) => subscribed,
        };

        match subscribed {
            Ok(mut receiver) => {
                shared.replay(&channel);
                let mut received = false;
                loop {
                    let envelope = tokio::select! {
                        _ = shared.shutdown.cancelled() => {
                            shared.deactivate(&channel);
                            return;
                        }
                        envelope = receiver.recv() => envelope,
                    };
                    let Some(envelope) = envelope else { break };
                    received = true;
                    shared.route(&channel, envelope);
                }
                if received {
                    failures = 0;
                } else {
                    failures += 1;
                }
                tracing::warn!(channel = %channel, "stream disconnected");
            }
            Err(error) => {
                failures += 1;
                tracing::warn!(channel = %channel, attempt = failures, "stream subscribe failed: {}", error);
                shared.fail_channel(&channel, error);
            }
        }

        if failures > max_attempts {
            tracing::error!(channel = %channel, "giving up after {} attempts", failures);
            break;
        }
        if !shared.wants_channel(&channel) {
            break;
        }
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff * failures.max(1)) => {}
        }
    }

    shared.deactivate(&channel);
}
