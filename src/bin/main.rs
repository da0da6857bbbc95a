//! Mini SDUI 演示程序
//!
//! 用法：`mini-app <page.json> [runtime.json]`
//! 渲染页面，等待数据源返回后再渲染一次，输出节点树 JSON。

use mini_sdui::runtime::{QueueBridge, Services, StaticAuth};
use mini_sdui::{PageRuntime, RuntimeConfig, WidgetRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mini_sdui=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), String> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let page_path = args
        .next()
        .unwrap_or_else(|| "demos/dashboard.json".to_string());
    let config = match args.next() {
        Some(path) => RuntimeConfig::load(&path).map_err(|e| e.to_string())?,
        None => RuntimeConfig::default(),
    };

    let page_json = std::fs::read_to_string(&page_path).map_err(|e| format!("{page_path}: {e}"))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;

    runtime.block_on(async move {
        let bridge = QueueBridge::new();
        let auth = StaticAuth::new().with_role("viewer");
        let services = Services::from_config(&config, bridge.clone(), Arc::new(auth));
        let mut app = PageRuntime::new(config, WidgetRegistry::with_builtins(), services);

        app.load_page_json(&page_json).map_err(|e| e.to_string())?;

        let first = app.render().map_err(|e| e.to_string())?;
        tracing::info!(nodes = first.len(), "initial render");

        let timeout = app.config().request_timeout() + Duration::from_millis(500);
        if tokio::time::timeout(timeout, app.settle()).await.is_err() {
            tracing::warn!("datasources did not settle in time");
        }

        let tree = app.render().map_err(|e| e.to_string())?;
        let output = serde_json::to_string_pretty(&tree).map_err(|e| e.to_string())?;
        println!("{output}");

        for event in bridge.drain_events() {
            tracing::info!(?event, "bridge event");
        }
        Ok(())
    })
}
