//! 页面渲染器测试

use super::support::{runtime_with, services, FakeHttp, FakeStream};
use crate::config::RuntimeConfig;
use crate::datasource::DataStatus;
use crate::expr::Path;
use crate::model::{PageConfig, CURRENT_SCHEMA_VERSION};
use crate::registry::{PlaceholderKind, WidgetRegistry};
use crate::runtime::{PageRuntime, StaticAuth};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

fn page(widgets: Value) -> Value {
    json!({
        "pageId": "test",
        "datasources": [
            { "id": "summary", "kind": "static", "value": { "total": 7, "label": "Total" } },
            { "id": "revenue", "kind": "http", "http": { "url": "/revenue" } }
        ],
        "widgets": widgets
    })
}

fn runtime_as(auth: StaticAuth, page_json: Value, http: Arc<FakeHttp>) -> PageRuntime {
    let (services, _bridge) = services(http, Arc::new(FakeStream::new()), auth);
    let mut runtime = PageRuntime::new(RuntimeConfig::default(), WidgetRegistry::with_builtins(), services);
    runtime.load_page_json(&page_json.to_string()).unwrap();
    runtime
}

#[test]
fn test_render_without_page_fails() {
    let (services, _bridge) = services(Arc::new(FakeHttp::new()), Arc::new(FakeStream::new()), StaticAuth::new());
    let runtime = PageRuntime::new(RuntimeConfig::default(), WidgetRegistry::with_builtins(), services);
    assert!(runtime.render().is_err());
}

#[test]
fn test_bindings_flow_into_props() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "title", "type": "text", "bindings": { "text": "data.summary.label" } },
            {
                "id": "total",
                "type": "kpi",
                "props": { "label": "Orders" },
                "bindings": { "value": "data.summary.total" }
            }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    assert_eq!(tree.ids(), vec!["title", "total"]);

    let title = tree.find("title").unwrap();
    assert_eq!(title.ui.text.as_deref(), Some("Total"));

    let total = tree.find("total").unwrap();
    assert_eq!(total.ui.attrs.get("loading"), Some(&json!(false)));
    assert_eq!(total.ui.text.as_deref(), Some("7"));
    assert_eq!(total.props.value("label"), Some(&json!("Orders")));
}

#[test]
fn test_primary_datasource_exposed_as_data() {
    let (runtime, _bridge) = runtime_with(
        page(json!([{ "id": "card", "type": "container", "datasourceId": "summary" }])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    let card = tree.find("card").unwrap();
    assert_eq!(card.status, Some(DataStatus::Success));
    assert_eq!(card.props.value("data"), Some(&json!({ "total": 7, "label": "Total" })));
}

/// 策略为假时整个子树不渲染，也不触发其数据源
#[tokio::test]
async fn test_hidden_policy_skips_subtree_and_datasources() {
    let http = Arc::new(FakeHttp::new().respond("/revenue", Ok(json!(100))));
    let widgets = json!([
        {
            "id": "admin",
            "type": "container",
            "policy": "hasRole('admin')",
            "children": [
                { "id": "secret", "type": "kpi", "bindings": { "value": "data.revenue" } }
            ]
        },
        { "id": "public", "type": "text", "props": { "text": "hi" } }
    ]);

    let viewer = runtime_as(StaticAuth::new().with_role("viewer"), page(widgets.clone()), http.clone());
    let tree = viewer.render().unwrap();
    viewer.settle().await;
    assert_eq!(tree.ids(), vec!["public"]);
    assert_eq!(http.calls(), 0);

    let admin = runtime_as(StaticAuth::new().with_role("admin"), page(widgets), http.clone());
    let tree = admin.render().unwrap();
    assert_eq!(tree.ids(), vec!["admin", "secret", "public"]);
    admin.settle().await;
    assert_eq!(http.calls(), 1);
}

#[test]
fn test_policy_reads_local_state() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "details", "type": "text", "policy": "state.expanded == true" }
        ])),
        Arc::new(FakeHttp::new()),
    );
    assert!(runtime.render().unwrap().is_empty());
    runtime.state().set(&Path::parse("expanded"), json!(true));
    assert_eq!(runtime.render().unwrap().ids(), vec!["details"]);
}

/// 无法求值的策略渲染成配置错误占位，而不是静默隐藏
#[test]
fn test_broken_policy_renders_placeholder() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "broken", "type": "text", "policy": "hasRole(" },
            { "id": "fine", "type": "text", "props": { "text": "ok" } }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    let broken = tree.find("broken").unwrap();
    assert_eq!(broken.placeholder, Some(PlaceholderKind::ConfigError));
    assert!(broken.error.is_some());
    assert!(!tree.find("fine").unwrap().is_placeholder());
}

#[test]
fn test_duplicate_ids_are_disambiguated() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "a", "type": "text" },
            { "id": "a", "type": "text" },
            { "type": "text" },
            { "type": "text" }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    assert_eq!(tree.ids(), vec!["a", "a~1", "text@1", "text@2"]);
    assert!(!tree.find("a").unwrap().is_placeholder());
    assert_eq!(tree.find("a~1").unwrap().placeholder, Some(PlaceholderKind::ConfigError));
}

/// 派生 id 不会与页面里声明的 id 冲突
#[test]
fn test_derived_ids_skip_declared_ids() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "a", "type": "text" },
            { "id": "a", "type": "text" },
            { "id": "a~1", "type": "text" },
            { "type": "text" },
            { "id": "text@1", "type": "text" }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    assert_eq!(tree.ids(), vec!["a", "a~2", "a~1", "text@2", "text@1"]);
    assert!(!tree.find("a~1").unwrap().is_placeholder());
    assert!(!tree.find("text@1").unwrap().is_placeholder());
    assert_eq!(tree.find("a~2").unwrap().placeholder, Some(PlaceholderKind::ConfigError));
}

/// 格式错误的控件或数据源只影响自身节点，页面照常加载
#[test]
fn test_malformed_descriptors_are_contained() {
    let document = json!({
        "pageId": "test",
        "datasources": [
            { "id": "summary", "kind": "static", "value": { "total": 7 } },
            { "id": "feed", "kind": "graphql", "query": "{ feed }" }
        ],
        "widgets": [
            { "id": "ok", "type": "text", "props": { "text": "fine" } },
            { "id": "bad", "type": "text", "props": "oops", "policy": 5 },
            { "id": "uses-feed", "type": "kpi", "datasourceId": "feed" },
            {
                "id": "box",
                "type": "container",
                "children": [
                    { "id": "inner-bad", "type": "text", "events": 3 },
                    { "id": "inner-ok", "type": "kpi", "bindings": { "value": "data.summary.total" } }
                ]
            }
        ]
    });
    let page_config = PageConfig::from_value(document.clone(), CURRENT_SCHEMA_VERSION).unwrap();
    assert!(page_config.find_widget("bad").unwrap().malformed.is_some());
    assert!(page_config.datasource("feed").unwrap().malformed().is_some());

    let (runtime, _bridge) = runtime_with(document, Arc::new(FakeHttp::new()));
    let tree = runtime.render().unwrap();
    assert_eq!(tree.ids(), vec!["ok", "bad", "uses-feed", "box", "inner-bad", "inner-ok"]);

    for id in ["bad", "uses-feed", "inner-bad"] {
        let node = tree.find(id).unwrap();
        assert_eq!(node.placeholder, Some(PlaceholderKind::ConfigError), "{id}");
        assert!(node.handlers.is_empty());
    }
    assert!(tree.find("uses-feed").unwrap().error.as_deref().unwrap().contains("feed"));

    assert_eq!(tree.find("ok").unwrap().ui.text.as_deref(), Some("fine"));
    assert!(!tree.find("box").unwrap().is_placeholder());
    assert_eq!(tree.find("inner-ok").unwrap().ui.text.as_deref(), Some("7"));
}

#[test]
fn test_unknown_type_has_no_handlers() {
    let (runtime, _bridge) = runtime_with(
        json!({
            "pageId": "test",
            "widgets": [
                { "id": "chart", "type": "chart3d", "events": { "tap": "drill" } },
                { "id": "ok", "type": "button", "events": { "tap": "drill" } }
            ],
            "actions": [{ "id": "drill", "steps": [] }]
        }),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    let chart = tree.find("chart").unwrap();
    assert_eq!(chart.placeholder, Some(PlaceholderKind::UnknownType));
    assert!(chart.handlers.is_empty());
    assert_eq!(tree.handler("ok", "tap").unwrap().action_id, "drill");
}

#[test]
fn test_ambiguous_binding_renders_placeholder() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            {
                "id": "kpi",
                "type": "kpi",
                "bindings": [
                    { "prop": "value", "datasource": "summary", "path": "total" },
                    { "prop": "value", "expr": "state.total" }
                ]
            },
            { "id": "sibling", "type": "text" }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    let kpi = tree.find("kpi").unwrap();
    assert_eq!(kpi.placeholder, Some(PlaceholderKind::ConfigError));
    assert!(kpi.error.as_deref().unwrap().contains("value"));
    assert!(!tree.find("sibling").unwrap().is_placeholder());
}

#[test]
fn test_unknown_datasource_renders_placeholder() {
    let (runtime, _bridge) = runtime_with(
        page(json!([{ "id": "kpi", "type": "kpi", "bindings": { "value": "data.nope.total" } }])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    assert_eq!(tree.find("kpi").unwrap().placeholder, Some(PlaceholderKind::ConfigError));
}

#[test]
fn test_renderer_error_renders_placeholder() {
    let (runtime, _bridge) = runtime_with(
        page(json!([
            { "id": "orders", "type": "list", "bindings": { "items": "data.summary" } },
            { "id": "after", "type": "text" }
        ])),
        Arc::new(FakeHttp::new()),
    );
    let tree = runtime.render().unwrap();
    assert_eq!(tree.find("orders").unwrap().placeholder, Some(PlaceholderKind::RenderError));
    assert!(!tree.find("after").unwrap().is_placeholder());
}

/// 表单控件的值来自本地状态，校验信息随节点输出
#[test]
fn test_input_value_and_errors_from_state() {
    let (runtime, _bridge) = runtime_with(
        page(json!([{ "id": "email", "type": "input", "statePath": "form.email" }])),
        Arc::new(FakeHttp::new()),
    );
    runtime.state().set(&Path::parse("form.email"), json!("a@b.c"));
    runtime
        .state()
        .set_validation("email", vec!["looks odd".to_string()]);

    let tree = runtime.render().unwrap();
    let email = tree.find("email").unwrap();
    assert_eq!(email.ui.attrs.get("value"), Some(&json!("a@b.c")));
    assert_eq!(email.errors, vec!["looks odd".to_string()]);
}

fn widget_list(types: &[&str], ids: &[String]) -> Value {
    Value::Array(
        types
            .iter()
            .zip(ids)
            .map(|(widget_type, id)| json!({ "id": id, "type": widget_type }))
            .collect(),
    )
}

proptest! {
    /// N 个可见控件产出 N 个 id 互不相同的节点
    #[test]
    fn test_visible_widgets_yield_unique_nodes(
        types in prop::collection::vec(prop::sample::select(vec!["text", "kpi", "button", "mystery"]), 1..24),
        pool in 1usize..6,
    ) {
        let ids: Vec<String> = (0..types.len()).map(|i| format!("w{}", i % pool)).collect();
        let (runtime, _bridge) = runtime_with(page(widget_list(&types, &ids)), Arc::new(FakeHttp::new()));
        let tree = runtime.render().unwrap();

        prop_assert_eq!(tree.len(), types.len());
        let unique: HashSet<&str> = tree.ids().into_iter().collect();
        prop_assert_eq!(unique.len(), types.len());
    }

    #[test]
    fn test_nested_widgets_all_rendered(depth in 1usize..8, width in 1usize..4) {
        let mut widgets = json!([]);
        for level in 0..depth {
            let siblings: Vec<Value> = (0..width)
                .map(|i| json!({ "id": format!("n{level}-{i}"), "type": "text" }))
                .collect();
            let mut container = json!({ "id": format!("box{level}"), "type": "container", "children": siblings });
            if let (Some(children), Value::Array(inner)) = (container["children"].as_array_mut(), widgets) {
                children.extend(inner);
            }
            widgets = json!([container]);
        }
        let (runtime, _bridge) = runtime_with(page(widgets), Arc::new(FakeHttp::new()));
        let tree = runtime.render().unwrap();
        prop_assert_eq!(tree.len(), depth * (width + 1));
    }
}
