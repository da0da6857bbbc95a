//! 控件注册表测试

use crate::error::RenderError;
use crate::expr::Resolved;
use crate::registry::{KpiComponent, RegisterOutcome, RenderProps, UiNode, WidgetRegistry, WidgetRenderer};
use serde_json::json;
use std::sync::Arc;

fn badge(props: &RenderProps) -> Result<UiNode, RenderError> {
    Ok(UiNode::new("badge").text(props.text("text").unwrap_or_default()))
}

#[test]
fn test_register_is_idempotent() {
    let mut registry = WidgetRegistry::new();
    let renderer: Arc<dyn WidgetRenderer> = Arc::new(badge);

    assert_eq!(registry.register("badge", Arc::clone(&renderer)), RegisterOutcome::Inserted);
    assert_eq!(registry.register("badge", Arc::clone(&renderer)), RegisterOutcome::Unchanged);
    assert_eq!(registry.len(), 1);

    // 不同的渲染器覆盖旧的
    assert_eq!(registry.register("badge", Arc::new(KpiComponent)), RegisterOutcome::Replaced);
    let mut props = RenderProps::new("b1", "badge");
    props.insert("label", Resolved::Value(json!("Sales")));
    assert_eq!(registry.render("badge", &props).unwrap().element, "kpi");
}

#[test]
fn test_unknown_type_uses_fallback() {
    let registry = WidgetRegistry::with_builtins();
    assert!(!registry.contains("chart3d"));

    let props = RenderProps::new("c1", "chart3d");
    let node = registry.render("chart3d", &props).unwrap();
    assert_eq!(node.element, "placeholder");
    assert_eq!(node.attrs.get("reason"), Some(&json!("unknownType")));
    assert_eq!(node.attrs.get("widgetType"), Some(&json!("chart3d")));
}

#[test]
fn test_builtin_types() {
    let registry = WidgetRegistry::with_builtins();
    assert_eq!(
        registry.types(),
        vec!["button", "container", "input", "kpi", "list", "text", "view"]
    );
}

/// 渲染器 panic 被转换成错误，不会向外传播
#[test]
fn test_renderer_panic_is_contained() {
    let mut registry = WidgetRegistry::new();
    registry.register(
        "boom",
        Arc::new(|_: &RenderProps| -> Result<UiNode, RenderError> { panic!("chart engine exploded") }),
    );
    let error = registry.render("boom", &RenderProps::new("b1", "boom")).unwrap_err();
    assert_eq!(error.widget_type, "boom");
    assert_eq!(error.message, "chart engine exploded");
}

#[test]
fn test_kpi_distinguishes_unset_from_null() {
    let registry = WidgetRegistry::with_builtins();

    let mut props = RenderProps::new("k1", "kpi");
    props.insert("label", Resolved::Value(json!("Revenue")));
    let loading = registry.render("kpi", &props).unwrap();
    assert_eq!(loading.attrs.get("loading"), Some(&json!(true)));

    props.insert("value", Resolved::Value(json!(null)));
    let loaded = registry.render("kpi", &props).unwrap();
    assert_eq!(loaded.attrs.get("loading"), Some(&json!(false)));
    assert_eq!(loaded.text.as_deref(), Some(""));
}

#[test]
fn test_list_rejects_non_list_items() {
    let registry = WidgetRegistry::with_builtins();
    let mut props = RenderProps::new("l1", "list");
    props.insert("items", Resolved::Value(json!({ "not": "a list" })));
    assert!(registry.render("list", &props).is_err());

    props.insert("items", Resolved::Value(json!([1, 2])));
    let node = registry.render("list", &props).unwrap();
    assert_eq!(node.attrs.get("count"), Some(&json!(2)));
}

/// 类型名不区分大小写
#[test]
fn test_type_lookup_ignores_case() {
    let mut registry = WidgetRegistry::with_builtins();
    assert!(registry.contains("KPI"));
    assert_eq!(registry.render("Kpi", &RenderProps::new("k1", "Kpi")).unwrap().element, "kpi");

    let renderer: Arc<dyn WidgetRenderer> = Arc::new(badge);
    assert_eq!(registry.register("Badge", Arc::clone(&renderer)), RegisterOutcome::Inserted);
    assert_eq!(registry.register("BADGE", renderer), RegisterOutcome::Unchanged);
    assert!(registry.types().contains(&"badge"));
}

/// 没有绑定 value 时指标卡显示主数据源的值
#[test]
fn test_kpi_falls_back_to_primary_data() {
    let registry = WidgetRegistry::with_builtins();
    let mut props = RenderProps::new("k1", "kpi");
    props.insert("data", Resolved::Value(json!(4200)));
    let node = registry.render("kpi", &props).unwrap();
    assert_eq!(node.attrs.get("loading"), Some(&json!(false)));
    assert_eq!(node.text.as_deref(), Some("4200"));

    // 显式绑定的 value 优先
    props.insert("value", Resolved::Value(json!(7)));
    assert_eq!(registry.render("kpi", &props).unwrap().text.as_deref(), Some("7"));
}
