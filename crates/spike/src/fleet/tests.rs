use std::collections::BTreeMap;

use serde_json::Value;

use super::*;
use crate::config::ToolsetConfig;
use crate::filter::ToolFilter;
use crate::mcp::CallToolResult;
use crate::testutil::{echo_responder, fake_upstream, fake_upstream_with_config, tool};
use crate::toolset::{ToolsetController, LOAD_TOOLSET};

fn stdio_config(command: &str) -> UpstreamConfig {
    UpstreamConfig::stdio(command, vec![])
}

async fn two_upstream_fleet() -> Fleet {
    let mut fleet = Fleet::new();
    fleet.attach_upstream(fake_upstream("vitest", vec![tool("run_tests")], echo_responder).await);
    fleet.attach_upstream(
        fake_upstream("playwright", vec![tool("navigate")], echo_responder).await,
    );
    fleet
}

#[tokio::test]
async fn catalog_composition() {
    let fleet = two_upstream_fleet().await;
    let tools = fleet.all_tools();

    let names: Vec<&str> = tools.iter().map(|t| t.namespaced_name.as_str()).collect();
    assert_eq!(names, vec!["vitest__run_tests", "playwright__navigate"]);
    assert_eq!(tools[0].server_name, "vitest");
    assert_eq!(tools[0].original_name(), "run_tests");
    assert_eq!(tools[1].server_name, "playwright");
    assert_eq!(tools[1].original_name(), "navigate");
}

#[tokio::test]
async fn call_routes_to_owning_upstream() {
    let mut fleet = Fleet::new();
    fleet.attach_upstream(
        fake_upstream("vitest", vec![tool("run_tests")], |name, args| {
            CallToolResult::text(format!("{name} with {args}"))
        })
        .await,
    );

    let result = fleet
        .call_tool("vitest__run_tests", serde_json::json!({ "filter": "*.ts" }))
        .await
        .unwrap();
    // The upstream sees the local name, not the wire name.
    assert_eq!(result.text_content(), r#"run_tests with {"filter":"*.ts"}"#);
}

#[tokio::test]
async fn greedy_parse_routes_to_longest_server_name() {
    let mut fleet = Fleet::new();
    fleet.attach_upstream(fake_upstream("test", vec![tool("irrelevant")], echo_responder).await);
    fleet.attach_upstream(
        fake_upstream("test_server", vec![tool("do_thing")], |name, _| {
            CallToolResult::text(format!("ran {name}"))
        })
        .await,
    );

    let result = fleet
        .call_tool("test_server__do_thing", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result.text_content(), "ran do_thing");
}

#[tokio::test]
async fn unknown_namespace_cannot_resolve() {
    let mut fleet = two_upstream_fleet().await;
    let err = fleet
        .call_tool("unknown__tool", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::CannotResolve(_)), "err={err}");
}

#[tokio::test]
async fn filtered_tools_are_hidden_and_uncallable() {
    let config = UpstreamConfig::Stdio {
        command: "fake".to_string(),
        args: vec![],
        env: BTreeMap::new(),
        tools: Some(ToolFilter {
            allowed: Some(vec!["read_*".to_string(), "write_*".to_string()]),
            blocked: Some(vec!["write_*".to_string()]),
        }),
    };
    let mut fleet = Fleet::new();
    fleet.attach_upstream(
        fake_upstream_with_config(
            "files",
            config,
            vec![
                tool("read_file"),
                tool("write_file"),
                tool("search_code"),
                tool("dangerous_delete"),
                tool("run_tests"),
            ],
            echo_responder,
        )
        .await,
    );

    let names: Vec<String> = fleet
        .all_tools()
        .into_iter()
        .map(|t| t.namespaced_name)
        .collect();
    assert_eq!(names, vec!["files__read_file".to_string()]);

    let err = fleet
        .call_tool("files__write_file", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ToolNotFound(_)), "err={err}");

    let ok = fleet
        .call_tool("files__read_file", serde_json::json!({}))
        .await
        .unwrap();
    assert!(!ok.is_error());
}

#[tokio::test]
async fn toolset_visibility_gates_catalog_and_calls() {
    let mut toolsets = BTreeMap::new();
    toolsets.insert(
        "testing".to_string(),
        ToolsetConfig {
            servers: vec!["vitest".to_string()],
            description: None,
        },
    );

    let mut fleet = Fleet::new().with_toolsets(ToolsetController::new(toolsets));
    fleet.attach_upstream(fake_upstream("vitest", vec![tool("run_tests")], echo_responder).await);

    // Hidden until loaded: only the meta-tools are in the catalog.
    let names: Vec<String> = fleet
        .all_tools()
        .into_iter()
        .map(|t| t.namespaced_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "spike__list_toolsets".to_string(),
            "spike__load_toolset".to_string(),
            "spike__unload_toolset".to_string(),
        ]
    );

    let err = fleet
        .call_tool("vitest__run_tests", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ToolsetNotLoaded { .. }), "err={err}");

    // Loading through the meta-tool makes the server visible.
    let result = fleet
        .call_tool(LOAD_TOOLSET, serde_json::json!({ "name": "testing" }))
        .await
        .unwrap();
    assert!(!result.is_error());
    assert!(result.text_content().contains("1 tools"));

    assert!(fleet
        .all_tools()
        .iter()
        .any(|t| t.namespaced_name == "vitest__run_tests"));
    fleet
        .call_tool("vitest__run_tests", serde_json::json!({}))
        .await
        .unwrap();
}

#[tokio::test]
async fn no_prefix_mode_uses_first_server_wins() {
    let mut fleet = Fleet::new().with_no_prefix(true);
    fleet.attach_upstream(
        fake_upstream("first", vec![tool("shared"), tool("only_first")], |name, _| {
            CallToolResult::text(format!("first:{name}"))
        })
        .await,
    );
    fleet.attach_upstream(
        fake_upstream("second", vec![tool("shared")], |name, _| {
            CallToolResult::text(format!("second:{name}"))
        })
        .await,
    );

    let names: Vec<String> = fleet
        .all_tools()
        .into_iter()
        .map(|t| t.namespaced_name)
        .collect();
    assert_eq!(names, vec!["shared", "only_first", "shared"]);

    let result = fleet
        .call_tool("shared", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result.text_content(), "first:shared");

    let err = fleet
        .call_tool("missing", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ToolNotFound(_)));
}

#[tokio::test]
async fn upstream_error_results_are_preserved() {
    let mut fleet = Fleet::new();
    fleet.attach_upstream(
        fake_upstream("srv", vec![tool("fails")], |_, _| {
            CallToolResult::error("boom")
        })
        .await,
    );

    let result = fleet.call_tool("srv__fails", serde_json::json!({})).await.unwrap();
    assert!(result.is_error());
    assert_eq!(result.text_content(), "boom");
}

#[tokio::test]
async fn disconnect_server_is_noop_on_unknown_name() {
    let mut fleet = two_upstream_fleet().await;
    fleet.disconnect_server("does-not-exist").await;
    assert_eq!(fleet.server_names(), vec!["vitest", "playwright"]);

    fleet.disconnect_server("vitest").await;
    assert_eq!(fleet.server_names(), vec!["playwright"]);
    let err = fleet
        .call_tool("vitest__run_tests", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ServerNotConnected(_)), "err={err}");
}

#[test]
fn diff_of_identical_configs_is_empty() {
    let mut configs = BTreeMap::new();
    configs.insert("srv".to_string(), stdio_config("v1"));
    assert!(diff_config_keys(&configs, &configs).is_empty());
}

#[test]
fn diff_reports_added_removed_changed() {
    let mut old = BTreeMap::new();
    old.insert("keep".to_string(), stdio_config("same"));
    old.insert("gone".to_string(), stdio_config("x"));
    old.insert("srv".to_string(), stdio_config("v1"));

    let mut new = BTreeMap::new();
    new.insert("keep".to_string(), stdio_config("same"));
    new.insert("srv".to_string(), stdio_config("v2"));
    new.insert("fresh".to_string(), stdio_config("y"));

    let diff = diff_config_keys(&old, &new);
    assert_eq!(diff.added, vec!["fresh"]);
    assert_eq!(diff.removed, vec!["gone"]);
    assert_eq!(diff.changed, vec!["srv"]);
}

#[test]
fn diff_composition_matches_direct_diff() {
    let mut c1 = BTreeMap::new();
    c1.insert("a".to_string(), stdio_config("1"));
    c1.insert("b".to_string(), stdio_config("1"));

    let mut c2 = BTreeMap::new();
    c2.insert("b".to_string(), stdio_config("2"));
    c2.insert("c".to_string(), stdio_config("1"));

    let mut c3 = BTreeMap::new();
    c3.insert("c".to_string(), stdio_config("1"));
    c3.insert("d".to_string(), stdio_config("1"));

    // Applying c1->c2 then c2->c3 must land the fleet in the same state as
    // c1->c3 directly (given every connect succeeds).
    fn apply(
        mut state: BTreeMap<String, UpstreamConfig>,
        new: &BTreeMap<String, UpstreamConfig>,
    ) -> BTreeMap<String, UpstreamConfig> {
        let diff = diff_config_keys(&state, new);
        for name in diff.removed {
            state.remove(&name);
        }
        for name in diff.added.into_iter().chain(diff.changed) {
            state.insert(name.clone(), new[&name].clone());
        }
        state
    }

    let stepwise = apply(apply(c1.clone(), &c2), &c3);
    let direct = apply(c1, &c3);
    assert_eq!(stepwise, direct);
}

#[tokio::test]
async fn apply_diff_removes_and_reports() {
    let mut fleet = two_upstream_fleet().await;

    // New config keeps only playwright with an unchanged config.
    let mut new = ResolvedConfig::default();
    new.upstreams
        .insert("playwright".to_string(), stdio_config("fake"));

    let diff = fleet.apply_config_diff(&new).await;
    assert_eq!(diff.removed, vec!["vitest"]);
    assert!(diff.added.is_empty());
    assert!(diff.changed.is_empty());
    assert_eq!(fleet.server_names(), vec!["playwright"]);
}

#[tokio::test]
async fn changed_config_closes_the_old_upstream() {
    let mut fleet = Fleet::new();
    fleet.attach_upstream(
        fake_upstream_with_config("srv", stdio_config("v1"), vec![tool("t")], echo_responder)
            .await,
    );

    // The reconnect to the new config fails (no such binary), so the old
    // upstream must be gone and the fleet must report nothing as changed.
    let mut new = ResolvedConfig::default();
    new.upstreams.insert(
        "srv".to_string(),
        stdio_config("/nonexistent/spike-test-binary"),
    );
    let diff = fleet.apply_config_diff(&new).await;
    assert!(diff.changed.is_empty());
    assert!(fleet.upstream("srv").is_none());
}
