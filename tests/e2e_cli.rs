mod common;

use common::cli::{WiWorkspace, extract_json_payload, run_wi};
use predicates::prelude::*;

fn create_json(workspace: &WiWorkspace, args: &[&str], label: &str) -> serde_json::Value {
    let mut full = vec!["create"];
    full.extend_from_slice(args);
    full.push("--json");
    let run = run_wi(workspace, full, label);
    assert!(run.status.success(), "create failed: {}", run.stderr);
    run.json()
}

fn error_json(stderr: &str) -> serde_json::Value {
    serde_json::from_str(&extract_json_payload(stderr))
        .unwrap_or_else(|err| panic!("stderr is not JSON ({err}): {stderr}"))
}

#[test]
fn e2e_init_writes_workspace() {
    let _log = common::test_log("e2e_init_writes_workspace");
    let workspace = WiWorkspace::new();
    let run = run_wi(&workspace, ["init", "--identifier", "core", "--json"], "init");
    assert!(run.status.success(), "init failed: {}", run.stderr);

    let payload = run.json();
    assert_eq!(payload["project"]["identifier"], "CORE");
    assert_eq!(payload["states"].as_array().map(Vec::len), Some(5));

    let dir = workspace.root.join(".workitems");
    assert!(dir.join("items.db").exists());
    let config = std::fs::read_to_string(dir.join("config.yaml")).expect("config");
    assert!(predicate::str::contains("project").eval(&config));
    assert!(predicate::str::contains("actor").eval(&config));

    let again = run_wi(&workspace, ["init"], "init_again");
    assert_eq!(again.status.code(), Some(2));
}

#[test]
fn e2e_commands_outside_a_workspace_fail() {
    let _log = common::test_log("e2e_commands_outside_a_workspace_fail");
    let workspace = WiWorkspace::new();
    let run = run_wi(&workspace, ["list", "--json"], "list_uninitialized");
    assert_eq!(run.status.code(), Some(2));
    assert_eq!(error_json(&run.stderr)["error"]["code"], "NOT_INITIALIZED");
}

#[test]
fn e2e_create_list_show_update() {
    let _log = common::test_log("e2e_create_list_show_update");
    let workspace = WiWorkspace::initialized();

    let first = create_json(
        &workspace,
        &["Write the parser", "--priority", "high", "--description", "<p>tokens</p>"],
        "create_first",
    );
    assert_eq!(first["sequence_id"], 1);
    assert_eq!(first["priority"], "high");
    let second = create_json(&workspace, &["Write the printer"], "create_second");
    assert_eq!(second["sequence_id"], 2);

    let run = run_wi(&workspace, ["list", "--json"], "list");
    assert!(run.status.success(), "list failed: {}", run.stderr);
    let page = run.json();
    assert_eq!(page["total_count"], 2);
    assert_eq!(page["results"].as_array().map(Vec::len), Some(2));
    assert!(page["results"][0].get("description_html").is_none());

    let run = run_wi(
        &workspace,
        ["list", "-f", "priority=high", "--json"],
        "list_filtered",
    );
    assert_eq!(run.json()["total_count"], 1);

    let id = first["id"].as_str().expect("id").to_string();
    let run = run_wi(&workspace, ["show", &id, "--json"], "show");
    assert!(run.status.success(), "show failed: {}", run.stderr);
    let detail = run.json();
    assert_eq!(detail["description_html"], "<p>tokens</p>");
    assert!(detail.get("issue").is_none());
    assert!(detail["links"].is_array());

    let run = run_wi(
        &workspace,
        ["update", &id, "--patch", r#"{"priority": null}"#],
        "update",
    );
    assert!(run.status.success(), "update failed: {}", run.stderr);
    let run = run_wi(&workspace, ["show", &id, "--json"], "show_updated");
    assert_eq!(run.json()["priority"], "none");

    let run = run_wi(&workspace, ["show", &id], "show_plain");
    assert!(predicate::str::contains("Write the parser").eval(&run.stdout));
}

#[test]
fn e2e_grouped_list_uses_label_keys() {
    let _log = common::test_log("e2e_grouped_list_uses_label_keys");
    let workspace = WiWorkspace::initialized();
    let run = run_wi(&workspace, ["label", "add", "bug", "--json"], "label_add");
    assert!(run.status.success(), "label add failed: {}", run.stderr);
    let label = run.json()["id"].as_str().expect("label id").to_string();

    create_json(&workspace, &["Crash on start", "--label", &label], "create_bug");
    create_json(&workspace, &["Polish docs"], "create_plain");

    let run = run_wi(
        &workspace,
        ["list", "--group-by", "labels", "--json"],
        "list_grouped",
    );
    assert!(run.status.success(), "grouped list failed: {}", run.stderr);
    let page = run.json();
    assert_eq!(page["grouped_by"], "labels__id");
    assert_eq!(page["results"][label.as_str()]["total_results"], 1);
    assert_eq!(page["results"]["None"]["total_results"], 1);
}

#[test]
fn e2e_default_assignee_applies_to_new_issues() {
    let _log = common::test_log("e2e_default_assignee_applies_to_new_issues");
    let workspace = WiWorkspace::initialized();
    let teammate = uuid::Uuid::now_v7().to_string();
    let run = run_wi(&workspace, ["member", "add", &teammate], "member_add");
    assert!(run.status.success(), "member add failed: {}", run.stderr);

    let run = run_wi(
        &workspace,
        ["member", "default", &teammate, "--json"],
        "member_default",
    );
    assert!(run.status.success(), "member default failed: {}", run.stderr);
    assert_eq!(run.json()["default_assignee_id"], teammate.as_str());

    let issue = create_json(&workspace, &["Triage inbox"], "create_defaulted");
    assert_eq!(issue["assignee_ids"][0], teammate.as_str());

    let run = run_wi(&workspace, ["member", "default", "--json"], "member_default_clear");
    assert!(run.status.success(), "clearing failed: {}", run.stderr);
    assert!(run.json()["default_assignee_id"].is_null());
    let issue = create_json(&workspace, &["Unowned"], "create_unassigned");
    assert_eq!(issue["assignee_ids"].as_array().map(Vec::len), Some(0));
}

#[test]
fn e2e_bulk_delete_without_ids_is_a_validation_error() {
    let _log = common::test_log("e2e_bulk_delete_without_ids_is_a_validation_error");
    let workspace = WiWorkspace::initialized();
    let run = run_wi(&workspace, ["bulk-delete", "--json"], "bulk_delete_empty");
    assert_eq!(run.status.code(), Some(4));
    let error = error_json(&run.stderr);
    assert_eq!(error["error"]["code"], "VALIDATION_FAILED");
    assert_eq!(error["error"]["status"], 400);
}

#[test]
fn e2e_bulk_delete_removes_issues() {
    let _log = common::test_log("e2e_bulk_delete_removes_issues");
    let workspace = WiWorkspace::initialized();
    let a = create_json(&workspace, &["one"], "create_one");
    let b = create_json(&workspace, &["two"], "create_two");
    let ids = [a["id"].as_str().unwrap(), b["id"].as_str().unwrap()];

    let run = run_wi(
        &workspace,
        ["bulk-delete", ids[0], ids[1], "--json"],
        "bulk_delete",
    );
    assert!(run.status.success(), "bulk delete failed: {}", run.stderr);
    assert_eq!(run.json()["deleted_count"], 2);

    let run = run_wi(&workspace, ["list", "--json"], "list_after_delete");
    assert_eq!(run.json()["total_count"], 0);
}

#[test]
fn e2e_strangers_are_forbidden() {
    let _log = common::test_log("e2e_strangers_are_forbidden");
    let workspace = WiWorkspace::initialized();
    let stranger = uuid::Uuid::now_v7().to_string();
    let run = run_wi(
        &workspace,
        ["list", "--actor", &stranger, "--json"],
        "list_stranger",
    );
    assert_eq!(run.status.code(), Some(5));
    assert_eq!(error_json(&run.stderr)["error"]["code"], "FORBIDDEN");
}

#[test]
fn e2e_bad_cursor_is_reported() {
    let _log = common::test_log("e2e_bad_cursor_is_reported");
    let workspace = WiWorkspace::initialized();
    let run = run_wi(
        &workspace,
        ["sync", "--cursor", "not-a-cursor!", "--json"],
        "sync_bad_cursor",
    );
    assert_eq!(run.status.code(), Some(4));
    assert_eq!(error_json(&run.stderr)["error"]["code"], "INVALID_CURSOR");
}

#[test]
fn e2e_props_round_trip() {
    let _log = common::test_log("e2e_props_round_trip");
    let workspace = WiWorkspace::initialized();
    let run = run_wi(&workspace, ["props", "get", "--json"], "props_get");
    assert!(run.status.success(), "props get failed: {}", run.stderr);
    assert_eq!(run.json()["display_filters"]["layout"], "list");

    let run = run_wi(
        &workspace,
        ["props", "set", r#"{"filters": {"priority": "urgent"}}"#, "--json"],
        "props_set",
    );
    assert!(run.status.success(), "props set failed: {}", run.stderr);
    assert_eq!(run.json()["filters"]["priority"], "urgent");
}

#[test]
fn e2e_completions_and_schema() {
    let _log = common::test_log("e2e_completions_and_schema");
    let workspace = WiWorkspace::new();
    let run = run_wi(&workspace, ["completions", "bash"], "completions");
    assert!(run.status.success());
    assert!(predicate::str::contains("_wi").eval(&run.stdout));

    let run = run_wi(&workspace, ["schema", "issue"], "schema");
    assert!(run.status.success());
    assert!(run.json()["properties"].get("sequence_id").is_some());
}
