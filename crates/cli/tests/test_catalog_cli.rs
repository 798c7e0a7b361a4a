//! End-to-end runs of the `catalog` binary against in-memory sources

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("local.json"),
        r#"[
            {"id": "l-1", "attributes": {"title": "local report", "kind": "draft"}},
            {"id": "l-2", "attributes": {"title": "local memo", "kind": "final"}}
        ]"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("alpha.json"),
        r#"[{"id": "a-1", "attributes": {"title": "alpha report"}}]"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("catalog.toml"),
        r#"
[framework]
id = "test-catalog"

[logging]
level = "error"
color_output = false

[[sources]]
id = "local"
role = "local"
items = "local.json"

[[sources]]
id = "alpha"
role = "federated"
items = "alpha.json"

[[sources]]
id = "beta"
role = "federated"
available = false
"#,
    )
    .unwrap();
    dir
}

fn catalog(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("catalog").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("CATALOG_ID")
        .env_remove("CATALOG_FANOUT")
        .arg("--config")
        .arg(dir.join("catalog.toml"));
    cmd
}

#[test]
fn test_enterprise_query_reports_dropped_source() {
    let dir = workspace();
    catalog(dir.path())
        .args(["query", "--enterprise", "--title", "report", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"l-1\""))
        .stdout(predicate::str::contains("\"a-1\""))
        .stdout(predicate::str::contains("\"l-2\"").not())
        .stdout(predicate::str::contains("beta"));
}

#[test]
fn test_source_info_lists_enterprise() {
    let dir = workspace();
    catalog(dir.path())
        .args(["source-info", "--enterprise"])
        .assert()
        .success()
        .stdout(predicate::str::contains("test-catalog"))
        .stdout(predicate::str::contains("alpha"))
        .stdout(predicate::str::contains("unavailable"));
}

#[test]
fn test_delete_where_requires_a_filter_or_all() {
    let dir = workspace();
    catalog(dir.path()).args(["delete-where"]).assert().failure();

    catalog(dir.path())
        .args(["delete-where", "--where", "kind=draft", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"matched\": 1"));
}

#[test]
fn test_ingest_attached_file_to_local_index_without_content_store_fails() {
    let dir = workspace();
    let attachment = dir.path().join("notes.txt");
    std::fs::write(&attachment, "hello").unwrap();

    catalog(dir.path())
        .args(["ingest", "--attach"])
        .arg(&attachment)
        .assert()
        .failure();
}

#[test]
fn test_ingest_items_file() {
    let dir = workspace();
    let items = dir.path().join("new.json");
    std::fs::write(&items, r#"[{"attributes": {"title": "fresh"}}]"#).unwrap();

    catalog(dir.path())
        .args(["ingest", "--items"])
        .arg(&items)
        .assert()
        .success()
        .stdout(predicate::str::contains("created 1 items"))
        .stdout(predicate::str::contains("fresh"));
}
