//! Integration tests for `burrow workspace`.

mod common;

use common::{parse_json, TestEnv};
use predicates::prelude::*;
use std::path::PathBuf;

fn create(env: &TestEnv, name: &str) -> serde_json::Value {
    let output = env
        .burrow()
        .args(["workspace", "create", name])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "create failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    parse_json(&output.stdout)
}

#[test]
fn test_create_and_list_workspace() {
    let env = TestEnv::with_git();
    let created = create(&env, "feature/login");

    let workspace = &created["workspace"];
    assert_eq!(workspace["name"], "feature/login");
    assert_eq!(workspace["branch"], "feature/login");
    assert_eq!(workspace["metadata"]["base"], "main");
    let path = PathBuf::from(workspace["path"].as_str().unwrap());
    assert!(path.starts_with(env.data_path().join("workspaces")));
    assert!(path.ends_with("feature/login"));
    assert!(path.join("README.md").is_file());

    let output = env.burrow().args(["workspace", "list"]).output().unwrap();
    let list = parse_json(&output.stdout);
    assert_eq!(list["count"], 1);
    assert_eq!(list["workspaces"][0]["name"], "feature/login");
    assert_eq!(list["workspaces"][0]["metadata"]["base"], "main");
    assert_eq!(list["projectId"], workspace["projectId"]);
}

#[test]
fn test_list_skips_primary_checkout() {
    let env = TestEnv::with_git();
    env.burrow()
        .args(["-H", "workspace", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces."));
}

#[test]
fn test_create_from_other_base() {
    let env = TestEnv::with_git();
    env.git(&["branch", "develop"]);

    let output = env
        .burrow()
        .args(["workspace", "create", "fix", "--base", "develop"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(parse_json(&output.stdout)["workspace"]["metadata"]["base"], "develop");
}

#[test]
fn test_create_rejects_invalid_name() {
    let env = TestEnv::with_git();
    env.burrow()
        .args(["workspace", "create", "bad name"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("INVALID_NAME"));
}

#[test]
fn test_create_duplicate_fails() {
    let env = TestEnv::with_git();
    create(&env, "dup");
    env.burrow()
        .args(["workspace", "create", "dup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ALREADY_EXISTS"));
}

#[test]
fn test_create_from_missing_base_fails() {
    let env = TestEnv::with_git();
    env.burrow()
        .args(["workspace", "create", "x", "--base", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NOT_FOUND"));
}

#[test]
fn test_remove_workspace_deletes_branch() {
    let env = TestEnv::with_git();
    let created = create(&env, "temp");
    let path = PathBuf::from(created["workspace"]["path"].as_str().unwrap());

    env.burrow()
        .args(["workspace", "remove", "temp"])
        .assert()
        .success();

    assert!(!path.exists());
    assert!(env.git(&["branch", "--list", "temp"]).is_empty());
    env.burrow()
        .args(["workspace", "remove", "temp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NOT_FOUND"));
}

#[test]
fn test_metadata_set_get_unset() {
    let env = TestEnv::with_git();
    let created = create(&env, "meta");
    let path = PathBuf::from(created["workspace"]["path"].as_str().unwrap());

    env.burrow()
        .current_dir(&path)
        .args(["workspace", "meta", "set", "pr-url", "https://example.com/pr/1"])
        .assert()
        .success();

    let output = env
        .burrow()
        .current_dir(&path)
        .args(["workspace", "meta", "get"])
        .output()
        .unwrap();
    let meta = parse_json(&output.stdout);
    assert_eq!(meta["metadata"]["base"], "main");
    assert_eq!(meta["metadata"]["pr-url"], "https://example.com/pr/1");

    env.burrow()
        .args(["workspace", "meta", "set", "pr-url", "--unset", "--path"])
        .arg(&path)
        .assert()
        .success();

    let output = env
        .burrow()
        .args(["workspace", "meta", "get"])
        .arg(&path)
        .output()
        .unwrap();
    let meta = parse_json(&output.stdout);
    assert!(meta["metadata"].get("pr-url").is_none());
}

#[test]
fn test_metadata_rejects_invalid_key() {
    let env = TestEnv::with_git();
    let created = create(&env, "keys");
    let path = PathBuf::from(created["workspace"]["path"].as_str().unwrap());

    env.burrow()
        .current_dir(&path)
        .args(["workspace", "meta", "set", "bad_key", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("INVALID_METADATA_KEY"));
}

#[test]
fn test_workspace_commands_from_linked_worktree_target_main_repo() {
    let env = TestEnv::with_git();
    let created = create(&env, "first");
    let path = PathBuf::from(created["workspace"]["path"].as_str().unwrap());

    let output = env
        .burrow()
        .current_dir(&path)
        .args(["workspace", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(parse_json(&output.stdout)["count"], 1);
}
