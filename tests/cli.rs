//! End-to-end tests for the ccgo-deps binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const DIAMOND: &str = r#"
[root]
requires = ["libb/1.0", "libc/1.0"]

[[recipe]]
ref = "liba/1.0"

[[recipe]]
ref = "liba/1.1"

[[recipe]]
ref = "libb/1.0"
requires = ["liba/[>=1.0 <2.0]"]

[[recipe]]
ref = "libc/1.0"
requires = ["liba/1.1"]
"#;

const CONFLICT: &str = r#"
[root]
requires = ["libb/1.0", "libc/1.0"]

[[recipe]]
ref = "liba/1.0"

[[recipe]]
ref = "liba/2.0"

[[recipe]]
ref = "libb/1.0"
requires = ["liba/1.0"]

[[recipe]]
ref = "libc/1.0"
requires = ["liba/2.0"]
"#;

fn deps_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ccgo-deps").unwrap();
    cmd.current_dir(dir);
    cmd.env("CCGO_DEPS_LOG", "error");
    cmd.arg("--no-color");
    cmd
}

fn project(content: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("deps.toml"), content).unwrap();
    dir
}

fn graph_json(dir: &Path, extra: &[&str]) -> Value {
    let output = deps_cmd(dir)
        .args(["graph", "--format", "json"])
        .args(extra)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "graph failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_graph_text() {
    let dir = project(DIAMOND);
    deps_cmd(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("virtual"))
        .stdout(predicate::str::contains("├── libb/1.0"))
        .stdout(predicate::str::contains("liba/1.1"))
        .stdout(predicate::str::contains("(already resolved)"))
        .stdout(predicate::str::contains("liba/1.0").not());
}

#[test]
fn test_graph_levels() {
    let dir = project(DIAMOND);
    deps_cmd(dir.path())
        .args(["graph", "--format", "levels"])
        .assert()
        .success()
        .stdout("0: liba/1.1\n1: libb/1.0, libc/1.0\n2: virtual\n");
}

#[test]
fn test_graph_explicit_config_path() {
    let dir = project(DIAMOND);
    let other = TempDir::new().unwrap();
    let config = dir.path().join("deps.toml");
    deps_cmd(other.path())
        .args(["graph", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("libc/1.0"));
}

#[test]
fn test_graph_conflict() {
    let dir = project(CONFLICT);
    deps_cmd(dir.path())
        .arg("graph")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Conflict in"))
        .stderr(predicate::str::contains("liba/2.0"))
        .stderr(predicate::str::contains("HINT:"));
}

#[test]
fn test_graph_conflict_allow_error() {
    let dir = project(CONFLICT);
    deps_cmd(dir.path())
        .args(["graph", "--allow-error"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("libb/1.0"))
        .stderr(predicate::str::contains("Conflict"));
}

#[test]
fn test_graph_missing_config() {
    let dir = TempDir::new().unwrap();
    deps_cmd(dir.path())
        .args(["graph", "-c", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn test_graph_invalid_config() {
    let dir = project("[root]\nrequires = [\"zlib\"]\n");
    deps_cmd(dir.path())
        .arg("graph")
        .assert()
        .failure()
        .stderr(predicate::str::contains("name/version"));
}

#[test]
fn test_lock_and_reproduce() {
    let dir = project(DIAMOND);
    deps_cmd(dir.path())
        .arg("lock")
        .assert()
        .success()
        .stderr(predicate::str::contains("deps.lock"));

    let lock: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("deps.lock")).unwrap()).unwrap();
    assert_eq!(lock["version"], "0.4");
    let nodes = lock["graph_lock"]["nodes"].as_object().unwrap();
    assert_eq!(nodes.len(), 4);
    assert!(nodes["0"].get("ref").is_none(), "virtual root has no ref");

    // A newer liba appears; the lockfile keeps the graph on 1.1
    let newer = DIAMOND.replace(
        "requires = [\"liba/1.1\"]",
        "requires = [\"liba/[>=1.0]\"]",
    ) + "\n[[recipe]]\nref = \"liba/1.5\"\n";
    fs::write(dir.path().join("deps.toml"), newer).unwrap();

    let live = graph_json(dir.path(), &[]);
    let live_liba = live["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["ref"].as_str().is_some_and(|r| r.starts_with("liba/")))
        .unwrap()
        .clone();
    assert_eq!(live_liba["ref"], "liba/1.5");

    let locked = graph_json(dir.path(), &["--lockfile", "deps.lock"]);
    let locked_liba = locked["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["ref"].as_str().is_some_and(|r| r.starts_with("liba/")))
        .unwrap()
        .clone();
    assert_eq!(locked_liba["ref"], "liba/1.1");
    assert_eq!(locked_liba["lock_status"], "locked");
}

#[test]
fn test_lock_custom_output() {
    let dir = project(DIAMOND);
    deps_cmd(dir.path())
        .args(["lock", "-o", "custom.lock"])
        .assert()
        .success();
    assert!(dir.path().join("custom.lock").is_file());
    assert!(!dir.path().join("deps.lock").exists());
}

#[test]
fn test_lock_refuses_conflicting_graph() {
    let dir = project(CONFLICT);
    deps_cmd(dir.path()).arg("lock").assert().failure();
    assert!(!dir.path().join("deps.lock").exists());
}

#[test]
fn test_lock_update_from() {
    let dir = project(DIAMOND);
    deps_cmd(dir.path()).arg("lock").assert().success();

    let base = fs::read_to_string(dir.path().join("deps.lock")).unwrap();
    let mut modified: Value = serde_json::from_str(&base).unwrap();
    let nodes = modified["graph_lock"]["nodes"].as_object_mut().unwrap();
    let liba_id = nodes
        .iter()
        .find(|(_, n)| n["ref"] == "liba/1.1")
        .map(|(id, _)| id.clone())
        .unwrap();
    nodes[&liba_id]["package_id"] = Value::from("pkg-123");
    nodes[&liba_id]["modified"] = Value::from(true);
    fs::write(
        dir.path().join("ci.lock"),
        serde_json::to_string_pretty(&modified).unwrap(),
    )
    .unwrap();

    deps_cmd(dir.path())
        .args(["lock", "--update-from", "ci.lock"])
        .assert()
        .success();

    let updated: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("deps.lock")).unwrap()).unwrap();
    assert_eq!(updated["graph_lock"]["nodes"][&liba_id]["package_id"], "pkg-123");
    assert_eq!(updated["graph_lock"]["nodes"][&liba_id]["modified"], true);
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    deps_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("graph"))
        .stdout(predicate::str::contains("lock"));
}
