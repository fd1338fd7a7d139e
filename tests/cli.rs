// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagegate contributors

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

const PIPELINE: &str = r#"
name: demo
stages:
  - name: data
    action:
      type: shell
      command: printf 'a,b\n' > "$STAGEGATE_OUTPUT_DIR/featured.csv"
    produces: [featured.csv]
  - name: training
    action:
      type: shell
      command: tr a-z A-Z < "$STAGEGATE_INPUT_DIR/featured.csv" > "$STAGEGATE_OUTPUT_DIR/model.bin"
    depends_on: [data]
    requires: [featured.csv]
    produces: [model.bin]
"#;

const FAILING_PIPELINE: &str = r#"
name: broken
stages:
  - name: training
    action:
      type: shell
      command: exit 4
  - name: build
    action:
      type: shell
      command: "true"
    depends_on: [training]
"#;

fn project(pipeline: &str) -> TempDir {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join(".stagegate.yaml"), pipeline).unwrap();
    temp
}

fn stagegate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stagegate").expect("binary present");
    cmd.current_dir(dir.path())
        .env_remove("STAGEGATE_EVENT")
        .env_remove("STAGEGATE_REF")
        .env_remove("STAGEGATE_COMMIT")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn validate_accepts_pipeline() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid"));
}

#[test]
fn validate_rejects_cycle() {
    let dir = project(
        r#"
name: cyclic
stages:
  - name: a
    action: { type: shell, command: "true" }
    depends_on: [b]
  - name: b
    action: { type: shell, command: "true" }
    depends_on: [a]
"#,
    );

    stagegate(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Circular dependency"));
}

#[test]
fn graph_prints_levels() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .args(["graph", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Level 1:"))
        .stdout(predicate::str::contains("Level 2:"));
}

#[test]
fn version_resolves_tag_push() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .args(["version", "--event", "tag", "--ref", "refs/tags/v1.2.3"])
        .assert()
        .success()
        .stdout("v1.2.3\nlatest\n");
}

#[test]
fn version_rejects_bad_tag() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .args(["version", "--event", "tag", "--ref", "nightly"])
        .assert()
        .failure();
}

#[test]
fn run_publishes_and_exports_artifacts() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .args([
            "run",
            "--event",
            "branch",
            "--ref",
            "main",
            "--commit",
            "a1b2c3d4e5f6",
            "--report",
            "out/report.json",
            "--artifacts-dir",
            "out/artifacts",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("main-a1b2c3d4"));

    let model = std::fs::read_to_string(dir.path().join("out/artifacts/model.bin")).unwrap();
    assert_eq!(model, "A,B\n");

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(report["state"], "succeeded");
    assert_eq!(report["version"]["primary"], "main-a1b2c3d4");
    assert!(!dir.path().join(".stagegate").exists());
}

#[test]
fn run_exits_non_zero_on_failure() {
    let dir = project(FAILING_PIPELINE);

    stagegate(&dir)
        .args(["run", "--commit", "a1b2c3d4e5f6", "--report", "report.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("exited with code 4"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["state"], "failed");
    assert_eq!(report["stages"][1]["outcome"]["status"], "skipped");
    assert_eq!(report["stages"][1]["outcome"]["cause"], "dependency outcome");
}

#[test]
fn dry_run_executes_nothing() {
    let dir = project(PIPELINE);

    stagegate(&dir)
        .args(["run", "--dry-run", "--commit", "a1b2c3d4e5f6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(dry run)"));

    assert!(!dir.path().join(".stagegate/work").exists());
}

#[test]
fn init_writes_template() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("stagegate").expect("binary present");
    cmd.current_dir(dir.path())
        .args(["init", "demo", "--template", "ml-delivery"])
        .assert()
        .success();

    let written = std::fs::read_to_string(dir.path().join(".stagegate.yaml")).unwrap();
    assert!(written.contains("frontend-build"));

    let mut again = Command::cargo_bin("stagegate").expect("binary present");
    again
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure();
}
