// ABOUTME: Integration tests for the rollout CLI commands.
// ABOUTME: Runs the binary against temporary project directories with real shell steps.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn rollout_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rollout"));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

/// A directory with a config and one project whose single step runs `script`.
fn workspace(script: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("rollout.yml"),
        "projects_file: projects.yml\npipeline:\n  max_attempts: 1\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("projects.yml"),
        format!(
            r#"projects:
  - slug: site
    name: Site
    work_dir: "{{cwd}}"
    steps:
      - id: build
        name: Build
        command: sh
        args: ["-c", {script:?}]
"#
        ),
    )
    .unwrap();
    dir
}

#[test]
fn help_shows_commands() {
    let dir = tempfile::tempdir().unwrap();
    rollout_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn init_creates_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("rollout.yml");

    rollout_cmd(dir.path()).arg("init").assert().success();

    assert!(config_path.exists(), "rollout.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("pipeline:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("rollout.yml"), "existing: config").unwrap();

    rollout_cmd(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn seeded_projects_can_be_listed() {
    let dir = tempfile::tempdir().unwrap();

    rollout_cmd(dir.path())
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No projects"));

    rollout_cmd(dir.path())
        .args(["projects", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded backend, frontend"));
    assert!(dir.path().join(".rollout/projects.yml").exists());

    rollout_cmd(dir.path())
        .args(["projects", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backend"))
        .stdout(predicate::str::contains("frontend"));

    rollout_cmd(dir.path())
        .args(["projects", "steps", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. Pull latest changes (git_pull)"))
        .stdout(predicate::str::contains("[restart]"));
}

#[test]
fn deploying_an_unknown_project_fails() {
    let dir = workspace("true");
    rollout_cmd(dir.path())
        .args(["deploy", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project not found: ghost"));
}

#[test]
fn invalid_slug_is_rejected_by_the_parser() {
    let dir = workspace("true");
    rollout_cmd(dir.path())
        .args(["deploy", "Not A Slug"])
        .assert()
        .failure();
}

#[test]
fn status_without_deployments() {
    let dir = workspace("true");
    rollout_cmd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Current: none"))
        .stdout(predicate::str::contains("Last: none"));
}

#[test]
fn successful_deployment_streams_output() {
    let dir = workspace("echo hello-from-step");

    rollout_cmd(dir.path())
        .args(["deploy", "site", "--triggered-by", "ci"])
        .assert()
        .success()
        .stdout(predicate::str::contains("→ build"))
        .stdout(predicate::str::contains("hello-from-step"))
        .stdout(predicate::str::contains("✓ build"))
        .stdout(predicate::str::contains("success"));

    let output = rollout_cmd(dir.path())
        .args(["status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["last"]["status"], "success");
    assert_eq!(status["last"]["project"], "site");
    assert_eq!(status["last"]["triggeredBy"], "ci");
    assert_eq!(
        status["last"]["completedSteps"]["build"]["output"],
        "hello-from-step\n"
    );
}

#[test]
fn failing_deployment_exits_nonzero() {
    let dir = workspace("echo broken >&2; exit 4");

    rollout_cmd(dir.path())
        .args(["deploy", "site"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken"))
        .stderr(predicate::str::contains("step build failed"))
        .stderr(predicate::str::contains("exited with code 4"));

    rollout_cmd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Last: Deployment"))
        .stdout(predicate::str::contains("failed"));
}

#[test]
fn json_format_emits_event_lines() {
    let dir = workspace("echo done");

    let output = rollout_cmd(dir.path())
        .args(["--format", "json", "deploy", "site"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let types: Vec<String> = stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|json| json["type"].as_str().map(str::to_string))
        .collect();
    assert_eq!(
        types,
        vec![
            "step_start",
            "step_output",
            "step_complete",
            "deployment_complete"
        ]
    );
}

#[test]
fn branch_filter_blocks_other_branches() {
    let dir = tempfile::tempdir().unwrap();
    rollout_cmd(dir.path()).args(["projects", "seed"]).assert().success();

    rollout_cmd(dir.path())
        .args(["deploy", "backend", "--branch", "develop"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("develop"));
}

#[test]
fn control_commands_with_nothing_to_do() {
    let dir = workspace("true");

    rollout_cmd(dir.path())
        .arg("cancel")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no deployment is running"));

    rollout_cmd(dir.path())
        .arg("resume")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to resume"));

    rollout_cmd(dir.path()).arg("retry").assert().failure();
}

#[test]
fn retry_reruns_a_fixed_step() {
    let dir = workspace("test -f ready");
    rollout_cmd(dir.path())
        .args(["deploy", "site"])
        .assert()
        .failure();

    fs::write(dir.path().join("ready"), "").unwrap();
    rollout_cmd(dir.path())
        .arg("retry")
        .assert()
        .success()
        .stdout(predicate::str::contains("Retrying build of site"));
}
