use std::process::Command;

use crate::common::{TestProject, assert_contains, assert_not_contains, init_test_logging};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_tether_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_tether_help_includes_description");

    let output = Command::new(env!("CARGO_BIN_EXE_tether"))
        .arg("--help")
        .output()
        .expect("Failed to run tether --help");

    assert!(output.status.success(), "tether --help failed");
    let stdout = stdout(&output);
    assert_contains(&stdout, "tunnel session supervisor");
    for command in ["install", "run", "verify", "release", "config"] {
        assert_contains(&stdout, command);
    }
    crate::test_log!("TEST PASS: test_tether_help_includes_description");
}

#[test]
fn test_verify_local_only_runs_every_check() {
    init_test_logging();
    crate::test_log!("TEST START: test_verify_local_only_runs_every_check");

    let project = TestProject::new();
    let output = project.tether(&["verify", "--local-only"]);

    assert!(!output.status.success(), "verify passed in an empty project");
    let stdout = stdout(&output);
    // The first check fails; everything after it is still reported.
    assert_contains(&stdout, "virtual environment");
    assert_contains(&stdout, "configuration file complete");
    assert_contains(&stdout, "application entry point");
    assert_contains(&stdout, "python module numpy");
    assert_contains(&stdout, "audio input device");
    assert_contains(&stdout, "checks passed");
    assert_not_contains(&stdout, "ssh authentication");
    crate::test_log!("TEST PASS: test_verify_local_only_runs_every_check");
}

#[test]
fn test_verify_json_scorecard() {
    init_test_logging();
    crate::test_log!("TEST START: test_verify_json_scorecard");

    let project = TestProject::new();
    let output = project.tether(&["verify", "--local-only", "--json"]);
    assert_eq!(output.status.code(), Some(1));

    let card: serde_json::Value = serde_json::from_slice(&output.stdout).expect("scorecard is JSON");
    let results = card["results"].as_array().expect("results array");
    assert_eq!(card["total"].as_u64(), Some(results.len() as u64));
    assert_eq!(results[0]["name"], "virtual environment");
    assert_eq!(results[0]["outcome"], "fail");
    assert!(card["failed"].as_u64().unwrap() >= 3);
    crate::test_log!("TEST PASS: test_verify_json_scorecard");
}

#[test]
fn test_run_without_venv_fails_with_remediation() {
    init_test_logging();
    crate::test_log!("TEST START: test_run_without_venv_fails_with_remediation");

    let project = TestProject::new();
    let output = project.tether(&["run"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert_contains(&stderr, "virtual environment");
    assert_contains(&stderr, "TETHER-E010");
    assert_contains(&stderr, "Next steps:");
    assert!(!project.state_dir().exists(), "no tunnel state should be created");
    crate::test_log!("TEST PASS: test_run_without_venv_fails_with_remediation");
}

#[test]
fn test_release_without_record_is_noop() {
    init_test_logging();
    crate::test_log!("TEST START: test_release_without_record_is_noop");

    let project = TestProject::new();
    let first = project.tether(&["release"]);
    let second = project.tether(&["release", "--port", "21099"]);

    assert!(first.status.success());
    assert!(second.status.success());
    assert_contains(&stdout(&second), "No tunnel recorded for port 21099");
    crate::test_log!("TEST PASS: test_release_without_record_is_noop");
}

#[test]
fn test_config_show_reports_sources() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_show_reports_sources");

    let project = TestProject::new();
    let output = project.tether_with_env(&["config", "show"], &[("TETHER_REMOTE_PORT", "11500")]);

    assert!(output.status.success(), "config show failed: {}", stderr(&output));
    let stdout = stdout(&output);
    assert_contains(&stdout, "env:TETHER_REMOTE_PORT");
    assert_contains(&stdout, "remote_port = 11500");
    assert_contains(&stdout, "local_port = 21099");
    assert_contains(&stdout, "file:");
    crate::test_log!("TEST PASS: test_config_show_reports_sources");
}

#[test]
fn test_missing_config_file_is_reported() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_config_file_is_reported");

    let output = Command::new(env!("CARGO_BIN_EXE_tether"))
        .args(["--config", "/nonexistent/tether.toml", "config", "show"])
        .env_remove("TETHER_CONFIG")
        .output()
        .expect("Failed to run tether");

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stderr(&output), "TETHER-E001");
    crate::test_log!("TEST PASS: test_missing_config_file_is_reported");
}
