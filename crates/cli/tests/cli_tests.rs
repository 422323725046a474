//! CLI integration tests

use mockito::Matcher;
use serde_json::json;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the CLI against `api_url` with an empty home directory
fn fleetopt(home: &TempDir, api_url: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetopt"))
        .env("HOME", home.path())
        .env("FLEETOPT_API_URL", api_url)
        .env("NO_COLOR", "1")
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = fleetopt(&home, "http://localhost:1", &["--help"]);

    let stdout = stdout(&output);
    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Fleet Optimizer"), "Should show app name");
    for command in ["status", "run-once", "set", "stats", "logs", "optimize", "cancel-restart"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    let output = fleetopt(&home, "http://localhost:1", &["--version"]);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout(&output).contains("fleetopt"), "Should show binary name");
}

#[test]
fn test_status_json_passthrough() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/optimizer/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "config": { "enabled": true, "memoryThreshold": 60 },
                "live_stats": {},
                "system": null,
                "last_global_restart_ts": 1700000000
            })
            .to_string(),
        )
        .create();

    let output = fleetopt(&home, &server.url(), &["--format", "json", "status"]);

    mock.assert();
    assert!(output.status.success());
    let printed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(printed["config"]["memoryThreshold"], 60);
    assert_eq!(printed["last_global_restart_ts"], 1700000000);
}

#[test]
fn test_stats_without_data_is_not_an_error() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/optimizer/instances/vm9/stats")
        .with_status(404)
        .with_body(r#"{"error":"no-stats"}"#)
        .create();

    let output = fleetopt(&home, &server.url(), &["stats", "vm9"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("No stats collected for vm9"));
}

#[test]
fn test_set_sends_parsed_value() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let global = server
        .mock("POST", "/optimizer/config")
        .match_body(Matcher::Json(json!({ "key": "guards", "value": { "cpu": false } })))
        .with_status(200)
        .with_body(r#"{"ok":true}"#)
        .create();
    let instance = server
        .mock("POST", "/optimizer/instances/vm1/config")
        .match_body(Matcher::Json(json!({ "key": "note", "value": "keep warm" })))
        .with_status(200)
        .with_body(r#"{"ok":true}"#)
        .create();

    let output = fleetopt(&home, &server.url(), &["set", "guards", r#"{"cpu":false}"#]);
    assert!(output.status.success());

    let output = fleetopt(
        &home,
        &server.url(),
        &["set", "note", "keep warm", "--instance", "vm1"],
    );
    assert!(output.status.success());

    global.assert();
    instance.assert();
}

#[test]
fn test_cancel_restart_reports_outcome() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/optimizer/instances/vm1/cancel-restart")
        .with_status(200)
        .with_body(r#"{"ok":true,"cancelled":false}"#)
        .create();

    let output = fleetopt(&home, &server.url(), &["cancel-restart", "vm1"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("No restart pending for vm1"));
}

#[test]
fn test_server_error_exits_non_zero() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/optimizer/config")
        .with_status(400)
        .with_body(r#"{"error":"invalid_config","message":"bad value"}"#)
        .create();

    let output = fleetopt(&home, &server.url(), &["set", "restartIntervalHours", "soon"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid_config"));
}

#[test]
fn test_api_url_from_config_file() {
    let home = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/optimizer/run-once")
        .with_status(200)
        .with_body(r#"{"ok":true,"events":[]}"#)
        .create();

    let config_dir = home.path().join(".config").join("fleetopt");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.json"),
        json!({ "api_url": server.url() }).to_string(),
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_fleetopt"))
        .env("HOME", home.path())
        .env_remove("FLEETOPT_API_URL")
        .env("NO_COLOR", "1")
        .arg("run-once")
        .output()
        .unwrap();

    mock.assert();
    assert!(output.status.success());
    assert!(stdout(&output).contains("No action taken"));
}
