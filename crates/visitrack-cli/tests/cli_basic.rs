//! Basic CLI E2E tests.
//!
//! Each test runs the binary against its own data directory.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (code, stdout, stderr).
fn run_cli(data_dir: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_visitrack-cli"))
        .args(args)
        .env("VISITRACK_DATA_DIR", data_dir)
        .env("VISITRACK_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn run_ok(data_dir: &Path, args: &[&str]) -> String {
    let (code, stdout, stderr) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

/// JSON document printed after a one-line header.
fn json_after_header(stdout: &str) -> serde_json::Value {
    let body = stdout.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    serde_json::from_str(body).expect("Failed to parse JSON output")
}

fn add_acme(dir: &Path) {
    run_ok(
        dir,
        &["client", "add", "acme", "Acme Traders", "--lat", "19.0760", "--lng", "72.8777"],
    );
}

#[test]
fn test_config_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "proximity.radius_m"]).trim(), "100.0");
    assert_eq!(run_ok(dir.path(), &["config", "get", "tracking.priority"]).trim(), "high_accuracy");
    assert!(dir.path().join("config.toml").exists());
}

#[test]
fn test_config_set_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["config", "set", "proximity.cooldown_secs", "120"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "proximity.cooldown_secs"]).trim(), "120");

    let listing = run_ok(dir.path(), &["config", "list"]);
    assert!(listing.contains("proximity.cooldown_secs = 120"));

    run_ok(dir.path(), &["config", "reset"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "proximity.cooldown_secs"]).trim(), "300");
}

#[test]
fn test_config_rejects_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), &["config", "set", "proximity.nope", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_client_add_and_nearest() {
    let dir = tempfile::tempdir().unwrap();
    add_acme(dir.path());
    run_ok(
        dir.path(),
        &["client", "add", "zenith", "Zenith Labs", "--lat", "19.0860", "--lng", "72.8777"],
    );

    let clients: serde_json::Value =
        serde_json::from_str(&run_ok(dir.path(), &["client", "list"])).unwrap();
    assert_eq!(clients.as_array().unwrap().len(), 2);

    let out: serde_json::Value = serde_json::from_str(&run_ok(
        dir.path(),
        &["client", "nearest", "--lat", "19.0761", "--lng", "72.8778"],
    ))
    .unwrap();
    assert_eq!(out["nearest"], "acme");
    assert_eq!(out["within_radius"], serde_json::json!(["acme"]));
}

#[test]
fn test_meeting_start_conflict_and_end() {
    let dir = tempfile::tempdir().unwrap();
    add_acme(dir.path());

    let started = json_after_header(&run_ok(dir.path(), &["meeting", "start", "acme"]));
    let id = started["id"].as_str().unwrap().to_string();
    assert_eq!(started["status"], "active");

    let (code, _, stderr) = run_cli(dir.path(), &["meeting", "start", "acme"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("already has an active meeting"));

    let ended = json_after_header(&run_ok(
        dir.path(),
        &["meeting", "end", &id, "--comment", "good visit", "--client-status", "customer"],
    ));
    assert_eq!(ended["status"], "completed");
    assert_eq!(ended["comments"], "good visit");

    let shown: serde_json::Value =
        serde_json::from_str(&run_ok(dir.path(), &["meeting", "show", &id])).unwrap();
    assert_eq!(shown["status"], "completed");

    let (code, _, stderr) = run_cli(dir.path(), &["meeting", "end", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("is completed, cannot end"));
}

#[test]
fn test_meeting_start_unknown_client() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), &["meeting", "start", "ghost"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("client not found"));
}

#[test]
fn test_track_replay_writes_log_and_events() {
    let dir = tempfile::tempdir().unwrap();
    add_acme(dir.path());
    run_ok(dir.path(), &["config", "set", "meeting.auto_start_on_proximity", "true"]);

    let path = dir.path().join("route.json");
    let points: Vec<serde_json::Value> = (0..6)
        .map(|_| serde_json::json!({"latitude": 19.0760, "longitude": 72.8777}))
        .collect();
    std::fs::write(&path, serde_json::to_string(&points).unwrap()).unwrap();

    let stdout = run_ok(
        dir.path(),
        &[
            "track",
            "replay",
            path.to_str().unwrap(),
            "--interval-ms",
            "300",
            "--save-interval-secs",
            "0",
            "--check-interval-secs",
            "1",
            "--user",
            "worker-7",
        ],
    );
    let kinds: Vec<String> = stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter_map(|v| v["type"].as_str().map(str::to_string))
        .collect();
    assert_eq!(kinds.first().map(String::as_str), Some("tracking_started"));
    assert!(kinds.iter().any(|k| k == "proximity_entered"));
    assert!(kinds.iter().any(|k| k == "meeting_started"));
    assert_eq!(kinds.last().map(String::as_str), Some("tracking_stopped"));

    let active: serde_json::Value = serde_json::from_str(&run_ok(
        dir.path(),
        &["meeting", "list", "--status", "active"],
    ))
    .unwrap();
    assert_eq!(active.as_array().unwrap().len(), 1);

    // one check at t=1s with a zero save interval
    let log: serde_json::Value = serde_json::from_str(&run_ok(
        dir.path(),
        &["log", "list", "--user", "worker-7"],
    ))
    .unwrap();
    assert_eq!(log.as_array().unwrap().len(), 1);
    assert_eq!(log[0]["user_id"], "worker-7");
}

#[test]
fn test_track_replay_rejects_oversized_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("route.json");
    let points = serde_json::json!([
        {"latitude": 19.0760, "longitude": 72.8777},
        {"latitude": 19.0761, "longitude": 72.8778}
    ]);
    std::fs::write(&path, points.to_string()).unwrap();

    let (code, _, stderr) = run_cli(
        dir.path(),
        &["track", "replay", path.to_str().unwrap(), "--interval-ms", &u64::MAX.to_string()],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("too long"));
}

#[test]
fn test_log_list_empty() {
    let dir = tempfile::tempdir().unwrap();
    let entries: serde_json::Value =
        serde_json::from_str(&run_ok(dir.path(), &["log", "list"])).unwrap();
    assert!(entries.as_array().unwrap().is_empty());
}
