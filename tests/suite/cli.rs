//! End-to-end runs of the `shield` binary

use std::fs;

use serde_json::Value;

use crate::common::{STUDY_TOML, json_lines, shield, write_config};

#[test]
fn run_script_installs_and_ends_through_a_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), STUDY_TOML);
    let script = dir.path().join("script.jsonl");
    fs::write(
        &script,
        concat!(
            "{\"event\":\"startup\",\"reason\":\"ADDON_INSTALL\"}\n",
            "{\"message\":{\"shield\":true,\"msg\":\"info\"}}\n",
            "{\"message\":{\"shield\":true,\"msg\":\"endStudy\",\"data\":{\"reason\":\"expired\"}}}\n",
        ),
    )
    .unwrap();

    let output = shield(dir.path(), &config, &["run"], Some(&script));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports = json_lines(&output.stdout);
    // startup, info, endStudy, then the host's own shutdown + uninstall.
    assert_eq!(reports.len(), 5);
    assert_eq!(reports[0]["outcome"]["outcome"], "activated");
    assert_eq!(reports[1]["response"]["response"], "info");
    let ending = &reports[2]["response"]["body"];
    assert_eq!(ending["outcome"], "effected");
    let url = ending["url"].as_str().unwrap();
    assert!(url.starts_with("https://example.com/survey?reason=expired&study=button-color"));
    assert_eq!(reports[3]["outcome"]["outcome"], "released");
    assert_eq!(reports[4]["state"], "stopped");

    let telemetry = json_lines(&fs::read(dir.path().join("data").join("telemetry.jsonl")).unwrap());
    let events: Vec<&str> = telemetry
        .iter()
        .filter_map(|r| r["eventType"].as_str())
        .collect();
    assert_eq!(events, ["enter", "installed", "startup", "expired", "exit"]);
    assert!(telemetry.iter().all(|r| r["studyName"] == "button-color"));
}

#[test]
fn ending_left_by_a_manual_run_is_uninstalled_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), STUDY_TOML);
    let first_script = dir.path().join("first.jsonl");
    fs::write(
        &first_script,
        concat!(
            "{\"event\":\"startup\",\"reason\":\"ADDON_INSTALL\"}\n",
            "{\"end_study\":\"expired\"}\n",
        ),
    )
    .unwrap();
    let output = shield(dir.path(), &config, &["run", "--manual-uninstall"], Some(&first_script));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json_lines(&output.stdout).len(), 2);
    let state = dir.path().join("data").join("state.json");
    let persisted: Value = serde_json::from_slice(&fs::read(&state).unwrap()).unwrap();
    assert_eq!(persisted["ended"], "expired");

    let second_script = dir.path().join("second.jsonl");
    fs::write(&second_script, "{\"event\":\"startup\",\"reason\":\"APP_STARTUP\"}\n").unwrap();
    let output = shield(dir.path(), &config, &["run"], Some(&second_script));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports = json_lines(&output.stdout);
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0]["outcome"]["outcome"], "awaiting-uninstall");
    assert_eq!(reports[0]["outcome"]["reason"], "expired");
    assert_eq!(reports[1]["outcome"]["outcome"], "released");
    assert_eq!(reports[2]["state"], "stopped");
    assert!(!state.exists());

    let telemetry = json_lines(&fs::read(dir.path().join("data").join("telemetry.jsonl")).unwrap());
    let endings = telemetry
        .iter()
        .filter(|r| matches!(r["eventType"].as_str(), Some("expired" | "user-disable")))
        .count();
    assert_eq!(endings, 1);
}

#[test]
fn invalid_config_fails_before_any_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[study]\nname = \"broken\"\n\n[[study.variations]]\nname = \"a\"\nweight = -1\n",
    );
    let script = dir.path().join("script.jsonl");
    fs::write(&script, "{\"event\":\"startup\",\"reason\":\"ADDON_INSTALL\"}\n").unwrap();

    let output = shield(dir.path(), &config, &["run"], Some(&script));
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("weight"));
    assert!(output.stdout.is_empty());
    assert!(!dir.path().join("data").join("telemetry.jsonl").exists());
}

#[test]
fn variation_is_stable_for_a_client_id() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), STUDY_TOML);
    let args = ["variation", "--client-id", "client-1"];

    let first: Value = serde_json::from_slice(&shield(dir.path(), &config, &args, None).stdout).unwrap();
    let second: Value =
        serde_json::from_slice(&shield(dir.path(), &config, &args, None).stdout).unwrap();
    assert_eq!(first, second);
    assert_eq!(first["clientId"], "client-1");
    assert_eq!(first["forced"], false);
    assert!(matches!(first["variation"].as_str(), Some("control" | "treatment")));
}

#[test]
fn validate_prints_resolved_study() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), STUDY_TOML);
    let output = shield(dir.path(), &config, &["validate"], None);
    assert!(output.status.success());
    let resolved: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(resolved["study"], "button-color");
    assert_eq!(resolved["variations"].as_array().unwrap().len(), 2);
    assert_eq!(resolved["endings"], serde_json::json!(["expired"]));
}

#[cfg(unix)]
#[test]
fn failing_eligibility_command_ends_as_ineligible() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!("{STUDY_TOML}\n[eligibility]\ncommand = [\"sh\", \"-c\", \"exit 1\"]\n"),
    );
    let script = dir.path().join("script.jsonl");
    fs::write(&script, "{\"event\":\"install\",\"reason\":5}\n").unwrap();

    let output = shield(dir.path(), &config, &["run"], Some(&script));
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let reports = json_lines(&output.stdout);
    assert_eq!(reports[0]["outcome"]["outcome"], "ended");
    assert_eq!(reports[0]["outcome"]["reason"], "ineligible");
    assert!(reports[1..].iter().all(|r| r["outcome"]["outcome"] == "released"));
}
