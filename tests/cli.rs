mod util;

use assert_cmd::Command;
use clap::Parser;
use evdash::config::DashboardConfig;
use evdash::{Cli, Commands};
use predicates::str::contains;
use serial_test::serial;
use std::path::Path;
use tempfile::TempDir;
use util::sample_db;

fn base_cmd(temp_home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("evdash"));
    // Isolate config lookup and .env loading from the developer's machine.
    cmd.current_dir(temp_home);
    cmd.env("HOME", temp_home);
    cmd.env("XDG_CONFIG_HOME", temp_home.join(".config"));
    cmd.env_remove("EVDASH_DB");
    cmd.env_remove("EVDASH_ENV");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn help_lists_commands() {
    let tmp = TempDir::new().unwrap();
    base_cmd(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("overview"))
        .stdout(contains("device"))
        .stdout(contains("check-env"));
}

#[test]
fn check_env_accepts_letters() {
    let tmp = TempDir::new().unwrap();
    base_cmd(tmp.path())
        .args(["check-env", "prod"])
        .assert()
        .success()
        .stdout(contains("prod: ok"));
}

#[test]
fn check_env_rejects_digits_with_usage_code() {
    let tmp = TempDir::new().unwrap();
    base_cmd(tmp.path())
        .args(["check-env", "prod1"])
        .assert()
        .code(2)
        .stderr(contains("letters"));
}

#[test]
fn json_errors_are_structured() {
    let tmp = TempDir::new().unwrap();
    base_cmd(tmp.path())
        .args(["check-env", "prod env", "--json"])
        .assert()
        .code(2)
        .stderr(contains("\"kind\":\"validation\""))
        .stderr(contains("\"retryable\":false"));
}

#[test]
fn overview_without_database_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();
    base_cmd(tmp.path())
        .arg("overview")
        .assert()
        .code(2)
        .stderr(contains("no events database configured"));
}

#[test]
fn overview_json_against_seeded_db() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    let output = base_cmd(tmp.path())
        .args(["overview", "--json", "--db"])
        .arg(db.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let json = stdout_json(&output);
    assert_eq!(json["totals"]["rows"].as_array().unwrap().len(), 4);
    assert_eq!(json["devices"]["rows"].as_array().unwrap().len(), 3);
    assert_eq!(json["devices"]["rows"][0]["device_name"], "Pixel");
    assert_eq!(json["sessions"]["metrics"]["longest"], 20);
}

#[test]
fn overview_table_output() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    base_cmd(tmp.path())
        .arg("overview")
        .env("EVDASH_DB", db.path())
        .assert()
        .success()
        .stdout(contains("Total events"))
        .stdout(contains("Events by device"))
        .stdout(contains("tokB"));
}

#[test]
fn device_by_token() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    let output = base_cmd(tmp.path())
        .args(["device", "--token", "tokB", "--json", "--db"])
        .arg(db.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let json = stdout_json(&output);
    assert_eq!(json["device_name"], "iPad");
    assert_eq!(json["row"], 1);
    assert_eq!(json["latest_timestamps"]["rows"].as_array().unwrap().len(), 3);
}

#[test]
fn device_row_out_of_range() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    base_cmd(tmp.path())
        .args(["device", "--row", "9", "--db"])
        .arg(db.path())
        .assert()
        .code(2)
        .stderr(contains("out of range"));
}

#[test]
fn device_unknown_token_is_a_selection_error() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    base_cmd(tmp.path())
        .args(["device", "--token", "tokZ", "--json", "--db"])
        .arg(db.path())
        .assert()
        .code(2)
        .stderr(contains("\"kind\":\"selection\""))
        .stderr(contains("tokZ"));
}

#[test]
fn other_environment_sees_only_its_rows() {
    let tmp = TempDir::new().unwrap();
    let db = sample_db();
    let output = base_cmd(tmp.path())
        .args(["overview", "--json", "--env", "prod", "--db"])
        .arg(db.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["totals"]["rows"].as_array().unwrap().len(), 1);
    assert_eq!(json["devices"]["rows"].as_array().unwrap().len(), 1);
}

#[test]
fn broken_database_exits_with_batch_failure() {
    let tmp = TempDir::new().unwrap();
    let db = util::EventsDb::create(&[]);
    {
        let conn = rusqlite::Connection::open(db.path()).unwrap();
        conn.execute_batch("DROP TABLE account_events;").unwrap();
    }
    base_cmd(tmp.path())
        .args(["overview", "--json", "--db"])
        .arg(db.path())
        .assert()
        .code(3)
        .stderr(contains("\"kind\":\"batch_failure\""));
}

#[test]
fn config_file_and_flag_precedence() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join(".config").join("evdash").join("config.toml");
    DashboardConfig {
        environment: "staging".into(),
        lookback_months: 2,
        ..Default::default()
    }
    .save_to(&config_path)
    .unwrap();

    let output = base_cmd(tmp.path())
        .args(["config", "--json"])
        .output()
        .unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["environment"], "staging");
    assert_eq!(json["lookback_months"], 2);
    assert_eq!(json["path"], config_path.display().to_string());

    let output = base_cmd(tmp.path())
        .args(["config", "--json"])
        .env("EVDASH_ENV", "prod")
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["environment"], "prod");

    let output = base_cmd(tmp.path())
        .args(["config", "--json", "--env", "qa"])
        .env("EVDASH_ENV", "prod")
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["environment"], "qa");
}

#[test]
fn cli_parses_device_row() {
    let cli = Cli::try_parse_from(["evdash", "device", "--row", "2"]).expect("parse device");
    match cli.command {
        Commands::Device { row, token } => {
            assert_eq!(row, Some(2));
            assert!(token.is_none());
        }
        other => panic!("expected device command, got {other:?}"),
    }
}

#[test]
#[serial]
fn config_path_honors_xdg_config_home() {
    let tmp = TempDir::new().unwrap();
    let prev = std::env::var("XDG_CONFIG_HOME").ok();
    unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

    let path = DashboardConfig::config_path().unwrap();

    match prev {
        Some(v) => unsafe { std::env::set_var("XDG_CONFIG_HOME", v) },
        None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
    }
    assert_eq!(path, tmp.path().join("evdash").join("config.toml"));
}
