use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn keysync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keysync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

/// A `file://` repository with one artifact per package.
fn make_repo(dir: &Path, packages: &[(&str, &str)]) -> String {
    fs::create_dir_all(dir).expect("repo dir");
    let mut entries = serde_json::Map::new();
    for (package, version) in packages {
        let artifact = format!("{package}.zhfst");
        fs::write(dir.join(&artifact), format!("{package} {version}")).expect("artifact");
        entries.insert(
            package.to_string(),
            serde_json::json!({ "version": version, "artifact": artifact }),
        );
    }
    fs::write(
        dir.join("index.json"),
        serde_json::json!({ "packages": entries }).to_string(),
    )
    .expect("index");
    format!("file://{}", dir.display())
}

fn init(home: &Path, repo: &str, packages: &[&str]) {
    let mut cmd = keysync_cmd(home);
    cmd.args(["init", "--repo", repo]);
    for package in packages {
        cmd.args(["--package", package]);
    }
    cmd.assert().success().stdout(contains("Saved to"));
}

fn status_json(home: &Path) -> serde_json::Value {
    let output = keysync_cmd(home)
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("status json")
}

#[test]
fn init_writes_config_file() {
    let home = TempDir::new().expect("home");
    let repo = make_repo(&home.path().join("repo"), &[("se-speller", "1.0.0")]);

    init(home.path(), &repo, &["se-speller", "se-speller"]);

    let yaml = fs::read_to_string(home.path().join(".keysync/config.yaml")).expect("config");
    assert!(yaml.contains("se-speller"));
    assert!(yaml.contains(&repo));
    assert_eq!(yaml.matches("- se-speller").count(), 1, "package enabled once");
}

#[test]
fn sync_installs_then_reports_up_to_date() {
    let home = TempDir::new().expect("home");
    let repo = make_repo(
        &home.path().join("repo"),
        &[("no-speller", "1.0.0"), ("se-speller", "2.1.0")],
    );
    init(home.path(), &repo, &["no-speller", "se-speller"]);

    let before = status_json(home.path());
    assert_eq!(before["packages"][0]["status"], "not_installed");

    keysync_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("downloading se-speller"))
        .stdout(contains("installed 2 package(s)"));

    let after = status_json(home.path());
    for row in after["packages"].as_array().expect("rows") {
        assert_eq!(row["status"], "up_to_date");
        assert_eq!(row["downloading"], false);
    }
    assert_eq!(after["packages"][1]["installed_version"], "2.1.0");

    keysync_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("all 2 package(s) up to date"));
}

#[test]
fn sync_failure_leaves_no_signal_file() {
    let home = TempDir::new().expect("home");
    let repo = make_repo(&home.path().join("repo"), &[("no-speller", "1.0.0")]);
    init(home.path(), &repo, &["se-speller"]);

    keysync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("download of se-speller failed"));

    let ipc = home.path().join(".keysync/ipc");
    let leftovers = fs::read_dir(&ipc).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn sync_without_config_points_at_init() {
    let home = TempDir::new().expect("home");

    keysync_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("keysync init"));
}

#[test]
fn signal_start_and_finish_manage_the_file() {
    let home = TempDir::new().expect("home");
    let signal = home.path().join(".keysync/ipc/download-se-speller");

    keysync_cmd(home.path())
        .args(["signal", "start", "se-speller"])
        .assert()
        .success();
    assert!(signal.exists());

    let status = keysync_cmd(home.path())
        .args(["signal", "finish", "se-speller"])
        .assert()
        .success();
    status.stdout(contains("se-speller"));
    assert!(!signal.exists());

    keysync_cmd(home.path())
        .args(["signal", "finish", "se-speller"])
        .assert()
        .success();
}

#[test]
fn status_marks_in_flight_downloads() {
    let home = TempDir::new().expect("home");
    let repo = make_repo(&home.path().join("repo"), &[("se-speller", "1.0.0")]);
    init(home.path(), &repo, &["se-speller"]);
    keysync_cmd(home.path())
        .args(["signal", "start", "se-speller"])
        .assert()
        .success();

    let json = status_json(home.path());
    assert_eq!(json["packages"][0]["downloading"], true);
    assert_eq!(json["in_flight"][0], "se-speller");
}
