use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn cloudsaver_cmd(root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cloudsaver"));
    cmd.arg("--root").arg(root).env("RUST_LOG", "warn");
    cmd
}

/// `<tmp>/cloudsaver` as root, with the default `../saves` native directory.
fn install() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("cloudsaver");
    fs::create_dir_all(&root).expect("root");
    fs::create_dir_all(tmp.path().join("saves")).expect("native");
    (tmp, root)
}

fn status_json(root: &Path) -> Value {
    let output = cloudsaver_cmd(root)
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success(), "status failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("status json")
}

#[test]
fn status_on_fresh_install_is_idle_and_empty() {
    let (_tmp, root) = install();
    let report = status_json(&root);
    assert_eq!(report["session_active"], Value::Bool(false));
    assert_eq!(report["sets"].as_array().map(Vec::len), Some(0));
}

#[test]
fn status_lists_sets_without_touching_dangling_fragments() {
    let (tmp, root) = install();
    let native = tmp.path().join("saves");
    fs::write(native.join("base.firstof.2.zip"), vec![0u8; 10]).unwrap();
    fs::write(native.join("base.partidx.2.zip"), vec![0u8; 5]).unwrap();
    fs::write(native.join("broken.firstof.3.zip"), b"x").unwrap();
    fs::write(native.join("odd.firstof.x.zip"), b"x").unwrap();

    let report = status_json(&root);
    let sets = report["sets"].as_array().unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0]["name"], "base");
    assert_eq!(sets[0]["fragments"], 2);
    assert_eq!(sets[0]["total_size"], 15);
    assert_eq!(report["dangling"][0]["name"], "broken");
    assert_eq!(report["rejected"].as_array().map(Vec::len), Some(1));

    assert!(native.join("broken.firstof.3.zip").exists());
    assert!(native.join("odd.firstof.x.zip").exists());
}

#[test]
fn status_reports_unfinished_session() {
    let (_tmp, root) = install();
    fs::create_dir_all(root.join("fragments")).unwrap();
    fs::write(root.join("fragments").join("w.zip"), b"fragment").unwrap();

    let report = status_json(&root);
    assert_eq!(report["session_active"], Value::Bool(true));
    assert_eq!(report["sets"][0]["name"], "w");

    cloudsaver_cmd(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("SESSION ACTIVE"));
}

#[test]
fn invalid_settings_are_reported() {
    let (_tmp, root) = install();
    fs::write(
        root.join("cloudsaver.yaml"),
        "max_fragment_bytes: 1000\nquantum_bytes: 300\n",
    )
    .unwrap();

    cloudsaver_cmd(&root)
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("failed to load settings"));
}

#[test]
fn unreadable_journal_still_counts_as_active_session() {
    let (_tmp, root) = install();
    fs::write(root.join("redirect.json"), b"{}").unwrap();

    let report = status_json(&root);
    assert_eq!(report["session_active"], Value::Bool(true));
    assert_eq!(report["journal_phase"], Value::Null);
}
