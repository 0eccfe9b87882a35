//! CLI end-to-end tests
//!
//! Tests for the reelcast command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the reelcast binary
#[allow(deprecated)]
fn reelcast_cmd() -> Command {
    Command::cargo_bin("reelcast").unwrap()
}

fn write_config(dir: &Path, video_dir: &Path) -> std::path::PathBuf {
    let path = dir.join("reelcast.toml");
    fs::write(
        &path,
        format!(
            "[server]\nlisten = \"127.0.0.1:0\"\n\n[library]\nvideo_dir = {:?}\n",
            video_dir.display().to_string()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    reelcast_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    reelcast_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("reelcast"));
}

#[test]
fn test_cli_serve_help() {
    reelcast_cmd()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Start the streaming server"))
        .stdout(predicate::str::contains("--listen"));
}

#[test]
fn test_cli_validate_defaults() {
    let temp = tempdir().unwrap();
    reelcast_cmd()
        .current_dir(temp.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("0.0.0.0:4221"));
}

#[test]
fn test_cli_validate_file() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), temp.path());
    reelcast_cmd()
        .arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:0"));
}

#[test]
fn test_cli_validate_rejects_bad_values() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("bad.toml");
    fs::write(&config, "[streaming]\nchunk_size = 0\n").unwrap();
    reelcast_cmd()
        .arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunk_size"));
}

#[test]
fn test_cli_list_videos() {
    let temp = tempdir().unwrap();
    let videos = temp.path().join("videos");
    fs::create_dir(&videos).unwrap();
    fs::write(videos.join("Big_Buck_Bunny.mp4"), b"0123456789").unwrap();
    fs::write(videos.join("readme.txt"), b"x").unwrap();
    let config = write_config(temp.path(), &videos);

    reelcast_cmd()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Big Buck Bunny"))
        .stdout(predicate::str::contains("1 videos"))
        .stdout(predicate::str::contains("readme").not());
}

#[test]
fn test_cli_list_json() {
    let temp = tempdir().unwrap();
    let videos = temp.path().join("videos");
    fs::create_dir(&videos).unwrap();
    fs::write(videos.join("clip.webm"), b"0123").unwrap();
    let config = write_config(temp.path(), &videos);

    let output = reelcast_cmd()
        .arg("--config")
        .arg(&config)
        .args(["list", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["name"], "clip.webm");
    assert_eq!(parsed[0]["size"], 4);
}

#[test]
fn test_cli_list_missing_directory_fails() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), &temp.path().join("missing"));
    reelcast_cmd()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .failure();
}
