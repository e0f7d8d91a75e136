use std::env;
use std::fs;

use serial_test::serial;
use soulbrowser_observe::{ObserveConfig, ObserveError};
use tempfile::TempDir;

const QUIET_VAR: &str = "SOULBROWSER_OBSERVE__SETTLE__QUIET_WINDOW_MS";
const SCROLLABLE_VAR: &str = "SOULBROWSER_OBSERVE__SNAPSHOT__DETECT_SCROLLABLE";

fn clear_env() {
    env::remove_var(QUIET_VAR);
    env::remove_var(SCROLLABLE_VAR);
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("observe.yaml");
    fs::write(&path, body).expect("write config");
    path
}

#[test]
#[serial]
fn file_values_override_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "log:\n  level: debug\nsettle:\n  default_timeout_ms: 10000\nsnapshot:\n  resolve_roles: false\n",
    );

    let config = ObserveConfig::load(Some(&path)).expect("config");

    assert_eq!(config.log.level, "debug");
    assert!(!config.log.json);
    assert_eq!(config.settle.default_timeout_ms, 10_000);
    assert_eq!(config.settle.quiet_window_ms, 500);
    assert_eq!(config.settle.stall_threshold_ms, 2_000);
    assert!(!config.snapshot.resolve_roles);
    assert!(config.snapshot.detect_scrollable);
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "settle:\n  quiet_window_ms: 800\n");
    env::set_var(QUIET_VAR, "250");
    env::set_var(SCROLLABLE_VAR, "false");

    let loaded = ObserveConfig::load(Some(&path));
    clear_env();
    let config = loaded.expect("config");

    assert_eq!(config.settle.quiet_window_ms, 250);
    assert!(!config.snapshot.detect_scrollable);
    assert_eq!(config.settle.sweep_interval_ms, 500);
}

#[test]
#[serial]
fn explicit_missing_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();

    let err = ObserveConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();

    assert!(matches!(err, ObserveError::Config(_)));
}

#[test]
#[serial]
fn malformed_values_are_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "settle:\n  quiet_window_ms: soon\n");

    assert!(matches!(
        ObserveConfig::load(Some(&path)),
        Err(ObserveError::Config(_))
    ));
}
