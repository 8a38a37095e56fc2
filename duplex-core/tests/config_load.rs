//! Config file loading and validation.

use std::fs;

use duplex_core::{
    config::{self, SyncConfig},
    ConfigError, EscalationPolicy, MergeStrategy,
};
use tempfile::TempDir;

fn write_config(home: &TempDir, yaml: &str) {
    let path = config::config_path_at(home.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, yaml).expect("write config");
}

#[test]
fn loads_every_field_from_yaml() {
    let home = TempDir::new().expect("home");
    write_config(
        &home,
        "strategy: three_way_merge\n\
         escalation: causal\n\
         auto_sync: true\n\
         auto_sync_interval_secs: 30\n\
         file_watch: true\n\
         max_retries: 5\n\
         retry_backoff_ms: 10\n\
         storage_root: state-root\n",
    );

    let config = config::load_at(home.path()).expect("load");
    assert_eq!(config.strategy, MergeStrategy::ThreeWayMerge);
    assert_eq!(config.escalation, EscalationPolicy::Causal);
    assert!(config.auto_sync);
    assert_eq!(config.auto_sync_interval().as_secs(), 30);
    assert!(config.file_watch);
    assert_eq!(config.max_retries, 5);
    assert_eq!(
        config.storage_root,
        Some(home.path().join(".duplex").join("state-root"))
    );
}

#[test]
fn partial_yaml_keeps_defaults() {
    let home = TempDir::new().expect("home");
    write_config(&home, "strategy: last_writer_wins\n");

    let config = config::load_at(home.path()).expect("load");
    assert_eq!(config.strategy, MergeStrategy::LastWriterWins);
    assert_eq!(config.max_retries, SyncConfig::default().max_retries);
    assert!(!config.auto_sync);
}

#[test]
fn unknown_strategy_is_a_parse_error_with_path() {
    let home = TempDir::new().expect("home");
    write_config(&home, "strategy: coin_flip\n");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn unknown_field_is_rejected() {
    let home = TempDir::new().expect("home");
    write_config(&home, "strategy: manual\nretries: 3\n");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn invalid_values_surface_as_validation_errors() {
    let home = TempDir::new().expect("home");
    write_config(&home, "auto_sync: true\nauto_sync_interval_secs: 0\n");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(
        matches!(err, ConfigError::Validation { field: "auto_sync_interval_secs", .. }),
        "got: {err}"
    );
}
