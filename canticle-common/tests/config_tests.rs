//! Integration tests for bootstrap configuration loading and resolution
//!
//! Tests that manipulate CANTICLE_CONFIG are marked with #[serial] so they
//! never race each other.

use canticle_common::config::{
    resolve_config_path, write_toml_config, ConfigOverrides, ExtractorStrategy, TomlConfig,
    CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_partial_toml_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("canticle.toml");
    std::fs::write(
        &path,
        r#"
port = 6000

[extraction]
strategy = "reduced"

[batch]
workers = 2
"#,
    )
    .unwrap();

    let config = TomlConfig::load(&path).unwrap();

    assert_eq!(config.port, 6000);
    assert_eq!(config.extraction.strategy, ExtractorStrategy::Reduced);
    assert_eq!(config.extraction.sample_rate, 22050);
    assert_eq!(config.batch.workers, 2);
    assert_eq!(config.batch.max_items, 1000);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("does-not-exist.toml");

    let config = TomlConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config, TomlConfig::default());

    let config = TomlConfig::load_or_default(None).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(TomlConfig::load_or_default(Some(&path)).is_err());
}

#[test]
fn test_overrides_beat_file_values() {
    // Given: a file-derived config
    let mut config = TomlConfig {
        port: 6000,
        ..TomlConfig::default()
    };

    // When: command-line overrides are applied
    config.apply_overrides(ConfigOverrides {
        port: Some(7000),
        model_path: Some(PathBuf::from("/opt/model.json")),
        strategy: Some(ExtractorStrategy::Reduced),
        workers: Some(3),
        ..ConfigOverrides::default()
    });

    // Then: overrides win, untouched fields survive
    assert_eq!(config.port, 7000);
    assert_eq!(config.model.candidates(), vec![PathBuf::from("/opt/model.json")]);
    assert_eq!(config.extraction.strategy, ExtractorStrategy::Reduced);
    assert_eq!(config.batch.effective_workers(), 3);
    assert_eq!(config.bind_address, "127.0.0.1");
}

#[test]
fn test_write_then_load_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("canticle.toml");

    let mut config = TomlConfig::default();
    config.batch.item_timeout_secs = 5;
    config.extraction.strategy = ExtractorStrategy::Reduced;

    write_toml_config(&config, &path).unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());
    assert_eq!(TomlConfig::load(&path).unwrap(), config);
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")));
    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_path() {
    std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    std::env::set_var(CONFIG_ENV_VAR, "   ");

    let resolved = resolve_config_path(None);
    assert_ne!(resolved, Some(PathBuf::from("   ")));

    std::env::remove_var(CONFIG_ENV_VAR);
}
