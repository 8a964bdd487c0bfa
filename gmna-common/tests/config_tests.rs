//! Unit tests for configuration loading and root folder resolution
//!
//! Uses serial_test: tests touching GMNA_ROOT_FOLDER run sequentially.

use gmna_common::config::{
    load_or_default, load_toml_config, CompiledDefaults, LoggingConfig,
    RootFolderInitializer, RootFolderResolver, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.log_file.is_none());
    assert!(defaults.root_folder.to_string_lossy().contains("gmna"));
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder = RootFolderResolver::new("test-module").resolve();

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_overrides_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/gmna-test-env-folder");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/gmna-from-toml")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module")
        .with_toml(&config)
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(root_folder, PathBuf::from("/tmp/gmna-test-env-folder"));
}

#[test]
#[serial]
fn test_resolver_cli_arg_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/gmna-test-env-folder");

    let root_folder = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/gmna-cli")))
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(root_folder, PathBuf::from("/tmp/gmna-cli"));
}

#[test]
#[serial]
fn test_resolver_uses_toml_when_no_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/gmna-from-toml")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module")
        .with_toml(&config)
        .resolve();

    assert_eq!(root_folder, PathBuf::from("/tmp/gmna-from-toml"));
}

#[test]
fn test_initializer_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("gmna");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert!(initializer.emergency_backup_dir().is_dir());
    assert_eq!(initializer.database_path(), root.join("gmna.db"));
}

#[test]
fn test_partial_toml_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gmna-ba.toml");
    std::fs::write(
        &path,
        r#"
openai_api_key = "sk-test"

[persistence]
max_attempts = 5

[openai]
model = "gpt-4o"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();

    assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.persistence.max_attempts, 5);
    assert_eq!(config.persistence.base_delay_ms, 2000);
    assert_eq!(config.persistence.emergency_cap, 10);
    assert_eq!(config.persistence.retention_days, 90);
    assert_eq!(config.openai.model, "gpt-4o");
    assert_eq!(config.openai.max_tokens, 1500);
    assert_eq!(config.batch.inter_item_delay_ms, 1000);
    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn test_missing_file_degrades_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let config = load_or_default(Some(&path)).unwrap();
    assert_eq!(config, TomlConfig::default());

    let config = load_or_default(None).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "openai_api_key = [unterminated").unwrap();

    let err = load_or_default(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Parse TOML failed"));
}
