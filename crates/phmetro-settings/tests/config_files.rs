//! Config file load/save through real files

use phmetro_core::{ConnectionConfig, ResponseFraming};
use phmetro_settings::{Config, SettingsError};
use tempfile::tempdir;

fn custom_config() -> Config {
    let mut config = Config::new();
    config.connection = ConnectionConfig::new()
        .with_auto_connect(true)
        .with_baud_rate(9600);
    config.exchange.timeout_ms = 1500;
    config.exchange.framing = ResponseFraming::FixedLength(6);
    config.polling.interval_ms = 250;
    config.monitor.detach_settle_ms = 500;
    config
}

#[test]
fn test_toml_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = custom_config();

    config.save_to_file(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("baud_rate = 9600"));

    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_json_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    let config = custom_config();

    config.save_to_file(&path).unwrap();
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let err = Config::new().save_to_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::Config(_)));
    assert!(!path.exists());
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[connection]\nauto_connect = false\nbaud_rate = 0\ndata_bits = 8\n",
    )
    .unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { .. }));
}

#[test]
fn test_malformed_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::JsonError(_))
    ));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::LoadError { .. })
    ));
}
