//! Config load/save round-trips against isolated temp directories.

use burdock::config::{Config, ExecuteConfig};
use std::fs;

#[tokio::test]
async fn missing_config_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(Some(dir.path())).await.unwrap();

    assert_eq!(config.config_path, dir.path().join("config.toml"));
    assert_eq!(config.session.protocol_version, "5.3");
    assert_eq!(config.execute, ExecuteConfig::default());
    assert!(
        !dir.path().join("config.toml").exists(),
        "loading must not create a config file"
    );
}

#[tokio::test]
async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::load(Some(dir.path())).await.unwrap();
    config.session.username = "analyst".into();
    config.execute.stop_on_error = false;
    config.streams.max_queue_depth = 32;
    config.connection.address = "10.0.0.7:9470".into();
    config.save().await.unwrap();

    let written = fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(written.contains("[session]"));
    assert!(written.contains("analyst"));

    let reloaded = Config::load(Some(dir.path())).await.unwrap();
    assert_eq!(reloaded.session.username, "analyst");
    assert!(!reloaded.execute.stop_on_error);
    assert_eq!(reloaded.streams.stream_capacity(), Some(32));
    assert_eq!(reloaded.connection.address, "10.0.0.7:9470");
}

#[tokio::test]
async fn save_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let mut config = Config::default();
    config.config_path = nested.join("config.toml");
    config.save().await.unwrap();

    assert!(nested.join("config.toml").exists());
    let leftovers = fs::read_dir(&nested)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
        .count();
    assert_eq!(leftovers, 0, "temporary files must be renamed away");
}

#[tokio::test]
async fn invalid_values_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[streams]\ninbound_buffer = 0\n",
    )
    .unwrap();
    let error = Config::load(Some(dir.path())).await.unwrap_err();
    assert!(format!("{error:#}").contains("inbound_buffer"));
}

#[tokio::test]
async fn unparseable_file_reports_context() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "[session\nusername = ").unwrap();
    let error = Config::load(Some(dir.path())).await.unwrap_err();
    assert!(error.to_string().contains("Failed to parse config file"));
}
