use std::path::PathBuf;
use std::time::Duration;

use garaged::Config;
use garaged::LogLevel;

fn example_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../garaged.example.toml")
}

#[test]
fn test_example_config_loads() {
    let (config, warnings) = Config::from_files(&[example_config()]).unwrap();
    assert!(warnings.is_empty());

    assert_eq!(config.logging.level, LogLevel::Info);
    assert_eq!(
        config.logging.overrides.get("garaged::engine"),
        Some(&LogLevel::Debug)
    );
    assert_eq!(config.engine.discovery_timeout, Duration::from_secs(5));
    assert_eq!(config.api.port, 8565);

    let ids: Vec<String> = config.garage_ids().iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, vec!["main_garage", "shed"]);
    assert_eq!(config.garages[1].toggle_entity, "light.shed_relay");
    assert_eq!(config.garages[1].opening_duration, Duration::from_secs(35));
}

#[test]
fn test_missing_file_is_a_load_error() {
    let result = Config::from_files(&[PathBuf::from("/nonexistent/garaged.toml")]);
    assert!(matches!(result, Err(garaged::ConfigError::Load(_))));
}
