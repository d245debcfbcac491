use serde::Deserialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::{
    format_diagnostics, Diagnostic, Error, LoadError, SourceInfo, ValidationError, Warning,
};
use super::partial::{PartialConfig, PartialGarage};
use crate::engine::DoorId;
use crate::engine::ToggleDomain;
#[cfg(feature = "integration_mqtt")]
use crate::integrations::mqtt::MqttConfig;

/// Default opening window in seconds
pub const DEFAULT_OPENING_DURATION: u64 = 35;

/// Default time to wait for entity discovery in seconds
pub const DEFAULT_DISCOVERY_TIMEOUT: u64 = 5;

pub const DEFAULT_API_LISTEN: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8565;

#[derive(Debug, Default, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub api: ApiConfig,
    pub integrations: IntegrationsConfig,
    pub garages: Vec<GarageConfig>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long to wait for integrations to report entities before doors
    /// are set up
    pub discovery_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_API_LISTEN.to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct IntegrationsConfig {
    #[cfg(feature = "integration_mqtt")]
    pub mqtt: Option<MqttConfig>,
}

/// A configured garage door.
#[derive(Debug, Clone, PartialEq)]
pub struct GarageConfig {
    /// Display name; the door id is derived from it
    pub name: String,
    pub open_sensor: String,
    pub closed_sensor: String,
    /// Switch or light whose toggle moves the door
    pub toggle_entity: String,
    pub opening_duration: Duration,
}

impl GarageConfig {
    pub fn id(&self) -> DoorId {
        DoorId::from_name(&self.name)
    }

    /// Every entity the door reads from or drives.
    pub fn entities(&self) -> [&str; 3] {
        [&self.open_sensor, &self.closed_sensor, &self.toggle_entity]
    }
}

/// Error returned when configuration cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Merge or validation errors, already rendered for display
    #[error("{rendered}")]
    Invalid {
        diagnostics: Vec<Diagnostic>,
        rendered: String,
    },
}

/// Entity ids look like `domain.object_id`, each part lowercase
/// alphanumerics and underscores.
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    let valid_part = |part: &str| {
        !part.is_empty()
            && !part.starts_with('_')
            && !part.ends_with('_')
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    match entity_id.split_once('.') {
        Some((domain, object_id)) => valid_part(domain) && valid_part(object_id),
        None => false,
    }
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// It supports:
    /// - Multiple config files (e.g., base + secrets)
    /// - Import statements within config files
    /// - Conflict detection across all sources
    /// - Validation with all errors and warnings reported together
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains warnings.
    /// Only returns Err if there are actual errors (not just warnings).
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        // Load all configs
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        // Convert to Config and validate, combining all diagnostics
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    /// Returns Ok((Config, diagnostics)) if no errors, Err if there are errors.
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        // Convert logging config
        let logging = if let Some(partial_logging) = partial.logging {
            LoggingConfig {
                level: partial_logging
                    .level
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
                overrides: partial_logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            }
        } else {
            LoggingConfig::default()
        };

        let engine = partial
            .engine
            .and_then(|e| e.discovery_timeout)
            .map(|t| EngineConfig {
                discovery_timeout: Duration::from_secs(t.into_inner()),
            })
            .unwrap_or_default();

        let api = match partial.api {
            Some(partial_api) => ApiConfig {
                listen: partial_api
                    .listen
                    .map(|s| s.into_inner())
                    .unwrap_or_else(|| DEFAULT_API_LISTEN.to_string()),
                port: partial_api
                    .port
                    .map(|s| s.into_inner())
                    .unwrap_or(DEFAULT_API_PORT),
            },
            None => ApiConfig::default(),
        };

        // Convert integrations config
        #[cfg(feature = "integration_mqtt")]
        let integrations = IntegrationsConfig {
            mqtt: partial
                .integrations
                .and_then(|i| i.mqtt)
                .map(|s| s.into_inner()),
        };
        #[cfg(not(feature = "integration_mqtt"))]
        let integrations = IntegrationsConfig {};

        // Validate and convert each garage
        let mut garages = Vec::new();
        let mut seen_ids: HashMap<DoorId, String> = HashMap::new();
        for (index, partial_garage) in partial.garages.into_iter().enumerate() {
            let name_span = partial_garage.name.as_ref().map(|n| n.span());
            let source = partial_garage.source.clone();
            match Self::validate_garage(index, partial_garage, &mut diagnostics) {
                Ok(garage) => {
                    let id = garage.id();
                    if let Some(first) = seen_ids.get(&id) {
                        diagnostics.push(Diagnostic::Error(Error::Validation(ValidationError {
                            field_path: format!("garages[{}].name", index),
                            message: format!(
                                "garage '{}' has the same id '{}' as garage '{}'",
                                garage.name, id, first
                            ),
                            span: name_span,
                            source,
                        })));
                        continue;
                    }
                    seen_ids.insert(id, garage.name.clone());
                    garages.push(garage);
                }
                Err(errors) => {
                    diagnostics.extend(
                        errors
                            .into_iter()
                            .map(|e| Diagnostic::Error(Error::Validation(e))),
                    );
                }
            }
        }

        let config = Config {
            logging,
            engine,
            api,
            integrations,
            garages,
        };

        // Check if there are any errors (not just warnings)
        let has_errors = diagnostics.iter().any(|d| d.is_error());

        if has_errors {
            Err(ConfigError::Invalid {
                rendered: format_diagnostics(&diagnostics),
                diagnostics,
            })
        } else {
            Ok((config, diagnostics))
        }
    }

    /// Validate a partial garage and convert it to a complete GarageConfig
    ///
    /// Hard errors are returned; warnings are pushed to `diagnostics`.
    fn validate_garage(
        index: usize,
        partial: PartialGarage,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<GarageConfig, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let source = partial.source;

        let mut error = |field: &str, message: String, span: Option<Range<usize>>| {
            errors.push(ValidationError {
                field_path: format!("garages[{}].{}", index, field),
                message,
                span,
                source: source.clone(),
            });
        };

        let name = match partial.name {
            Some(name) if name.get_ref().trim().is_empty() => {
                error("name", "name must not be empty".to_string(), Some(name.span()));
                String::new()
            }
            Some(name) => name.into_inner(),
            None => {
                error("name", "name is required".to_string(), None);
                String::new()
            }
        };

        let mut entity = |field: &str, value: Option<toml::Spanned<String>>| match value {
            Some(value) if !is_valid_entity_id(value.get_ref()) => {
                error(
                    field,
                    format!(
                        "'{}' is not a valid entity id (expected domain.object_id)",
                        value.get_ref()
                    ),
                    Some(value.span()),
                );
                None
            }
            Some(value) => Some(value),
            None => {
                error(field, format!("{} is required", field), None);
                None
            }
        };

        let open_sensor = entity("open_sensor", partial.open_sensor);
        let closed_sensor = entity("closed_sensor", partial.closed_sensor);
        let toggle_entity = entity("toggle_entity", partial.toggle_entity);

        let opening_duration = match partial.opening_duration {
            Some(duration) if *duration.get_ref() < 0 => {
                error(
                    "opening_duration",
                    format!(
                        "opening_duration must not be negative, got {}",
                        duration.get_ref()
                    ),
                    Some(duration.span()),
                );
                Duration::ZERO
            }
            Some(duration) => Duration::from_secs(duration.into_inner().unsigned_abs()),
            None => Duration::from_secs(DEFAULT_OPENING_DURATION),
        };

        if let Some(toggle) = &toggle_entity {
            if ToggleDomain::from_entity_id(toggle.get_ref()).is_none() {
                diagnostics.push(Diagnostic::Warning(Warning::UnsupportedToggleDomain {
                    field_path: format!("garages[{}].toggle_entity", index),
                    entity_id: toggle.get_ref().clone(),
                    span: Some(toggle.span()),
                    source: source.clone(),
                }));
            }
        }

        match (open_sensor, closed_sensor, toggle_entity) {
            (Some(open_sensor), Some(closed_sensor), Some(toggle_entity)) if errors.is_empty() => {
                Ok(GarageConfig {
                    name,
                    open_sensor: open_sensor.into_inner(),
                    closed_sensor: closed_sensor.into_inner(),
                    toggle_entity: toggle_entity.into_inner(),
                    opening_duration,
                })
            }
            _ => Err(errors),
        }
    }

    /// Door ids in configuration order
    pub fn garage_ids(&self) -> Vec<DoorId> {
        let mut seen = HashSet::new();
        self.garages
            .iter()
            .map(GarageConfig::id)
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    // All tests use Config::from_files() with actual file I/O
    // This ensures we test the real loading path

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    const MAIN_GARAGE: &str = r#"
[[garages]]
name = "Main Garage"
open_sensor = "binary_sensor.garage_open"
closed_sensor = "binary_sensor.garage_closed"
toggle_entity = "switch.garage_relay"
"#;

    #[test]
    fn test_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            r#"
[logging]
level = "debug"

[logging.overrides]
"garaged::api" = "warn"

[engine]
discovery_timeout = 10

[api]
listen = "0.0.0.0"
port = 9000

[integrations.mqtt]
broker = "mqtt.local"

[[garages]]
name = "Main Garage"
open_sensor = "binary_sensor.garage_open"
closed_sensor = "binary_sensor.garage_closed"
toggle_entity = "switch.garage_relay"
opening_duration = 20
"#,
        );

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("garaged::api"),
            Some(&LogLevel::Warn)
        );
        assert_eq!(config.engine.discovery_timeout, Duration::from_secs(10));
        assert_eq!(
            config.api,
            ApiConfig {
                listen: "0.0.0.0".to_string(),
                port: 9000,
            }
        );
        #[cfg(feature = "integration_mqtt")]
        assert_eq!(
            config.integrations.mqtt.as_ref().map(|m| m.broker.as_str()),
            Some("mqtt.local")
        );
        assert_eq!(
            config.garages,
            vec![GarageConfig {
                name: "Main Garage".to_string(),
                open_sensor: "binary_sensor.garage_open".to_string(),
                closed_sensor: "binary_sensor.garage_closed".to_string(),
                toggle_entity: "switch.garage_relay".to_string(),
                opening_duration: Duration::from_secs(20),
            }]
        );
        assert_eq!(config.garage_ids(), vec![DoorId::from_name("Main Garage")]);
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "garaged.toml", MAIN_GARAGE);

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.api, ApiConfig::default());
        assert_eq!(config.garages[0].opening_duration, Duration::from_secs(35));
        #[cfg(feature = "integration_mqtt")]
        assert!(config.integrations.mqtt.is_none());
    }

    #[test]
    fn test_garages_concatenate_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let main = write(
            dir.path(),
            "main.toml",
            &format!("imports = [\"side.toml\"]\n{}", MAIN_GARAGE),
        );
        write(
            dir.path(),
            "side.toml",
            r#"
[[garages]]
name = "Side Garage"
open_sensor = "binary_sensor.side_open"
closed_sensor = "binary_sensor.side_closed"
toggle_entity = "light.side_relay"
"#,
        );

        let (config, _) = Config::from_files(&[main]).unwrap();
        // Imports load before the importing file
        let names: Vec<&str> = config.garages.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Side Garage", "Main Garage"]);
    }

    #[test]
    fn test_conflict_detection() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(dir.path(), "base.toml", "[logging]\nlevel = \"info\"\n");
        let conflict = write(dir.path(), "conflict.toml", "[logging]\nlevel = \"debug\"\n");

        let err_msg = Config::from_files(&[base, conflict])
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Merge conflict"));
        assert!(err_msg.contains("logging.level"));
    }

    #[test]
    fn test_multiple_conflicts_reported() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(
            dir.path(),
            "base.toml",
            r#"
[logging]
level = "info"

[logging.overrides]
"target1" = "trace"

[engine]
discovery_timeout = 5

[api]
port = 8565

[integrations.mqtt]
broker = "a.local"
"#,
        );
        let conflict = write(
            dir.path(),
            "conflict.toml",
            r#"
[logging]
level = "debug"

[logging.overrides]
"target1" = "error"

[engine]
discovery_timeout = 9

[api]
port = 9000

[integrations.mqtt]
broker = "b.local"
"#,
        );

        let err = Config::from_files(&[base, conflict]).unwrap_err();
        let err_msg = err.to_string();
        assert!(err_msg.contains("logging.level"));
        assert!(err_msg.contains("logging.overrides.target1"));
        assert!(err_msg.contains("engine.discovery_timeout"));
        assert!(err_msg.contains("api.port"));
        #[cfg(feature = "integration_mqtt")]
        assert!(err_msg.contains("integrations.mqtt"));

        let ConfigError::Invalid { diagnostics, .. } = err else {
            panic!("expected merge errors");
        };
        #[cfg(feature = "integration_mqtt")]
        assert_eq!(diagnostics.len(), 5);
        assert!(diagnostics.iter().all(Diagnostic::is_error));
    }

    #[test]
    fn test_import_cycle_detection() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.toml",
            "imports = [\"b.toml\"]\n[logging]\nlevel = \"info\"\n",
        );
        write(dir.path(), "b.toml", "imports = [\"a.toml\"]\n");

        let err = Config::from_files(&[a]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Load(LoadError::ImportCycle { .. })
        ));
        assert!(err.to_string().contains("Import cycle"));
    }

    #[test]
    fn test_relative_import_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "configs/base.toml", "[logging]\nlevel = \"warn\"\n");
        let main = write(
            dir.path(),
            "main.toml",
            &format!("imports = [\"configs/base.toml\"]\n{}", MAIN_GARAGE),
        );

        let (config, _) = Config::from_files(&[main]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.garages.len(), 1);
    }

    #[test]
    fn test_empty_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(dir.path(), "empty.toml", "");

        // Empty file should parse successfully but emit warning
        let (config, diagnostics) = Config::from_files(&[empty]).unwrap();
        assert_eq!(diagnostics.len(), 1, "Expected 1 warning for empty config");
        assert!(diagnostics[0].is_warning());
        assert!(config.garages.is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            "[[garages]]\nopen_sensor = \"binary_sensor.garage_open\"\n",
        );

        let err = Config::from_files(&[path]).unwrap_err();
        insta::assert_snapshot!(err.to_string().trim_end(), @r"
        Validation error in 'garages[0].name': name is required
        Validation error in 'garages[0].closed_sensor': closed_sensor is required
        Validation error in 'garages[0].toggle_entity': toggle_entity is required
        ");
    }

    #[test]
    fn test_invalid_entity_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            r#"
[[garages]]
name = "Main Garage"
open_sensor = "garage_open"
closed_sensor = "binary_sensor.garage_closed"
toggle_entity = "switch.garage_relay"
"#,
        );

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("garages[0].open_sensor"));
        assert!(err_msg.contains("'garage_open' is not a valid entity id"));
    }

    #[test]
    fn test_negative_opening_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            &format!("{}opening_duration = -5\n", MAIN_GARAGE),
        );

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("opening_duration must not be negative, got -5"));
    }

    #[test]
    fn test_zero_opening_duration_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            &format!("{}opening_duration = 0\n", MAIN_GARAGE),
        );

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert_eq!(config.garages[0].opening_duration, Duration::ZERO);
    }

    #[test]
    fn test_duplicate_door_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            &format!(
                "{}{}",
                MAIN_GARAGE,
                MAIN_GARAGE.replace("Main Garage", "main garage")
            ),
        );

        let err_msg = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err_msg.contains("garages[1].name"));
        assert!(err_msg.contains("same id 'main_garage'"));
    }

    #[test]
    fn test_unsupported_toggle_domain_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "garaged.toml",
            &MAIN_GARAGE.replace("switch.garage_relay", "input_boolean.garage_relay"),
        );

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert_eq!(config.garages.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert!(format_diagnostics(&diagnostics).contains("input_boolean.garage_relay"));
    }

    #[test]
    fn test_missing_file_error() {
        let missing_path = PathBuf::from("/nonexistent/config.toml");

        let err_msg = Config::from_files(&[missing_path]).unwrap_err().to_string();
        assert!(err_msg.contains("Failed to read"), "Error should mention read failure");
        assert!(err_msg.contains("/nonexistent/config.toml"), "Error should include file path");
    }

    #[test]
    fn test_entity_id_format() {
        assert!(is_valid_entity_id("binary_sensor.garage_open"));
        assert!(is_valid_entity_id("switch.relay_1"));
        assert!(!is_valid_entity_id("garage_open"));
        assert!(!is_valid_entity_id("Switch.relay"));
        assert!(!is_valid_entity_id("switch."));
        assert!(!is_valid_entity_id(".relay"));
        assert!(!is_valid_entity_id("switch.relay.extra"));
        assert!(!is_valid_entity_id("switch._relay"));
    }
}
