use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::diagnostics::{
    Diagnostic, Error, LoadError, MergeConflictLocation, MergeError, SourceInfo, Warning,
};
use super::LogLevel;
#[cfg(feature = "integration_mqtt")]
use crate::integrations::mqtt::MqttConfig;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub engine: Option<PartialEngineConfig>,
    pub api: Option<PartialApiConfig>,
    pub integrations: Option<PartialIntegrationsConfig>,

    /// Garage doors; concatenated across files
    #[serde(default)]
    pub garages: Vec<PartialGarage>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<toml::Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, toml::Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialEngineConfig {
    /// Seconds to wait for entity discovery before setting up doors
    pub discovery_timeout: Option<toml::Spanned<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<toml::Spanned<String>>,
    pub port: Option<toml::Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialIntegrationsConfig {
    #[cfg(feature = "integration_mqtt")]
    pub mqtt: Option<toml::Spanned<MqttConfig>>,
}

impl PartialIntegrationsConfig {
    fn is_empty(&self) -> bool {
        #[cfg(feature = "integration_mqtt")]
        if self.mqtt.is_some() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialGarage {
    pub name: Option<toml::Spanned<String>>,
    pub open_sensor: Option<toml::Spanned<String>>,
    pub closed_sensor: Option<toml::Spanned<String>>,
    pub toggle_entity: Option<toml::Spanned<String>>,
    /// Seconds; signed so negative values can be reported instead of failing to parse
    pub opening_duration: Option<toml::Spanned<i64>>,

    /// File this garage was defined in (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

/// Keep the first definition of a spanned scalar, reporting later ones as conflicts.
fn merge_scalar<T>(
    slot: &mut Option<toml::Spanned<T>>,
    first_loc: &mut Option<MergeConflictLocation>,
    value: Option<toml::Spanned<T>>,
    field_path: &str,
    message: &str,
    source_info: &SourceInfo,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(value) = value else {
        return;
    };

    let conflict_loc = MergeConflictLocation {
        file_path: source_info.file_path.clone(),
        span: value.span(),
        content: source_info.content.clone(),
    };

    if let Some(prev_loc) = first_loc.as_ref() {
        // Conflict: keep first value, record error
        diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
            field_path: field_path.to_string(),
            message: message.to_string(),
            conflicts: vec![prev_loc.clone(), conflict_loc],
        })));
    } else {
        // First occurrence: keep it
        *slot = Some(value);
        *first_loc = Some(conflict_loc);
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        let source = SourceInfo {
            file_path: path.to_path_buf(),
            content,
        };
        for garage in &mut config.garages {
            garage.source = Some(source.clone());
        }
        config.source = Some(source);

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each config file is loaded, then its imports are recursively processed.
    /// Cycle detection prevents infinite loops.
    ///
    /// Returns a Vec of all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    /// Recursively load a config file and its imports
    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        // Canonicalize the path to detect cycles reliably
        let canonical_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        // Check for import cycles
        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        // Load the config file
        let config = Self::from_file(path)?;

        // Process imports first (depth-first)
        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);

            // Resolve relative imports from the parent file's directory
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        // Add this config after its imports
        configs.push(config);

        // Remove from visited set to allow imports from sibling branches
        visited.remove(&canonical_path);

        Ok(())
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as errors
    /// but merging continues to find all conflicts at once (compiler-style error collection).
    /// Garage lists are concatenated in load order; duplicates are caught by validation.
    ///
    /// Returns (merged, diagnostics) where diagnostics may contain warnings and errors
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();
        let mut imports = Vec::new();

        // Track which file set each field with span information (for first-wins)
        let mut logging_level_loc: Option<MergeConflictLocation> = None;
        let mut logging_overrides_locs: HashMap<String, MergeConflictLocation> = HashMap::new();
        let mut discovery_timeout_loc: Option<MergeConflictLocation> = None;
        let mut api_listen_loc: Option<MergeConflictLocation> = None;
        let mut api_port_loc: Option<MergeConflictLocation> = None;
        #[cfg(feature = "integration_mqtt")]
        let mut mqtt_loc: Option<MergeConflictLocation> = None;

        for config in configs {
            // Collect all imports
            imports.extend(config.imports.clone());

            let source_info = config.source.as_ref().cloned().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            // Check if config is empty (no meaningful content)
            let is_empty = config.logging.is_none()
                && config.engine.is_none()
                && config.api.is_none()
                && config.integrations.as_ref().is_none_or(|i| i.is_empty())
                && config.garages.is_empty()
                && config.imports.is_empty();

            if is_empty {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source_info.file_path.clone(),
                }));
            }

            // Merge logging config
            if let Some(logging) = config.logging {
                let result_logging = result.logging.get_or_insert_with(Default::default);

                merge_scalar(
                    &mut result_logging.level,
                    &mut logging_level_loc,
                    logging.level,
                    "logging.level",
                    "Logging level defined in multiple config files",
                    &source_info,
                    &mut diagnostics,
                );

                // Check logging overrides conflicts (first-wins per key)
                if let Some(overrides) = logging.overrides {
                    let result_overrides =
                        result_logging.overrides.get_or_insert_with(HashMap::new);
                    for (key, value_spanned) in overrides {
                        let conflict_loc = MergeConflictLocation {
                            file_path: source_info.file_path.clone(),
                            span: value_spanned.span(),
                            content: source_info.content.clone(),
                        };

                        if let Some(prev_loc) = logging_overrides_locs.get(&key) {
                            // Conflict: keep first value, record error
                            diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                                field_path: format!("logging.overrides.{}", key),
                                message: format!(
                                    "Logging override for '{}' defined in multiple config files",
                                    key
                                ),
                                conflicts: vec![prev_loc.clone(), conflict_loc],
                            })));
                        } else {
                            // First occurrence: keep it
                            result_overrides.insert(key.clone(), value_spanned);
                            logging_overrides_locs.insert(key, conflict_loc);
                        }
                    }
                }
            }

            // Merge engine config
            if let Some(engine) = config.engine {
                let result_engine = result.engine.get_or_insert_with(Default::default);
                merge_scalar(
                    &mut result_engine.discovery_timeout,
                    &mut discovery_timeout_loc,
                    engine.discovery_timeout,
                    "engine.discovery_timeout",
                    "Discovery timeout defined in multiple config files",
                    &source_info,
                    &mut diagnostics,
                );
            }

            // Merge api config
            if let Some(api) = config.api {
                let result_api = result.api.get_or_insert_with(Default::default);
                merge_scalar(
                    &mut result_api.listen,
                    &mut api_listen_loc,
                    api.listen,
                    "api.listen",
                    "API listen address defined in multiple config files",
                    &source_info,
                    &mut diagnostics,
                );
                merge_scalar(
                    &mut result_api.port,
                    &mut api_port_loc,
                    api.port,
                    "api.port",
                    "API port defined in multiple config files",
                    &source_info,
                    &mut diagnostics,
                );
            }

            // Merge integrations config; each integration table is a single unit
            if let Some(integrations) = config.integrations {
                let result_integrations =
                    result.integrations.get_or_insert_with(Default::default);
                #[cfg(feature = "integration_mqtt")]
                merge_scalar(
                    &mut result_integrations.mqtt,
                    &mut mqtt_loc,
                    integrations.mqtt,
                    "integrations.mqtt",
                    "MQTT integration defined in multiple config files",
                    &source_info,
                    &mut diagnostics,
                );
                #[cfg(not(feature = "integration_mqtt"))]
                let _ = (result_integrations, integrations);
            }

            result.garages.extend(config.garages);
        }

        result.imports = imports;

        (result, diagnostics)
    }
}
