//! # Configuration
//!
//! Loads the inventory's storage location and settings overrides from a
//! `reclass-config.yml` file plus environment variables, the way
//! `original_source/reclass/config.py::find_and_read_configfile` searches a
//! fixed list of candidate paths and merges in CLI/env overrides, built on
//! the same `Figment::new().merge(Toml::file(...)).merge(Env::prefixed(...))`
//! shape used elsewhere in this crate, generalized from a fixed two-file
//! pair to a multi-location search order.

use crate::error::ConfigError;
use crate::settings::Settings;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage backend selection (`FilesystemStorage` / `GitStorage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Git,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Filesystem
    }
}

/// Where the inventory's nodes and classes live, and how to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub nodes_uri: PathBuf,
    pub classes_uri: PathBuf,
    pub backend: StorageBackend,
    pub default_environment: String,
    pub compose_node_name: bool,
    pub class_mappings_match_path: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            nodes_uri: PathBuf::from("./nodes"),
            classes_uri: PathBuf::from("./classes"),
            backend: StorageBackend::Filesystem,
            default_environment: "base".to_string(),
            compose_node_name: false,
            class_mappings_match_path: false,
        }
    }
}

/// Overrides for the merge/interpolation/resolver behaviour in
/// [`Settings`]. Anything left at its default here leaves the
/// corresponding `Settings` field untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub allow_scalar_over_dict: bool,
    pub allow_scalar_over_list: bool,
    pub allow_list_over_scalar: bool,
    pub allow_dict_over_scalar: bool,
    pub allow_none_override: bool,
    pub strict_constant_parameters: bool,
    pub ignore_overwritten_missing_references: bool,
    pub ignore_class_notfound: bool,
    pub ignore_class_notfound_regexp: Vec<String>,
    pub automatic_parameters: bool,
    pub inventory_ignore_failed_node: bool,
    pub inventory_ignore_failed_render: bool,
    pub group_errors: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let defaults = Settings::default();
        SettingsConfig {
            allow_scalar_over_dict: defaults.allow_scalar_over_dict,
            allow_scalar_over_list: defaults.allow_scalar_over_list,
            allow_list_over_scalar: defaults.allow_list_over_scalar,
            allow_dict_over_scalar: defaults.allow_dict_over_scalar,
            allow_none_override: defaults.allow_none_override,
            strict_constant_parameters: defaults.strict_constant_parameters,
            ignore_overwritten_missing_references: defaults.ignore_overwritten_missing_references,
            ignore_class_notfound: defaults.ignore_class_notfound,
            ignore_class_notfound_regexp: defaults.ignore_class_notfound_regexp,
            automatic_parameters: defaults.automatic_parameters,
            inventory_ignore_failed_node: defaults.inventory_ignore_failed_node,
            inventory_ignore_failed_render: defaults.inventory_ignore_failed_render,
            group_errors: defaults.group_errors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`/`debug`/`info`/`warn`/`error`, or a full `tracing`
    /// `EnvFilter` directive string.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration document (`reclass-config.yml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub settings: SettingsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Search, in order, an explicit `RECLASS_CONFIG` path, the working
    /// directory, the user's home directory, the inventory base (if given),
    /// and the running executable's directory; the first file found is
    /// loaded, then `RECLASS_*` environment variables (with `__` as the
    /// nesting separator) are layered on top. No config file is an error
    /// only if `RECLASS_CONFIG` was set explicitly and does not exist; the
    /// other locations are optional. Per spec §6.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_inventory_base(None)
    }

    /// As [`Config::load`], additionally searching `<inventory_base>/reclass-config.yml`
    /// — used when the CLI was given an explicit `--inventory-base-uri`.
    pub fn load_with_inventory_base(inventory_base: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = Self::find_configfile(inventory_base) {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed("RECLASS_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }

    /// Load from an explicit path, bypassing the search order. Used by the
    /// CLI's `--config` flag.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("RECLASS_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }

    fn find_configfile(inventory_base: Option<&Path>) -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("RECLASS_CONFIG") {
            let path = PathBuf::from(explicit);
            if path.is_file() {
                return Some(path);
            }
        }
        let mut candidates = vec![
            PathBuf::from("./reclass-config.yml"),
            dirs_home().map(|h| h.join(".reclass-config.yml")).unwrap_or_default(),
        ];
        if let Some(base) = inventory_base {
            candidates.push(base.join("reclass-config.yml"));
        }
        if let Some(exe_dir) = exe_dir() {
            candidates.push(exe_dir.join("reclass-config.yml"));
        }
        candidates.into_iter().find(|p| !p.as_os_str().is_empty() && p.is_file())
    }

    /// Apply this configuration's `[settings]` overrides to a base
    /// [`Settings`] value, producing the final settings the engine runs
    /// with.
    pub fn apply_settings(&self, mut base: Settings) -> Settings {
        let s = &self.settings;
        base.allow_scalar_over_dict = s.allow_scalar_over_dict;
        base.allow_scalar_over_list = s.allow_scalar_over_list;
        base.allow_list_over_scalar = s.allow_list_over_scalar;
        base.allow_dict_over_scalar = s.allow_dict_over_scalar;
        base.allow_none_override = s.allow_none_override;
        base.strict_constant_parameters = s.strict_constant_parameters;
        base.ignore_overwritten_missing_references = s.ignore_overwritten_missing_references;
        base.ignore_class_notfound = s.ignore_class_notfound;
        base.ignore_class_notfound_regexp = s.ignore_class_notfound_regexp.clone();
        base.automatic_parameters = s.automatic_parameters;
        base.inventory_ignore_failed_node = s.inventory_ignore_failed_node;
        base.inventory_ignore_failed_render = s.inventory_ignore_failed_render;
        base.group_errors = s.group_errors;
        base.compose_node_name = self.storage.compose_node_name;
        base.class_mappings_match_path = self.storage.class_mappings_match_path;
        base.default_environment = self.storage.default_environment.clone();
        base
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
}

/// Reject a nodes/classes URI pair that are equal or where one is nested
/// inside the other — the filesystem backend's contract per spec §6: "a
/// plain filesystem walker over two URIs ... that rejects overlap/equality
/// between those URIs." Paths are compared lexically on their cleaned
/// (non-canonicalized) components, since the URIs need not exist yet when
/// this is checked.
pub fn validate_storage_uris(nodes_uri: &Path, classes_uri: &Path) -> Result<(), ConfigError> {
    let nodes = clean_components(nodes_uri);
    let classes = clean_components(classes_uri);
    if nodes == classes {
        return Err(ConfigError::DuplicateUri(nodes_uri.display().to_string()));
    }
    if nodes.starts_with(&classes) || classes.starts_with(&nodes) {
        return Err(ConfigError::OverlappingUri(
            nodes_uri.display().to_string(),
            classes_uri.display().to_string(),
        ));
    }
    Ok(())
}

fn clean_components(path: &Path) -> Vec<std::ffi::OsString> {
    path.components().map(|c| c.as_os_str().to_os_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_filesystem_backend() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert_eq!(config.storage.default_environment, "base");
    }

    #[test]
    fn apply_settings_overrides_merge_flags() {
        let mut config = Config::default();
        config.settings.allow_scalar_over_dict = true;
        config.settings.strict_constant_parameters = true;
        let settings = config.apply_settings(Settings::default());
        assert!(settings.allow_scalar_over_dict);
        assert!(settings.strict_constant_parameters);
    }

    #[test]
    fn validate_storage_uris_rejects_equal_paths() {
        let err = validate_storage_uris(Path::new("/srv/inv"), Path::new("/srv/inv")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateUri(_)));
    }

    #[test]
    fn validate_storage_uris_rejects_nested_paths() {
        let err = validate_storage_uris(Path::new("/srv/inv"), Path::new("/srv/inv/classes")).unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingUri(..)));
    }

    #[test]
    fn validate_storage_uris_accepts_disjoint_paths() {
        validate_storage_uris(Path::new("/srv/nodes"), Path::new("/srv/classes")).unwrap();
    }

    #[test]
    fn load_with_inventory_base_finds_configfile_there() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("reclass-config.yml"),
            "storage:\n  default_environment: from-inventory-base\n",
        )
        .unwrap();
        // RECLASS_CONFIG and the cwd/home candidates must stay out of the
        // way so the inventory-base candidate is the one that's found.
        std::env::remove_var("RECLASS_CONFIG");
        let config = Config::load_with_inventory_base(Some(dir.path())).unwrap();
        assert_eq!(config.storage.default_environment, "from-inventory-base");
    }

    #[test]
    fn from_file_loads_yaml_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reclass-config.yml");
        std::fs::write(
            &path,
            "storage:\n  nodes_uri: /srv/nodes\n  classes_uri: /srv/classes\n  default_environment: prod\n",
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.nodes_uri, PathBuf::from("/srv/nodes"));
        assert_eq!(config.storage.default_environment, "prod");
    }
}
