use std::path::{Path, PathBuf};

use crate::config::schema::{IngestConfig, CONFIG_VERSION};
use crate::error::ConfigError;
use crate::extract::XmlValidator;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Overrides `storage_root` when set.
pub const STORAGE_DIR_ENV: &str = "LOADFILE_STORAGE_DIR";
/// Older deployments set this; read only when `LOADFILE_STORAGE_DIR` is unset.
pub const LEGACY_STORAGE_DIR_ENV: &str = "STORAGE_DIR";
/// Overrides `database_path` when set.
pub const DATABASE_ENV: &str = "LOADFILE_DATABASE";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: IngestConfig = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Applies `LOADFILE_STORAGE_DIR` (falling back to `STORAGE_DIR`) and
/// `LOADFILE_DATABASE`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut IngestConfig) {
    let storage = [STORAGE_DIR_ENV, LEGACY_STORAGE_DIR_ENV]
        .into_iter()
        .find_map(|name| env_path(name).map(|dir| (name, dir)));
    if let Some((name, dir)) = storage {
        log::debug!("Storage root overridden by {}", name);
        config.storage_root = dir;
    }
    if let Some(db) = env_path(DATABASE_ENV) {
        log::debug!("Database path overridden by {}", DATABASE_ENV);
        config.database_path = db;
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "queue_capacity must be at least 1".to_string(),
        });
    }

    if config.extraction.max_item_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.max_item_bytes must be at least 1".to_string(),
        });
    }

    if let Some(root) = &config.extraction.expected_root {
        XmlValidator::with_expected_root(root)?;
    }

    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging.level '{}': {}", config.logging.level, e),
        });
    }

    if config.storage_root.as_os_str().is_empty() || config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "storage_root and database_path must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(STORAGE_DIR_ENV);
        std::env::remove_var(LEGACY_STORAGE_DIR_ENV);
        std::env::remove_var(DATABASE_ENV);
    }

    #[test]
    #[serial]
    fn test_load_valid_config() {
        clear_env();
        let config_json = r#"
        {
            "version": "1.0",
            "storage_root": "/srv/loadfile/storage",
            "database_path": "/srv/loadfile/loadfile.db",
            "worker_count": 4,
            "queue_capacity": 16,
            "extraction": {
                "max_item_bytes": 1048576,
                "expected_root": "Comprobante"
            },
            "logging": { "level": "debug", "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/loadfile/storage"));
        assert_eq!(config.database_path, PathBuf::from("/srv/loadfile/loadfile.db"));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.extraction.max_item_bytes, 1048576);
        assert_eq!(config.extraction.expected_root.as_deref(), Some("Comprobante"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_minimal_config_uses_defaults() {
        clear_env();
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert!(config.worker_count > 0);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.extraction.expected_root.is_none());
    }

    #[test]
    #[serial]
    fn test_invalid_version() {
        clear_env();
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    #[serial]
    fn test_schema_rejects_bad_values() {
        clear_env();
        for json in [
            r#"{ "version": "1.0", "worker_count": 0 }"#,
            r#"{ "version": "1.0", "queue_capacity": -1 }"#,
            r#"{ "version": "1.0", "logging": { "level": "" } }"#,
            r#"{ "version": "1.0", "unknown_field": true }"#,
            r#"{ "storage_root": "/tmp" }"#,
        ] {
            let result = load_config_from_str(json);
            assert!(
                matches!(result, Err(ConfigError::SchemaValidation { .. })),
                "accepted: {}",
                json
            );
        }
    }

    #[test]
    #[serial]
    fn test_invalid_expected_root() {
        clear_env();
        let result = load_config_from_str(
            r#"{ "version": "1.0", "extraction": { "expected_root": "not a name" } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    #[serial]
    fn test_log_level_accepts_directives() {
        clear_env();
        let config = load_config_from_str(
            r#"{ "version": "1.0", "logging": { "level": "loadfile=debug,warn" } }"#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "loadfile=debug,warn");
    }

    #[test]
    #[serial]
    fn test_log_level_rejects_bad_directive() {
        clear_env();
        let result = load_config_from_str(
            r#"{ "version": "1.0", "logging": { "level": "loadfile=loudest" } }"#,
        );
        match result {
            Err(ConfigError::Validation { message }) => assert!(message.contains("logging.level")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_malformed_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(STORAGE_DIR_ENV, "/env/storage");
        std::env::set_var(DATABASE_ENV, "/env/loadfile.db");

        let config = load_config_from_str(
            r#"{ "version": "1.0", "storage_root": "/file/storage" }"#,
        )
        .unwrap();
        clear_env();

        assert_eq!(config.storage_root, PathBuf::from("/env/storage"));
        assert_eq!(config.database_path, PathBuf::from("/env/loadfile.db"));
    }

    #[test]
    #[serial]
    fn test_legacy_storage_dir_is_a_fallback() {
        clear_env();
        std::env::set_var(LEGACY_STORAGE_DIR_ENV, "/legacy/storage");
        let legacy = load_config_from_str(
            r#"{ "version": "1.0", "storage_root": "/file/storage" }"#,
        )
        .unwrap();

        std::env::set_var(STORAGE_DIR_ENV, "/env/storage");
        let preferred = load_config_from_str(
            r#"{ "version": "1.0", "storage_root": "/file/storage" }"#,
        )
        .unwrap();
        clear_env();

        assert_eq!(legacy.storage_root, PathBuf::from("/legacy/storage"));
        assert_eq!(preferred.storage_root, PathBuf::from("/env/storage"));
    }

    #[test]
    #[serial]
    fn test_empty_env_override_is_ignored() {
        clear_env();
        std::env::set_var(STORAGE_DIR_ENV, "");
        let config = load_config_from_str(
            r#"{ "version": "1.0", "storage_root": "/file/storage" }"#,
        )
        .unwrap();
        clear_env();
        assert_eq!(config.storage_root, PathBuf::from("/file/storage"));
    }

    #[test]
    #[serial]
    fn test_load_config_from_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadfile.json");
        std::fs::write(&path, r#"{ "version": "1.0", "worker_count": 2 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.worker_count, 2);

        let missing = load_config(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }
}
