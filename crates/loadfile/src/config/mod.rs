pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, validate_config, DATABASE_ENV,
    LEGACY_STORAGE_DIR_ENV, STORAGE_DIR_ENV,
};
pub use schema::{ExtractionConfig, IngestConfig, LogConfig, LogFormat, CONFIG_VERSION};
