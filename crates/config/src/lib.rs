//! Configuration loading, validation, and env substitution.
//!
//! Config files: `volery.toml`, `volery.yaml`, or `volery.json`.
//! Searched in `./` then `~/.config/volery/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config},
    schema::{
        BridgeSettings, ChannelsConfig, DispatchConfig, LoggingConfig, ServerConfig,
        StorageConfig, VoleryConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
