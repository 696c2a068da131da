//! Configuration loading for c2switch.
//!
//! Config files live in the per-user config directory and may be written in
//! TOML, YAML or JSON. Every value is optional: crates that consume a section
//! merge it over their own built-in defaults.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        CONFIG_DIR_ENV, ConfigError, config_dir, discover_config_file, load_config,
        load_config_from,
    },
    schema::{C2Config, OAuthSection},
};
