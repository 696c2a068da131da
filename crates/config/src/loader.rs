use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::schema::C2Config;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "C2SWITCH_CONFIG_DIR";

/// Candidate file names, in lookup order.
const CONFIG_FILE_NAMES: &[&str] = &[
    "c2switch.toml",
    "c2switch.yaml",
    "c2switch.yml",
    "c2switch.json",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Directory holding c2switch config and state files.
///
/// `C2SWITCH_CONFIG_DIR` wins over the platform default.
pub fn config_dir() -> Option<PathBuf> {
    config_dir_from(std::env::var_os(CONFIG_DIR_ENV))
}

fn config_dir_from(env_override: Option<OsString>) -> Option<PathBuf> {
    if let Some(dir) = env_override.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "c2switcher").map(|dirs| dirs.config_dir().to_path_buf())
}

/// First existing config file in `dir`, if any.
pub fn discover_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load the config from the default directory.
///
/// A missing directory or file is not an error: defaults apply.
pub fn load_config() -> Result<C2Config, ConfigError> {
    let Some(dir) = config_dir() else {
        debug!("no config directory available, using defaults");
        return Ok(C2Config::default());
    };
    match discover_config_file(&dir) {
        Some(path) => load_config_from(&path),
        None => {
            debug!(dir = %dir.display(), "no config file found, using defaults");
            Ok(C2Config::default())
        },
    }
}

/// Load and parse a specific config file. The format follows the extension.
pub fn load_config_from(path: &Path) -> Result<C2Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let config = match ext.as_deref() {
        Some("toml") => toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?,
        Some("yaml" | "yml") => serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?,
        Some("json") => serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let dir = config_dir_from(Some(OsString::from("/tmp/c2-test"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/c2-test"));
    }

    #[test]
    fn empty_env_override_is_ignored() {
        let dir = config_dir_from(Some(OsString::new()));
        assert_ne!(dir, Some(PathBuf::new()));
    }

    #[test]
    fn discover_prefers_toml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("c2switch.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("c2switch.toml"), "").unwrap();
        let found = discover_config_file(tmp.path()).unwrap();
        assert!(found.ends_with("c2switch.toml"));
    }

    #[test]
    fn discover_returns_none_for_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_config_file(tmp.path()).is_none());
    }

    #[test]
    fn load_toml_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c2switch.toml");
        std::fs::write(
            &path,
            r#"
[oauth]
token_url = "http://127.0.0.1:9/token"
refresh_buffer_secs = 300
scopes = ["user:inference"]
"#,
        )
        .unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(
            config.oauth.token_url.as_deref(),
            Some("http://127.0.0.1:9/token")
        );
        assert_eq!(config.oauth.refresh_buffer_secs, Some(300));
        assert_eq!(config.oauth.scopes, Some(vec!["user:inference".to_string()]));
        assert!(config.oauth.client_id.is_none());
    }

    #[test]
    fn load_yaml_and_json() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = tmp.path().join("c2switch.yaml");
        std::fs::write(&yaml, "oauth:\n  authorization_timeout_secs: 120\n").unwrap();
        assert_eq!(
            load_config_from(&yaml).unwrap().oauth.authorization_timeout_secs,
            Some(120)
        );

        let json = tmp.path().join("c2switch.json");
        std::fs::write(&json, r#"{"oauth": {"client_id": "abc"}}"#).unwrap();
        assert_eq!(
            load_config_from(&json).unwrap().oauth.client_id.as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn invalid_toml_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c2switch.toml");
        std::fs::write(&path, "[oauth\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c2switch.ini");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
