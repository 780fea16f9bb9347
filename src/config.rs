use dirs::config_dir;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SQLBRIDGE_CONFIG";
const CONFIG_FILE: &str = "config.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")] Io { path: String, source: std::io::Error },
    #[error("invalid config {path}: {source}")] Json { path: String, source: serde_json::Error },
}

/// Knobs for compilation. Missing keys in a config file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub validation_level: String,
    pub validation_action: String,
    /// Appended to a join alias to name the lookup's output array.
    pub lookup_suffix: String,
    pub like_case_insensitive: bool,
    /// Applied only when the statement carries no LIMIT.
    pub default_limit: Option<u64>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            validation_level: "strict".to_string(),
            validation_action: "error".to_string(),
            lookup_suffix: "_joined".to_string(),
            like_case_insensitive: true,
            default_limit: None,
        }
    }
}

impl CompilerConfig {
    /// `$SQLBRIDGE_CONFIG`, then `<config_dir>/sqlbridge/config.json`, then defaults.
    pub fn load() -> Self {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => match default_path() {
                Some(p) => p,
                None => return Self::default(),
            },
        };
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(cfg) => {
                info!("Loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json { path: path.display().to_string(), source })
    }
}

fn default_path() -> Option<PathBuf> {
    let mut path = config_dir()?;
    path.push("sqlbridge");
    path.push(CONFIG_FILE);
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("sqlbridge-{}-{}", std::process::id(), name));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let path = temp_file("partial.json", r#"{"validation_level": "moderate", "default_limit": 100}"#);
        let cfg = CompilerConfig::load_from(&path).unwrap();
        assert_eq!(cfg.validation_level, "moderate");
        assert_eq!(cfg.default_limit, Some(100));
        assert_eq!(cfg.validation_action, "error");
        assert_eq!(cfg.lookup_suffix, "_joined");
        assert!(cfg.like_case_insensitive);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn malformed_and_missing_files_are_errors() {
        let path = temp_file("bad.json", "{not json");
        assert!(matches!(CompilerConfig::load_from(&path), Err(ConfigError::Json { .. })));
        let _ = fs::remove_file(&path);
        assert!(matches!(CompilerConfig::load_from(&path), Err(ConfigError::Io { .. })));
    }
}
