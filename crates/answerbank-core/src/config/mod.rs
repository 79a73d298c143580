//! Configuration management for answerbank.
//!
//! Configuration is loaded from a TOML file with sensible defaults. The
//! `[tiku]` section is the flat provider mapping each adapter reads its own
//! keys from; the remaining sections are typed.

mod provider;
mod types;
mod validate;

pub use provider::{parse_bool, resolve_env_var, ProviderConfig};
pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for answerbank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Provider selection and adapter keys (flat string mapping)
    pub tiku: ProviderConfig,

    /// OCR fallback chain settings
    pub ocr: OcrConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.answerbank.answerbank/config.toml
    /// - Linux: ~/.config/answerbank/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\answerbank\config\config.toml
    ///
    /// Falls back to ~/.answerbank/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "answerbank", "answerbank")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".answerbank").join("config.toml")
            })
    }

    /// Get the resolved answer cache path (with ~ expansion).
    pub fn cache_path(&self) -> PathBuf {
        let path_str = self.general.cache_path.to_string_lossy();
        let expanded = shellexpand::tilde(&path_str);
        PathBuf::from(expanded.into_owned())
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.cache_path, PathBuf::from("cache.json"));
        assert_eq!(config.ocr.image_host, "p.ananas.chaoxing.com");
        assert!(!config.ocr.local_enabled);
        assert!(config.tiku.is_empty());
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[ocr]"));
    }

    #[test]
    fn test_tiku_section_accepts_scalars() {
        let config = Config::from_toml_str(
            r#"
            [tiku]
            provider = "AI"
            submit = true
            cover_rate = 0.9
            max_retries = 5
            tokens = ["aaa", "bbb"]
            "#,
        )
        .unwrap();
        assert_eq!(config.tiku.get("provider"), Some("AI"));
        assert_eq!(config.tiku.get("submit"), Some("true"));
        assert_eq!(config.tiku.get("cover_rate"), Some("0.9"));
        assert_eq!(config.tiku.get("max_retries"), Some("5"));
        assert_eq!(config.tiku.get_list("tokens"), vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[general]\ncache_path = \"answers.json\"\n[tiku]\nprovider = \"TikuAdapter\"\nurl = \"http://localhost:8060/adapter-service/search\"\n",
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache_path(), PathBuf::from("answers.json"));
        assert_eq!(config.tiku.get("provider"), Some("TikuAdapter"));
    }

    #[test]
    fn test_cache_path_expands_tilde() {
        let mut config = Config::default();
        config.general.cache_path = PathBuf::from("~/answers/cache.json");
        let path = config.cache_path();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("answers/cache.json"));
    }
}
