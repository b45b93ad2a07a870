use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::protocol::PROTOCOL_VERSION;
use crate::ui::{InlineExecutor, UiExecutor, UiThread};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub protocol: ProtocolConfig,
    pub preloading: PreloadingConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub version: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadingConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
}

impl Default for PreloadingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300000,
        }
    }
}

impl PreloadingConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// How long a cached surface stays fresh. Zero when preloading is off,
    /// so every fetch builds a new surface.
    pub fn ttl(&self) -> Duration {
        if self.enabled {
            Duration::from_millis(self.ttl_ms)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub thread_name: String,
    /// Run UI jobs on the caller instead of a dedicated thread.
    pub inline: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            thread_name: format!("{}-ui", env!("CARGO_PKG_NAME")),
            inline: false,
        }
    }
}

impl UiConfig {
    pub fn executor(&self) -> Result<Arc<dyn UiExecutor>> {
        if self.inline {
            return Ok(Arc::new(InlineExecutor));
        }
        Ok(Arc::new(UiThread::spawn(self.thread_name.clone())?))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            protocol: ProtocolConfig::default(),
            preloading: PreloadingConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .map_err(|e| BridgeError::Config(format!("Failed to load config from {}: {}", path.display(), e)));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol.version != PROTOCOL_VERSION {
            return Err(BridgeError::Config(format!(
                "unsupported protocol version {} (expected {})",
                self.protocol.version, PROTOCOL_VERSION
            )));
        }
        if self.ui.thread_name.is_empty() && !self.ui.inline {
            return Err(BridgeError::Config("ui.thread_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.protocol.version, "2.0");
        assert!(config.preloading.enabled);
        assert_eq!(config.preloading.ttl(), Duration::from_secs(300));
        assert!(!config.ui.inline);
    }

    #[test]
    fn test_disabled_preloading_has_zero_ttl() {
        assert_eq!(PreloadingConfig::disabled().ttl(), Duration::ZERO);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let file = write_config("preloading:\n  ttl_ms: 1000\nui:\n  inline: true\n");
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

        assert_eq!(config.preloading.ttl(), Duration::from_secs(1));
        assert!(config.preloading.enabled);
        assert!(config.ui.inline);
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_load_rejects_unsupported_version() {
        let file = write_config("protocol:\n  version: \"1.0\"\n");
        let err = Config::load(Some(&file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("unsupported protocol version"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/surface-bridge.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let yaml = Config::default().to_yaml().unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_inline_executor_from_config() {
        let ui = UiConfig {
            inline: true,
            ..UiConfig::default()
        };
        assert!(ui.executor().unwrap().is_current());
    }
}
