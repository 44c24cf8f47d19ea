use std::path::{Path, PathBuf};

use charla_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

/// Loads the TOML config file and applies environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Default config location: `~/.charla/charla.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".charla")
            .join("charla.toml")
    }

    /// Default data directory for the database and sidecar auth state.
    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".charla")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    fn apply_env_overrides(config: &mut AppConfig) {
        if let Ok(port) = std::env::var("CHARLA_PORT")
            && let Ok(port) = port.parse()
        {
            config.gateway.port = port;
        }
        if let Ok(host) = std::env::var("CHARLA_HOST") {
            config.gateway.host = host;
        }
        if let Ok(path) = std::env::var("CHARLA_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY")
            && !key.is_empty()
        {
            config.llm.api_key = Some(key);
        }
    }
}
