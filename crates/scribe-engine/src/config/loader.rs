use super::schema::ScribeConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./scribe.yaml
    /// 2. ~/.scribe/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<ScribeConfig, ConfigError> {
        let local_config = PathBuf::from("./scribe.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".scribe").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(ScribeConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<ScribeConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<ScribeConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(ScribeConfig::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
