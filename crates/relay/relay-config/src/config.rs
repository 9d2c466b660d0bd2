use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct RelayConfig {
    #[serde(default = "defaults::virtual_nodes")]
    pub virtual_nodes: u32,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct BackendSpec {
    pub id: u16,
    #[serde(default = "defaults::weight")]
    pub weight: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn virtual_nodes() -> u32 {
        32
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn weight() -> u32 {
        1
    }
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let relay_config: RelayConfig = toml::from_str(&toml_to_str)?;
        Ok(relay_config)
    }
}
