//! CLI configuration file and backend selection.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tessera_backend::BackendConfig;
use tessera_registry::RegistryConfig;

/// Local directory used when neither `--backend` nor `[backend]` is given.
pub const DEFAULT_ROOT: &str = ".tessera";

/// Contents of the `--config` file.
///
/// ```toml
/// [backend]
/// kind = "s3"
/// bucket = "models"
/// prefix = "registry"
///
/// [registry]
/// lock_timeout = 10
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: Option<BackendConfig>,
    pub registry: RegistryConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `--backend` wins over the config file, which wins over [`DEFAULT_ROOT`].
    pub fn backend_config(&self, uri: Option<&str>) -> anyhow::Result<BackendConfig> {
        match (uri, &self.backend) {
            (Some(uri), _) => Ok(BackendConfig::from_uri(uri)?),
            (None, Some(config)) => Ok(config.clone()),
            (None, None) => Ok(BackendConfig::local(DEFAULT_ROOT)),
        }
    }
}
