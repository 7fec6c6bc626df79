use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config_store_error::ConfigStoreError;
use crate::profile_config::ProfileConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    profiles: BTreeMap<String, ProfileConfig>,
}

impl ConfigFile {
    pub fn load() -> Result<Self, ConfigStoreError> {
        Self::load_from(&config_path()?)
    }

    /// Reads `path`, treating a missing file as an empty configuration.
    pub fn load_from(path: &Path) -> Result<Self, ConfigStoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }

    #[must_use]
    pub const fn profiles(&self) -> &BTreeMap<String, ProfileConfig> {
        &self.profiles
    }

    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, ConfigStoreError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigStoreError::UnknownProfile(name.to_string()))
    }
}

pub fn config_path() -> Result<PathBuf, ConfigStoreError> {
    let home = std::env::var_os("HOME").ok_or(ConfigStoreError::MissingHome)?;
    let mut path = PathBuf::from(home);
    path.push(".config");
    path.push("mediatranslation.toml");
    Ok(path)
}
