use crate::error::TopicStoreError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

/// Engine switches that change merge and mutation behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Merge topics whose identifiers collide. When off, the colliding mutation is rolled back
    /// and reported as an identity constraint violation.
    pub auto_merge: bool,
    /// Reject every mutating call.
    pub read_only: bool,
    /// Mirror `add_type` / `remove_type` into type-instance associations.
    pub type_instance_associations: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            auto_merge: true,
            read_only: false,
            type_instance_associations: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on live constructs held per topic map. Forwarding tombstones are not counted.
    pub cache_capacity: usize,
    pub features: Features,
    pub backend: Backend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_capacity: 4096,
            features: Features::default(),
            backend: Backend::Memory,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), TopicStoreError> {
        if self.cache_capacity == 0 {
            return Err(TopicStoreError::Config(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<StoreConfig, TopicStoreError>;
    fn save(&self, config: &StoreConfig) -> Result<(), TopicStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<StoreConfig, TopicStoreError> {
        tracing::debug!("Attempting to read store config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(StoreConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: StoreConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn save(&self, config: &StoreConfig) -> Result<(), TopicStoreError> {
        tracing::debug!("Attempting to write store config to: {:?}", &self.path);
        config.validate()?;
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
            cache_capacity = 16

            [features]
            auto_merge = false

            [backend]
            kind = "sqlite"
            path = "/tmp/topics.db"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.cache_capacity, 16);
        assert!(!config.features.auto_merge);
        assert!(!config.features.read_only);
        assert_eq!(
            config.backend,
            Backend::Sqlite {
                path: PathBuf::from("/tmp/topics.db")
            }
        );
    }

    #[test]
    fn provider_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = TomlConfigProvider::new(dir.path().join("topicstore.toml"));
        assert_eq!(provider.load().expect("defaults"), StoreConfig::default());

        let mut config = StoreConfig::default();
        config.features.type_instance_associations = true;
        provider.save(&config).expect("saved");
        assert_eq!(provider.load().expect("reloaded"), config);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = StoreConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TopicStoreError::Config(_))));
    }
}
