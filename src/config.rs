use crate::persistence::PersistenceType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Where the tracker keeps its database by default: a dotfile
/// directory, resolved relative to the process working directory
/// unless the caller configures an absolute path.
pub const DEFAULT_DB_PATH: &str = ".chunktrack/transfers.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub persistence_type: PersistenceType,
    /// Cap on pooled SQLite connections. Ignored by the memory backend.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persistence_type: PersistenceType::Sqlite(PathBuf::from(DEFAULT_DB_PATH)),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfigBuilder {
    inner: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: StoreConfig::default(),
        }
    }

    pub fn persistence_type(mut self, p: PersistenceType) -> Self {
        self.inner.persistence_type = p;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.inner.max_connections = n;
        self
    }

    pub fn build(self) -> Result<StoreConfig, StoreConfigError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum StoreConfigError {
    #[error("invalid database path: {0}")]
    InvalidDatabasePath(String),
    #[error("invalid connection limit: {0}")]
    InvalidConnectionLimit(u32),
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), StoreConfigError> {
        if let PersistenceType::Sqlite(path) = &self.persistence_type {
            if path.as_os_str().is_empty() {
                return Err(StoreConfigError::InvalidDatabasePath(
                    "empty path".to_string(),
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(StoreConfigError::InvalidConnectionLimit(
                self.max_connections,
            ));
        }

        Ok(())
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for StoreConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_the_dotfile_database() {
        let config = StoreConfigBuilder::new().build().unwrap();
        match config.persistence_type {
            PersistenceType::Sqlite(path) => {
                assert_eq!(path, PathBuf::from(DEFAULT_DB_PATH));
            }
            other => panic!("unexpected default backend: {other:?}"),
        }
    }

    #[test]
    fn empty_database_path_is_rejected() {
        let err = StoreConfigBuilder::new()
            .persistence_type(PersistenceType::Sqlite(PathBuf::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreConfigError::InvalidDatabasePath(_)));
    }

    #[test]
    fn zero_connections_is_rejected() {
        let err = StoreConfigBuilder::new()
            .max_connections(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreConfigError::InvalidConnectionLimit(0)));
    }

    #[test]
    fn config_parses_from_toml() {
        let config: StoreConfig = r#"
            max_connections = 2

            [persistence_type]
            Sqlite = "/tmp/tracker.db"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.max_connections, 2);
        assert!(matches!(
            config.persistence_type,
            PersistenceType::Sqlite(ref p) if p == &PathBuf::from("/tmp/tracker.db")
        ));
    }
}
