use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::connection::ConnectionConfig;
use crate::schema::DEFAULT_CONNECTION;
use crate::OrmError;

/// Environment variable prefix for overrides, e.g. `UVICORE__DATABASE__DEFAULT`.
pub const ENV_PREFIX: &str = "UVICORE";

/// Transaction boundaries for calls persisting several root graphs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One transaction per root graph; a failed root leaves earlier siblings committed.
    #[default]
    PerRoot,
    /// One transaction spanning every root in the call.
    AllOrNothing,
    /// No transactions; statements commit as they run.
    Autocommit,
}

/// The `database` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrmConfig {
    #[serde(default = "default_connection")]
    pub default: String,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
    #[serde(default)]
    pub batch_mode: BatchMode,
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            default: default_connection(),
            connections: HashMap::new(),
            batch_mode: BatchMode::default(),
        }
    }
}

impl OrmConfig {
    /// A config with one connection registered as the default.
    pub fn single(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config
            .connections
            .insert(config.default.clone(), ConnectionConfig::from(url.into()));
        config
    }

    /// Load the `database` section from an optional TOML file, then
    /// `UVICORE__DATABASE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, OrmError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?;

        let config = match settings.get::<OrmConfig>("database") {
            Ok(config) => config,
            Err(config::ConfigError::NotFound(_)) => OrmConfig::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        tracing::debug!(
            default = %config.default,
            connections = config.connections.len(),
            batch_mode = ?config.batch_mode,
            "database configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrmError> {
        if !self.connections.is_empty() && !self.connections.contains_key(&self.default) {
            return Err(OrmError::Configuration(format!(
                "Default connection '{}' is not configured",
                self.default
            )));
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig, OrmError> {
        self.connections
            .get(name)
            .ok_or_else(|| OrmError::UnknownConnection(name.to_string()))
    }
}
