//! Engine settings loaded from `rollup.toml`.
//!
//! Every field has a default and a missing file means all defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::resolver::PRODUCTION_PREFIXES;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub object_store: ObjectStoreSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    /// Directory standing in for the object store root.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Exact production prefixes a configuration must carry to be selected.
    #[serde(default = "default_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Fresh candidate selections after losing a claim race.
    #[serde(default = "default_max_claim_attempts")]
    pub max_claim_attempts: u32,
}

fn home() -> PathBuf {
    rollup_logging::rollup_home().unwrap_or_else(|_| PathBuf::from(".rollup"))
}

fn default_database_path() -> PathBuf {
    home().join("rollup.sqlite3")
}

fn default_max_connections() -> u32 {
    5
}

fn default_store_root() -> PathBuf {
    home().join("outbox")
}

fn default_bucket() -> String {
    "rollup-upload".to_string()
}

fn default_allowed_prefixes() -> Vec<String> {
    PRODUCTION_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_max_claim_attempts() -> u32 {
    3
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            bucket: default_bucket(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            allowed_prefixes: default_allowed_prefixes(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_claim_attempts: default_max_claim_attempts(),
        }
    }
}

impl Settings {
    /// Default location: `$ROLLUP_HOME/rollup.toml`.
    pub fn default_path() -> PathBuf {
        home().join("rollup.toml")
    }

    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map_err(|err| match err {
            SettingsError::Parse { source, .. } => SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.resolver.allowed_prefixes.iter().all(|p| p.trim().is_empty()) {
            return Err(SettingsError::Invalid(
                "resolver.allowed_prefixes must name at least one prefix".to_string(),
            ));
        }
        if self.pipeline.max_claim_attempts == 0 {
            return Err(SettingsError::Invalid(
                "pipeline.max_claim_attempts must be at least 1".to_string(),
            ));
        }
        if self.object_store.bucket.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "object_store.bucket must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
