//! Command implementations for the `rollup` binary.

pub mod cleanup;
pub mod error;
pub mod run;
pub mod validate;
pub mod verify;

use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use rollup::{ConfigurationResolver, Pipeline, Settings};
use rollup_db::RollupDb;
use rollup_sinks::LocalObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use self::error::HelpfulError;

/// Settings plus command-line overrides, shared by every command.
pub struct Context {
    pub settings: Settings,
    pub db_path: PathBuf,
}

impl Context {
    pub fn load(config: Option<&Path>, db_override: Option<PathBuf>) -> Result<Self> {
        let path = config
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_path);
        let settings = Settings::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        let db_path = db_override.unwrap_or_else(|| settings.database.path.clone());
        Ok(Self { settings, db_path })
    }

    pub fn runtime(&self) -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")
    }

    pub async fn open_db(&self) -> Result<RollupDb> {
        RollupDb::open_with(&self.db_path, self.settings.database.max_connections)
            .await
            .map_err(|e| {
                anyhow::Error::from(
                    HelpfulError::new("Failed to open database")
                        .with_context(format!("Database: {}", self.db_path.display()))
                        .with_suggestion(format!("Error: {}", e))
                        .with_suggestion("TRY: Check file permissions")
                        .with_suggestion("TRY: Pass --db or set ROLLUP_DB"),
                )
            })
    }

    pub fn resolver(&self) -> ConfigurationResolver {
        ConfigurationResolver::new(self.settings.resolver.allowed_prefixes.iter().cloned())
    }

    pub fn pipeline(&self, db: RollupDb) -> Result<Pipeline> {
        let store = LocalObjectStore::new(
            &self.settings.object_store.root,
            &self.settings.object_store.bucket,
        )
        .context("Invalid object store settings")?;
        Ok(Pipeline::new(db, Arc::new(store), self.resolver())
            .with_max_claim_attempts(self.settings.pipeline.max_claim_attempts))
    }
}

/// `--as-of` value, defaulting to today's local date.
pub fn as_of_or_today(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| chrono::Local::now().date_naive())
}

/// Parse `1,2, 3` into ids.
pub fn parse_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                anyhow::Error::from(
                    HelpfulError::new(format!("Invalid id: {}", s)).with_suggestion(
                        "TRY: Pass a comma-separated list of integers, e.g. 101,102",
                    ),
                )
            })
        })
        .collect()
}
