//! Configuration resolver: picks the one configuration a run uses.
//!
//! A configuration qualifies when its prefix contains the search term
//! (case-insensitive), its window covers the as-of date, and its prefix is exactly
//! one of the allow-listed production prefixes. Test look-alikes such as
//! `JWN_SALES_PROMO_Integration_Test` match the search but never the allow-list.

use chrono::NaiveDate;
use rollup_db::sql_guard::validate_read_only;
use rollup_db::{AggregationConfiguration, RollupDb};
use rollup_sinks::DelimitedFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{AggregationError, Result};

pub const PRODUCTION_PREFIXES: [&str; 4] = [
    "JWN_SALES_RETAIL",
    "JWN_SALES_RESTAURANT",
    "JWN_SALES_MARKETPLACE",
    "JWN_SALES_PROMO",
];

/// One line of the diagnostic report attached to `ConfigNotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationStatus {
    pub aggregation_configuration_id: i64,
    pub file_name_prefix: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
    pub allow_listed: bool,
}

impl std::fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let end = self
            .end_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "open".to_string());
        write!(
            f,
            "{:>5}  {:<40} {} .. {:<10}  {:<8} {}",
            self.aggregation_configuration_id,
            self.file_name_prefix,
            self.start_date,
            end,
            if self.active { "ACTIVE" } else { "INACTIVE" },
            if self.allow_listed { "valid" } else { "ignored" },
        )
    }
}

/// A selected configuration whose queries and format have been checked.
#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    pub config: AggregationConfiguration,
    pub format: DelimitedFormat,
}

impl ResolvedConfiguration {
    pub fn prefix(&self) -> &str {
        &self.config.file_name_prefix
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationResolver {
    allowed_prefixes: Vec<String>,
}

impl Default for ConfigurationResolver {
    fn default() -> Self {
        Self::new(PRODUCTION_PREFIXES)
    }
}

impl ConfigurationResolver {
    pub fn new<I, S>(allowed_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_prefixes: allowed_prefixes
                .into_iter()
                .map(|p| {
                    let p: String = p.into();
                    p.trim().to_string()
                })
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn allowed_prefixes(&self) -> &[String] {
        &self.allowed_prefixes
    }

    pub fn is_allow_listed(&self, prefix: &str) -> bool {
        self.allowed_prefixes.iter().any(|p| p == prefix)
    }

    /// Load configurations and select one for `search` as of `as_of`.
    pub async fn resolve(
        &self,
        db: &RollupDb,
        search: &str,
        as_of: NaiveDate,
    ) -> Result<ResolvedConfiguration> {
        let configs = db.list_configurations().await?;
        let resolved = self.select(&configs, search, as_of)?;
        info!(
            search,
            prefix = %resolved.config.file_name_prefix,
            configuration_id = resolved.config.aggregation_configuration_id,
            "Configuration resolved"
        );
        Ok(resolved)
    }

    /// Select from an already loaded list (most recently created first or not).
    pub fn select(
        &self,
        configs: &[AggregationConfiguration],
        search: &str,
        as_of: NaiveDate,
    ) -> Result<ResolvedConfiguration> {
        let term = search.trim().to_uppercase();

        let mut candidates: Vec<&AggregationConfiguration> = configs
            .iter()
            .filter(|c| {
                !term.is_empty()
                    && c.file_name_prefix.to_uppercase().contains(&term)
                    && c.is_active_on(as_of)
                    && self.is_allow_listed(&c.file_name_prefix)
            })
            .collect();

        if candidates.is_empty() {
            return Err(AggregationError::ConfigNotFound {
                search: search.to_string(),
                as_of,
                report: self.status_report(configs, as_of),
            });
        }

        // Overlapping windows for one prefix are an operator error, never a pick.
        let mut by_prefix: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for c in &candidates {
            by_prefix
                .entry(c.file_name_prefix.as_str())
                .or_default()
                .push(c.aggregation_configuration_id);
        }
        if let Some((prefix, ids)) = by_prefix.iter().find(|(_, ids)| ids.len() > 1) {
            return Err(AggregationError::config_invalid(format!(
                "{} configurations for {} are active on {}: ids {:?}",
                ids.len(),
                prefix,
                as_of,
                ids
            )));
        }

        candidates.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.aggregation_configuration_id.cmp(&a.aggregation_configuration_id))
        });
        let selected = candidates[0];
        if candidates.len() > 1 {
            let passed_over: Vec<&str> = candidates[1..]
                .iter()
                .map(|c| c.file_name_prefix.as_str())
                .collect();
            warn!(
                search,
                selected = %selected.file_name_prefix,
                ?passed_over,
                "Search matched several production prefixes; using the most recently created"
            );
        }

        validate(selected)
    }

    /// Every configuration with its status on `as_of`.
    pub fn status_report(
        &self,
        configs: &[AggregationConfiguration],
        as_of: NaiveDate,
    ) -> Vec<ConfigurationStatus> {
        configs
            .iter()
            .map(|c| ConfigurationStatus {
                aggregation_configuration_id: c.aggregation_configuration_id,
                file_name_prefix: c.file_name_prefix.clone(),
                start_date: c.start_date,
                end_date: c.end_date,
                active: c.is_active_on(as_of),
                allow_listed: self.is_allow_listed(&c.file_name_prefix),
            })
            .collect()
    }

    /// Allow-listed prefixes with at least one configuration active on `as_of`.
    pub async fn active_prefixes(&self, db: &RollupDb, as_of: NaiveDate) -> Result<Vec<String>> {
        let mut prefixes: Vec<String> = db
            .list_active_configurations(as_of)
            .await?
            .into_iter()
            .map(|c| c.file_name_prefix)
            .filter(|p| self.is_allow_listed(p))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Ok(prefixes)
    }
}

fn validate(config: &AggregationConfiguration) -> Result<ResolvedConfiguration> {
    let prefix = &config.file_name_prefix;

    if config.aggregation_query.trim().is_empty() {
        return Err(AggregationError::config_invalid(format!(
            "{} has an empty aggregation query",
            prefix
        )));
    }
    validate_read_only(&config.aggregation_query).map_err(|e| {
        AggregationError::config_invalid(format!("{} aggregation query: {}", prefix, e))
    })?;

    if let Some(control) = config.data_control_query.as_deref() {
        if !control.trim().is_empty() {
            validate_read_only(control).map_err(|e| {
                AggregationError::config_invalid(format!("{} control query: {}", prefix, e))
            })?;
        }
    }

    let format = DelimitedFormat::new(&config.file_delimiter, config.is_data_quotes_surrounded)
        .map_err(|e| AggregationError::config_invalid(format!("{}: {}", prefix, e)))?;

    Ok(ResolvedConfiguration {
        config: config.clone(),
        format,
    })
}
