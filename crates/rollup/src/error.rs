//! Error taxonomy of an aggregation run.

use chrono::NaiveDate;
use rollup_db::DbError;
use rollup_sinks::{SinkError, StoreError};
use thiserror::Error;

use crate::resolver::ConfigurationStatus;

pub type Result<T> = std::result::Result<T, AggregationError>;

#[derive(Debug, Error)]
pub enum AggregationError {
    /// No allow-listed configuration matching the search is active on the date.
    /// `report` lists every configuration with its status.
    #[error("no active configuration matches {search:?} on {as_of}")]
    ConfigNotFound {
        search: String,
        as_of: NaiveDate,
        report: Vec<ConfigurationStatus>,
    },

    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("query for {prefix} failed: {source}")]
    QueryExecution {
        prefix: String,
        #[source]
        source: DbError,
    },

    #[error("data quality violation for {prefix}: {message}")]
    DataQualityViolation { prefix: String, message: String },

    #[error("transaction line {transaction_line_id} is already claimed by another aggregation")]
    DuplicateAggregationClaim { transaction_line_id: i64 },

    #[error("cannot serialize {file_name}: {source}")]
    Serialization {
        file_name: String,
        #[source]
        source: SinkError,
    },

    #[error("upload of {file_name} failed: {source}")]
    Upload {
        file_name: String,
        #[source]
        source: StoreError,
    },

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl AggregationError {
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    /// Short stable label, used in outcome lines and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::QueryExecution { .. } => "query_execution",
            Self::DataQualityViolation { .. } => "data_quality_violation",
            Self::DuplicateAggregationClaim { .. } => "duplicate_aggregation_claim",
            Self::Serialization { .. } => "serialization",
            Self::Upload { .. } => "upload",
            Self::Database(_) => "database",
        }
    }
}
