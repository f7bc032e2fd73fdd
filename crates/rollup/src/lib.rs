//! Transaction aggregation and file generation engine.
//!
//! A run resolves one [`AggregationConfiguration`](rollup_db::AggregationConfiguration),
//! selects the transaction lines no earlier run has claimed, partitions them into
//! groups, claims each group durably, writes one delimited file per group and uploads
//! it. The upload flag on a file's detail row is set only after the store accepted it.
//!
//! ```rust,ignore
//! use rollup::{ConfigurationResolver, Pipeline};
//! use rollup_sinks::LocalObjectStore;
//! use std::sync::Arc;
//!
//! let db = rollup_db::RollupDb::open("rollup.sqlite3").await?;
//! let store = Arc::new(LocalObjectStore::new("outbox", "rollup-upload")?);
//! let pipeline = Pipeline::new(db, store, ConfigurationResolver::default());
//!
//! let report = pipeline.execute(Some("PROMO"), chrono::Local::now().date_naive()).await?;
//! ```

pub mod emitter;
pub mod engine;
pub mod error;
pub mod lineage;
pub mod metrics;
pub mod operations;
pub mod pipeline;
pub mod resolver;
pub mod settings;
pub mod upload;

pub use emitter::{ControlEntry, EmittedFile, FileEmitter};
pub use engine::{AggregationPlan, CandidateSet, ControlSummary, PlannedGroup, QueryEngine};
pub use error::{AggregationError, Result};
pub use lineage::LineageRecorder;
pub use metrics::{MetricsSnapshot, METRICS};
pub use pipeline::{Pipeline, ResumeReport, ResumedGroup, RunOutcome, RunReport};
pub use resolver::{
    ConfigurationResolver, ConfigurationStatus, ResolvedConfiguration, PRODUCTION_PREFIXES,
};
pub use settings::{Settings, SettingsError};
pub use upload::UploadTracker;
