//! Output side of the rollup engine.
//!
//! - [`DelimitedFormat`] turns projected rows into file bytes.
//! - [`naming`] derives stable file names from prefix, run date and sequence.
//! - [`ObjectStore`] is the seam to the external object store, with a local
//!   directory implementation and an in-memory one for tests.

mod delimited;
pub mod naming;
mod object_store;

pub use delimited::DelimitedFormat;
pub use naming::{content_hash, control_file_name, control_name_prefix, data_file_name};
pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectStore, StoreError, StoreResult};

use thiserror::Error;

/// Errors returned while encoding a file.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The configured format itself is unusable.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A value cannot be represented under the configured quoting rule.
    #[error("row {row}, column {column}: {message}")]
    Serialization {
        row: usize,
        column: String,
        message: String,
    },

    #[error("csv writer error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    fn invalid_format(message: impl Into<String>) -> Self {
        SinkError::InvalidFormat(message.into())
    }
}
