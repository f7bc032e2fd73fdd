//! File emitter: group rows to delimited bytes.

use rollup_db::{AggregationGroup, FileKind, GroupMember};
use rollup_ids::AggregationId;
use rollup_sinks::{content_hash, DelimitedFormat, SinkError};
use tracing::debug;

use crate::engine::ControlSummary;
use crate::error::{AggregationError, Result};

pub const CONTROL_COLUMNS: [&str; 3] = ["FileName", "TotalAmount", "AggregationDataRowCount"];
pub const CONTROL_TOTAL_LABEL: &str = "TOTAL";

/// File bytes ready for the upload tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    pub file_name: String,
    pub aggregation_id: Option<AggregationId>,
    pub kind: FileKind,
    pub bytes: Vec<u8>,
    pub content_hash: String,
    /// Data rows, header excluded.
    pub row_count: usize,
}

/// One data file listed in a control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEntry {
    pub file_name: String,
    pub row_count: usize,
}

pub struct FileEmitter {
    format: DelimitedFormat,
}

impl FileEmitter {
    pub fn new(format: DelimitedFormat) -> Self {
        Self { format }
    }

    /// Encode a claimed group's members, in member order.
    pub fn emit_group(
        &self,
        group: &AggregationGroup,
        members: &[GroupMember],
    ) -> Result<EmittedFile> {
        let rows: Vec<Vec<Option<String>>> = members.iter().map(|m| m.values.clone()).collect();
        let bytes = self
            .format
            .encode(&group.columns, &rows)
            .map_err(|source| serialization(&group.file_name, source))?;

        debug!(
            file_name = %group.file_name,
            rows = rows.len(),
            bytes = bytes.len(),
            "Data file emitted"
        );
        Ok(EmittedFile {
            file_name: group.file_name.clone(),
            aggregation_id: Some(group.aggregation_id.clone()),
            kind: FileKind::Data,
            content_hash: content_hash(&bytes),
            bytes,
            row_count: rows.len(),
        })
    }

    /// Encode a control file: one record per data file, then the `TOTAL` record.
    ///
    /// The content does not depend on the control file's own name; `file_name` only
    /// labels the result and any error.
    pub fn emit_control(
        &self,
        file_name: &str,
        entries: &[ControlEntry],
        summary: &ControlSummary,
    ) -> Result<EmittedFile> {
        let columns: Vec<String> = CONTROL_COLUMNS.iter().map(|c| c.to_string()).collect();
        let total_rows: usize = entries.iter().map(|e| e.row_count).sum();

        let mut rows: Vec<Vec<Option<String>>> = entries
            .iter()
            .map(|e| vec![Some(e.file_name.clone()), None, Some(e.row_count.to_string())])
            .collect();
        rows.push(vec![
            Some(CONTROL_TOTAL_LABEL.to_string()),
            Some(summary.total_amount.clone()),
            Some(total_rows.to_string()),
        ]);

        let bytes = self
            .format
            .encode(&columns, &rows)
            .map_err(|source| serialization(file_name, source))?;

        debug!(file_name, files = entries.len(), rows = total_rows, "Control file emitted");
        Ok(EmittedFile {
            file_name: file_name.to_string(),
            aggregation_id: None,
            kind: FileKind::Control,
            content_hash: content_hash(&bytes),
            bytes,
            row_count: rows.len(),
        })
    }
}

fn serialization(file_name: &str, source: SinkError) -> AggregationError {
    AggregationError::Serialization {
        file_name: file_name.to_string(),
        source,
    }
}
