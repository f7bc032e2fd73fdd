//! Operational checks used by release and load-test tooling.

use chrono::NaiveDate;
use rollup_db::{DeleteReport, GeneratedFileDetail, GroupMembership, RollupDb};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::resolver::{ConfigurationResolver, ConfigurationStatus};

/// Where a set of lines ended up.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub memberships: Vec<GroupMembership>,
    pub latest_file: Option<GeneratedFileDetail>,
}

impl ValidationReport {
    /// At least one relation row exists and the latest matching file is uploaded.
    pub fn is_complete(&self) -> bool {
        !self.memberships.is_empty()
            && self
                .latest_file
                .as_ref()
                .is_some_and(|f| f.is_uploaded_to_s3)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted: DeleteReport,
    pub files_deleted: u64,
}

/// Relation rows for `line_ids` and the newest file whose name contains `file_pattern`.
pub async fn validation_report(
    db: &RollupDb,
    line_ids: &[i64],
    file_pattern: &str,
) -> Result<ValidationReport> {
    let memberships = db.memberships_for_lines(line_ids).await?;
    let latest_file = db.latest_file_matching(file_pattern).await?;
    Ok(ValidationReport {
        memberships,
        latest_file,
    })
}

/// Whether a line's group has an uploaded data file.
pub async fn is_line_filed(db: &RollupDb, transaction_line_id: i64) -> Result<bool> {
    let Some(relation) = db.relation_for_line(transaction_line_id).await? else {
        return Ok(false);
    };
    Ok(db
        .file_for_group(&relation.aggregation_id)
        .await?
        .is_some_and(|f| f.is_uploaded_to_s3))
}

/// Whether `search` resolves to an active allow-listed configuration on `as_of`.
pub async fn has_active_configuration(
    db: &RollupDb,
    resolver: &ConfigurationResolver,
    search: &str,
    as_of: NaiveDate,
) -> Result<bool> {
    let configs = db.list_configurations().await?;
    Ok(resolver.select(&configs, search, as_of).is_ok())
}

/// Delete transaction trees guarded by a source reference pattern, then optionally
/// the generated file details whose names contain `files_pattern`.
pub async fn cleanup(
    db: &RollupDb,
    transaction_ids: &[i64],
    source_reference_pattern: &str,
    files_pattern: Option<&str>,
) -> Result<CleanupReport> {
    let deleted = db
        .delete_transaction_tree(transaction_ids, source_reference_pattern)
        .await?;
    let files_deleted = match files_pattern {
        Some(pattern) => db.delete_files_matching(pattern).await?,
        None => 0,
    };
    info!(
        transactions = deleted.transactions,
        lines = deleted.lines,
        files = files_deleted,
        "Cleanup finished"
    );
    Ok(CleanupReport {
        deleted,
        files_deleted,
    })
}

/// Render the diagnostic list attached to `ConfigNotFound`.
pub fn format_status_report(report: &[ConfigurationStatus]) -> String {
    if report.is_empty() {
        return "  (no configurations)".to_string();
    }
    report
        .iter()
        .map(|status| format!("  {}", status))
        .collect::<Vec<_>>()
        .join("\n")
}
