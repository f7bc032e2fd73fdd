//! Aggregation query engine.
//!
//! Runs a configuration's selection query with already-claimed lines excluded,
//! checks the control query, and partitions the candidates into disjoint groups
//! keyed by the configuration's business key.

use rollup_db::sql_guard::wrap_as_subquery;
use rollup_db::{AggregationConfiguration, DbError, GroupMember, QueryRows, RollupDb};
use rollup_ids::AggregationId;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{AggregationError, Result};
use crate::metrics::METRICS;

/// Column every selection query must project.
pub const LINE_ID_COLUMN: &str = "transaction_line_id";

const CONTROL_TOTAL_COLUMN: &str = "total_amount";
const CONTROL_LINE_COUNT_COLUMN: &str = "line_count";
const CONTROL_VIOLATION_COLUMN: &str = "violation_count";

/// Unclaimed lines returned by the selection query.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    /// File columns: the projection minus the line id, in projection order.
    pub columns: Vec<String>,
    /// Sorted by line id.
    pub rows: Vec<GroupMember>,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The single row a control query returns, once it passed its checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSummary {
    pub total_amount: String,
    pub line_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PlannedGroup {
    pub aggregation_id: AggregationId,
    /// `column=value` pairs joined with `;`, empty for a single group.
    pub group_key: String,
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationPlan {
    pub columns: Vec<String>,
    pub groups: Vec<PlannedGroup>,
    pub control: Option<ControlSummary>,
}

impl AggregationPlan {
    pub fn candidate_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }
}

pub struct QueryEngine<'a> {
    db: &'a RollupDb,
}

impl<'a> QueryEngine<'a> {
    pub fn new(db: &'a RollupDb) -> Self {
        Self { db }
    }

    /// Select, check and group. Nothing is written.
    pub async fn plan(&self, config: &AggregationConfiguration) -> Result<AggregationPlan> {
        let candidates = self.select_candidates(config).await?;
        if candidates.is_empty() {
            info!(prefix = %config.file_name_prefix, "No eligible lines");
            return Ok(AggregationPlan::default());
        }

        let control = self.check_control(config, &candidates).await?;
        let mut plan = group_candidates(config, candidates)?;
        plan.control = control;

        info!(
            prefix = %config.file_name_prefix,
            rows = plan.candidate_count(),
            groups = plan.groups.len(),
            "Aggregation planned"
        );
        Ok(plan)
    }

    /// Run the selection query, excluding lines that already have a relation row.
    pub async fn select_candidates(
        &self,
        config: &AggregationConfiguration,
    ) -> Result<CandidateSet> {
        let prefix = &config.file_name_prefix;
        let sql = wrap_as_subquery(
            &config.aggregation_query,
            "_candidates",
            &format!(
                "WHERE {col} NOT IN (SELECT {col} FROM transaction_aggregation_relation)",
                col = LINE_ID_COLUMN
            ),
        );

        let start = Instant::now();
        let result = self.db.query_read_only(&sql).await;
        METRICS.record_query_time(start);
        let rows = result.map_err(|e| query_error(prefix, e))?;

        debug!(prefix = %prefix, rows = rows.rows.len(), "Selection query returned");
        candidates_from_rows(prefix, rows)
    }

    /// Run the control query, if any, and check it against the candidates.
    pub async fn check_control(
        &self,
        config: &AggregationConfiguration,
        candidates: &CandidateSet,
    ) -> Result<Option<ControlSummary>> {
        let Some(sql) = config
            .data_control_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
        else {
            return Ok(None);
        };

        let prefix = &config.file_name_prefix;
        let start = Instant::now();
        let result = self.db.query_read_only(sql).await;
        METRICS.record_query_time(start);
        let rows = result.map_err(|e| query_error(prefix, e))?;

        evaluate_control(prefix, &rows, candidates.len()).map(Some)
    }
}

fn query_error(prefix: &str, err: DbError) -> AggregationError {
    match err {
        DbError::ReadOnly(e) => {
            AggregationError::config_invalid(format!("{} query rejected: {}", prefix, e))
        }
        other => AggregationError::QueryExecution {
            prefix: prefix.to_string(),
            source: other,
        },
    }
}

fn violation(prefix: &str, message: impl Into<String>) -> AggregationError {
    AggregationError::DataQualityViolation {
        prefix: prefix.to_string(),
        message: message.into(),
    }
}

pub(crate) fn candidates_from_rows(prefix: &str, rows: QueryRows) -> Result<CandidateSet> {
    if rows.is_empty() {
        return Ok(CandidateSet::default());
    }

    let id_idx = rows.column_index(LINE_ID_COLUMN).ok_or_else(|| {
        AggregationError::config_invalid(format!(
            "{} selection query does not project {}",
            prefix, LINE_ID_COLUMN
        ))
    })?;

    let columns: Vec<String> = rows
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != id_idx)
        .map(|(_, c)| c.clone())
        .collect();
    if columns.is_empty() {
        return Err(AggregationError::config_invalid(format!(
            "{} selection query projects no file columns",
            prefix
        )));
    }

    let mut seen = HashSet::with_capacity(rows.rows.len());
    let mut members = Vec::with_capacity(rows.rows.len());
    for (row_number, mut row) in rows.rows.into_iter().enumerate() {
        let raw_id = row.remove(id_idx).ok_or_else(|| {
            violation(prefix, format!("row {} has no {}", row_number + 1, LINE_ID_COLUMN))
        })?;
        let line_id: i64 = raw_id.trim().parse().map_err(|_| {
            violation(
                prefix,
                format!("row {} has a non-integer {} {:?}", row_number + 1, LINE_ID_COLUMN, raw_id),
            )
        })?;
        if !seen.insert(line_id) {
            return Err(violation(
                prefix,
                format!("line {} selected more than once", line_id),
            ));
        }
        members.push(GroupMember {
            transaction_line_id: line_id,
            values: row,
        });
    }
    members.sort_by_key(|m| m.transaction_line_id);

    Ok(CandidateSet {
        columns,
        rows: members,
    })
}

pub(crate) fn evaluate_control(
    prefix: &str,
    rows: &QueryRows,
    candidates: usize,
) -> Result<ControlSummary> {
    if rows.rows.len() != 1 {
        return Err(violation(
            prefix,
            format!("control query returned {} rows, expected 1", rows.rows.len()),
        ));
    }
    let row = &rows.rows[0];

    let total_idx = rows.column_index(CONTROL_TOTAL_COLUMN).unwrap_or(0);
    let total_amount = row
        .get(total_idx)
        .cloned()
        .flatten()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| violation(prefix, "control total is empty"))?;

    let line_count = match rows.column_index(CONTROL_LINE_COUNT_COLUMN) {
        Some(idx) => {
            let raw = row.get(idx).cloned().flatten().unwrap_or_default();
            let count: u64 = raw.trim().parse().map_err(|_| {
                violation(prefix, format!("control line_count {:?} is not a count", raw))
            })?;
            if count != candidates as u64 {
                return Err(violation(
                    prefix,
                    format!(
                        "control line_count {} does not match {} selected lines",
                        count, candidates
                    ),
                ));
            }
            Some(count)
        }
        None => None,
    };

    if let Some(idx) = rows.column_index(CONTROL_VIOLATION_COLUMN) {
        let raw = row.get(idx).cloned().flatten().unwrap_or_default();
        if raw.trim() != "0" {
            return Err(violation(
                prefix,
                format!("control reports violation_count {}", raw),
            ));
        }
    }

    Ok(ControlSummary {
        total_amount: total_amount.trim().to_string(),
        line_count,
    })
}

/// Partition candidates by the configured key columns.
///
/// Groups come out ordered by key and members by line id, so the same candidates
/// always give the same partition.
pub fn group_candidates(
    config: &AggregationConfiguration,
    candidates: CandidateSet,
) -> Result<AggregationPlan> {
    let prefix = &config.file_name_prefix;

    let mut key_indexes = Vec::with_capacity(config.group_key_columns.len());
    for key in &config.group_key_columns {
        let idx = candidates
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(key))
            .ok_or_else(|| {
                AggregationError::config_invalid(format!(
                    "{} group key column {} is not projected by the selection query",
                    prefix, key
                ))
            })?;
        key_indexes.push(idx);
    }

    let mut buckets: BTreeMap<Vec<Option<String>>, Vec<GroupMember>> = BTreeMap::new();
    for member in candidates.rows {
        let key: Vec<Option<String>> = key_indexes
            .iter()
            .map(|&idx| member.values.get(idx).cloned().flatten())
            .collect();
        buckets.entry(key).or_default().push(member);
    }

    let groups = buckets
        .into_iter()
        .map(|(key, members)| PlannedGroup {
            aggregation_id: AggregationId::new(),
            group_key: key_indexes
                .iter()
                .zip(key.iter())
                .map(|(&idx, value)| {
                    format!(
                        "{}={}",
                        candidates.columns[idx],
                        value.as_deref().unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join(";"),
            members,
        })
        .collect();

    Ok(AggregationPlan {
        columns: candidates.columns,
        groups,
        control: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn rows(columns: &[&str], data: &[&[Option<&str>]]) -> QueryRows {
        QueryRows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: data
                .iter()
                .map(|r| r.iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        }
    }

    fn config(keys: &[&str]) -> AggregationConfiguration {
        AggregationConfiguration {
            aggregation_configuration_id: 1,
            file_name_prefix: "JWN_SALES_RETAIL".to_string(),
            file_delimiter: ",".to_string(),
            is_data_quotes_surrounded: false,
            aggregation_query: "SELECT 1".to_string(),
            data_control_query: None,
            group_key_columns: keys.iter().map(|k| k.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_candidates_drop_line_id_and_sort() {
        let set = candidates_from_rows(
            "P",
            rows(
                &["store", "transaction_line_id", "amount"],
                &[
                    &[Some("2"), Some("11"), Some("5.00")],
                    &[Some("1"), Some("10"), Some("7.50")],
                ],
            ),
        )
        .unwrap();

        assert_eq!(set.columns, vec!["store", "amount"]);
        assert_eq!(set.rows[0].transaction_line_id, 10);
        assert_eq!(
            set.rows[0].values,
            vec![Some("1".to_string()), Some("7.50".to_string())]
        );
    }

    #[test]
    fn test_duplicate_line_is_a_violation() {
        let err = candidates_from_rows(
            "P",
            rows(
                &["transaction_line_id", "a"],
                &[&[Some("1"), Some("x")], &[Some("1"), Some("y")]],
            ),
        )
        .unwrap_err();
        assert!(matches!(err, AggregationError::DataQualityViolation { .. }));
    }

    #[test]
    fn test_missing_line_id_column_is_invalid() {
        let err = candidates_from_rows("P", rows(&["a"], &[&[Some("x")]])).unwrap_err();
        assert!(matches!(err, AggregationError::ConfigInvalid(_)));
    }

    #[test]
    fn test_grouping_is_exhaustive_and_disjoint() {
        let set = candidates_from_rows(
            "P",
            rows(
                &["transaction_line_id", "store", "amount"],
                &[
                    &[Some("1"), Some("0002"), Some("1.00")],
                    &[Some("2"), Some("0001"), Some("2.00")],
                    &[Some("3"), Some("0002"), Some("3.00")],
                    &[Some("4"), None, Some("4.00")],
                ],
            ),
        )
        .unwrap();

        let plan = group_candidates(&config(&["STORE"]), set).unwrap();
        let keys: Vec<&str> = plan.groups.iter().map(|g| g.group_key.as_str()).collect();
        assert_eq!(keys, vec!["store=", "store=0001", "store=0002"]);

        let mut all: Vec<i64> = plan
            .groups
            .iter()
            .flat_map(|g| g.members.iter().map(|m| m.transaction_line_id))
            .collect();
        all.sort();
        assert_eq!(all, vec![1, 2, 3, 4]);
        assert_eq!(plan.candidate_count(), 4);
    }

    #[test]
    fn test_no_key_columns_means_one_group() {
        let set = candidates_from_rows(
            "P",
            rows(
                &["transaction_line_id", "a"],
                &[&[Some("1"), Some("x")], &[Some("2"), Some("y")]],
            ),
        )
        .unwrap();
        let plan = group_candidates(&config(&[]), set).unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].group_key, "");
    }

    #[test]
    fn test_unknown_key_column_is_invalid() {
        let set = candidates_from_rows(
            "P",
            rows(&["transaction_line_id", "a"], &[&[Some("1"), Some("x")]]),
        )
        .unwrap();
        assert!(matches!(
            group_candidates(&config(&["store"]), set),
            Err(AggregationError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_control_checks() {
        let ok = rows(&["total_amount", "line_count"], &[&[Some("30.00"), Some("3")]]);
        assert_eq!(
            evaluate_control("P", &ok, 3).unwrap(),
            ControlSummary {
                total_amount: "30.00".to_string(),
                line_count: Some(3)
            }
        );

        let count_mismatch = rows(&["total_amount", "line_count"], &[&[Some("30.00"), Some("2")]]);
        assert!(evaluate_control("P", &count_mismatch, 3).is_err());

        let empty_total = rows(&["total_amount"], &[&[None]]);
        assert!(evaluate_control("P", &empty_total, 3).is_err());

        let flagged = rows(&["total", "violation_count"], &[&[Some("1"), Some("2")]]);
        assert!(evaluate_control("P", &flagged, 3).is_err());

        let first_column = rows(&["sum_amount"], &[&[Some("12.5")]]);
        assert_eq!(evaluate_control("P", &first_column, 1).unwrap().total_amount, "12.5");

        assert!(evaluate_control("P", &QueryRows::default(), 1).is_err());
    }
}
