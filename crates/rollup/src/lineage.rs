//! Lineage recorder: durable claim of a planned group.

use chrono::NaiveDate;
use rollup_db::{AggregationGroup, DbError, NewAggregationGroup, RollupDb};
use rollup_sinks::data_file_name;
use tracing::{info, warn};

use crate::engine::PlannedGroup;
use crate::error::{AggregationError, Result};
use crate::metrics::METRICS;
use crate::resolver::ResolvedConfiguration;

pub struct LineageRecorder<'a> {
    db: &'a RollupDb,
}

impl<'a> LineageRecorder<'a> {
    pub fn new(db: &'a RollupDb) -> Self {
        Self { db }
    }

    /// Insert the group row and one relation row per member in one transaction.
    ///
    /// If any member is already related to another group nothing is written and
    /// the error is [`AggregationError::DuplicateAggregationClaim`].
    pub async fn record(
        &self,
        resolved: &ResolvedConfiguration,
        run_date: NaiveDate,
        columns: &[String],
        group: &PlannedGroup,
    ) -> Result<AggregationGroup> {
        let prefix = resolved.prefix().to_string();
        let new_group = NewAggregationGroup {
            aggregation_id: group.aggregation_id.clone(),
            aggregation_configuration_id: resolved.config.aggregation_configuration_id,
            run_date,
            group_key: group.group_key.clone(),
            columns: columns.to_vec(),
            members: group.members.clone(),
        };

        match self
            .db
            .claim_group(&new_group, |sequence| data_file_name(&prefix, run_date, sequence))
            .await
        {
            Ok(claimed) => {
                METRICS.record_group_claimed(group.members.len());
                info!(
                    prefix = %prefix,
                    aggregation_id = %claimed.aggregation_id,
                    file_name = %claimed.file_name,
                    rows = group.members.len(),
                    "Group claimed"
                );
                Ok(claimed)
            }
            Err(DbError::AlreadyClaimed {
                transaction_line_id,
            }) => {
                METRICS.inc_duplicate_claims();
                warn!(
                    prefix = %prefix,
                    aggregation_id = %group.aggregation_id,
                    transaction_line_id,
                    "Lost claim race"
                );
                Err(AggregationError::DuplicateAggregationClaim {
                    transaction_line_id,
                })
            }
            Err(other) => Err(other.into()),
        }
    }
}
