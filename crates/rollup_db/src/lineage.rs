//! Aggregation groups and relation rows.
//!
//! A group and all of its relation rows are written in one database transaction.
//! The UNIQUE index on `transaction_aggregation_relation.transaction_line_id` makes
//! a second claim of any member fail the whole group.

use crate::error::{classify, is_unique_violation, DbError, Result};
use crate::types::*;
use crate::{format_date, parse_date, RollupDb};
use rollup_ids::AggregationId;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

impl RollupDb {
    /// Atomically claim a group: insert the group row and one relation row per member.
    ///
    /// The group's sequence is the next free one for the configuration's prefix on
    /// `run_date`; `file_name_for` turns it into the file name stored with the group.
    /// Fails with [`DbError::AlreadyClaimed`] if any member already has a relation row,
    /// in which case nothing is written.
    pub async fn claim_group<F>(
        &self,
        group: &NewAggregationGroup,
        file_name_for: F,
    ) -> Result<AggregationGroup>
    where
        F: FnOnce(u32) -> String,
    {
        if group.members.is_empty() {
            return Err(DbError::invalid_state(format!(
                "group {} has no members",
                group.aggregation_id
            )));
        }

        let now = Self::now_millis();
        let run_date = format_date(group.run_date);
        let columns_json = serde_json::to_string(&group.columns)?;
        let mut tx = self.pool.begin().await?;

        // Write first so the lock is held before the sequence is read back.
        sqlx::query(
            r#"
            INSERT INTO aggregation_group (
                aggregation_id, aggregation_configuration_id, run_date, sequence,
                file_name, group_key, column_names, created_datetime
            )
            VALUES (?, ?, ?, (
                SELECT COALESCE(MAX(g.sequence), 0) + 1
                FROM aggregation_group g
                JOIN aggregation_configuration c
                    ON c.aggregation_configuration_id = g.aggregation_configuration_id
                WHERE g.run_date = ?
                  AND c.file_name_prefix = (
                      SELECT file_name_prefix FROM aggregation_configuration
                      WHERE aggregation_configuration_id = ?
                  )
            ), ?, ?, ?, ?)
            "#,
        )
        .bind(group.aggregation_id.as_str())
        .bind(group.aggregation_configuration_id)
        .bind(&run_date)
        .bind(&run_date)
        .bind(group.aggregation_configuration_id)
        .bind(group.aggregation_id.as_str())
        .bind(&group.group_key)
        .bind(&columns_json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        let sequence: i64 =
            sqlx::query_scalar("SELECT sequence FROM aggregation_group WHERE aggregation_id = ?")
                .bind(group.aggregation_id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let sequence = u32::try_from(sequence).map_err(|_| {
            DbError::invalid_state(format!("sequence {} out of range", sequence))
        })?;

        let file_name = file_name_for(sequence);
        sqlx::query("UPDATE aggregation_group SET file_name = ? WHERE aggregation_id = ?")
            .bind(&file_name)
            .bind(group.aggregation_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        for (position, member) in group.members.iter().enumerate() {
            let values = serde_json::to_string(&member.values)?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO transaction_aggregation_relation (
                    aggregation_id, transaction_line_id, row_position, row_values,
                    is_published_to_data_platform, created_datetime
                )
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(group.aggregation_id.as_str())
            .bind(member.transaction_line_id)
            .bind(position as i64)
            .bind(&values)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    warn!(
                        aggregation_id = %group.aggregation_id,
                        transaction_line_id = member.transaction_line_id,
                        "Line already claimed; group rolled back"
                    );
                    return Err(DbError::AlreadyClaimed {
                        transaction_line_id: member.transaction_line_id,
                    });
                }
                return Err(classify(err));
            }
        }

        tx.commit().await?;

        debug!(
            aggregation_id = %group.aggregation_id,
            file_name = %file_name,
            members = group.members.len(),
            "Group claimed"
        );

        Ok(AggregationGroup {
            aggregation_id: group.aggregation_id.clone(),
            aggregation_configuration_id: group.aggregation_configuration_id,
            run_date: group.run_date,
            sequence,
            file_name,
            group_key: group.group_key.clone(),
            columns: group.columns.clone(),
            created_at: Self::millis_to_datetime(now),
        })
    }

    /// Get a claimed group by id.
    pub async fn get_group(
        &self,
        aggregation_id: &AggregationId,
    ) -> Result<Option<AggregationGroup>> {
        let row = sqlx::query("SELECT * FROM aggregation_group WHERE aggregation_id = ?")
            .bind(aggregation_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_group).transpose()
    }

    /// Members of a group in file order, with their stored projected values.
    pub async fn group_members(&self, aggregation_id: &AggregationId) -> Result<Vec<GroupMember>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_line_id, row_values FROM transaction_aggregation_relation
            WHERE aggregation_id = ?
            ORDER BY row_position
            "#,
        )
        .bind(aggregation_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let values: String = row.try_get("row_values")?;
                Ok(GroupMember {
                    transaction_line_id: row.try_get("transaction_line_id")?,
                    values: serde_json::from_str(&values)?,
                })
            })
            .collect()
    }

    /// Relation rows of a group.
    pub async fn list_relations(
        &self,
        aggregation_id: &AggregationId,
    ) -> Result<Vec<AggregationRelation>> {
        let rows = sqlx::query(
            "SELECT * FROM transaction_aggregation_relation WHERE aggregation_id = ? ORDER BY row_position",
        )
        .bind(aggregation_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_relation).collect()
    }

    /// The relation row of a line, if it has been aggregated.
    pub async fn relation_for_line(
        &self,
        transaction_line_id: i64,
    ) -> Result<Option<AggregationRelation>> {
        let row = sqlx::query(
            "SELECT * FROM transaction_aggregation_relation WHERE transaction_line_id = ?",
        )
        .bind(transaction_line_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_relation).transpose()
    }

    /// Groups that the given lines belong to, with how many of the lines each holds.
    pub async fn memberships_for_lines(&self, line_ids: &[i64]) -> Result<Vec<GroupMembership>> {
        if line_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT aggregation_id, COUNT(*) AS line_count FROM transaction_aggregation_relation \
             WHERE transaction_line_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in line_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") GROUP BY aggregation_id ORDER BY aggregation_id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("aggregation_id")?;
                let count: i64 = row.try_get("line_count")?;
                Ok(GroupMembership {
                    aggregation_id: parse_aggregation_id(&id)?,
                    line_count: count.max(0) as u64,
                })
            })
            .collect()
    }

    /// Total number of relation rows.
    pub async fn count_relations(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transaction_aggregation_relation")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Claimed groups that have no uploaded data file yet, oldest first.
    pub async fn list_unfiled_groups(&self) -> Result<Vec<AggregationGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT g.* FROM aggregation_group g
            WHERE NOT EXISTS (
                SELECT 1 FROM generated_file_detail f
                WHERE f.aggregation_id = g.aggregation_id AND f.is_uploaded_to_s3 = 1
            )
            ORDER BY g.created_datetime, g.run_date, g.sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_group).collect()
    }

    /// Remove a group whose relation rows are all gone, along with any
    /// never-uploaded file detail for it. Returns false if members remain.
    pub async fn dissolve_empty_group(&self, aggregation_id: &AggregationId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transaction_aggregation_relation WHERE aggregation_id = ?",
        )
        .bind(aggregation_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if remaining > 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM generated_file_detail WHERE aggregation_id = ? AND is_uploaded_to_s3 = 0",
        )
        .bind(aggregation_id.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM aggregation_group WHERE aggregation_id = ?")
            .bind(aggregation_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

pub(crate) fn parse_aggregation_id(value: &str) -> Result<AggregationId> {
    AggregationId::parse(value).map_err(|e| DbError::invalid_state(e.to_string()))
}

fn row_to_group(row: &SqliteRow) -> Result<AggregationGroup> {
    let id: String = row.try_get("aggregation_id")?;
    let run_date: String = row.try_get("run_date")?;
    let sequence: i64 = row.try_get("sequence")?;
    let columns: String = row.try_get("column_names")?;
    Ok(AggregationGroup {
        aggregation_id: parse_aggregation_id(&id)?,
        aggregation_configuration_id: row.try_get("aggregation_configuration_id")?,
        run_date: parse_date("run_date", &run_date)?,
        sequence: u32::try_from(sequence)
            .map_err(|_| DbError::invalid_state(format!("sequence {} out of range", sequence)))?,
        file_name: row.try_get("file_name")?,
        group_key: row.try_get("group_key")?,
        columns: serde_json::from_str(&columns)?,
        created_at: RollupDb::millis_to_datetime(row.try_get("created_datetime")?),
    })
}

fn row_to_relation(row: &SqliteRow) -> Result<AggregationRelation> {
    let id: String = row.try_get("aggregation_id")?;
    let position: i64 = row.try_get("row_position")?;
    Ok(AggregationRelation {
        id: row.try_get("id")?,
        aggregation_id: parse_aggregation_id(&id)?,
        transaction_line_id: row.try_get("transaction_line_id")?,
        row_position: position.max(0) as u32,
        is_published_to_data_platform: row.try_get("is_published_to_data_platform")?,
        created_at: RollupDb::millis_to_datetime(row.try_get("created_datetime")?),
    })
}
