//! Aggregation configuration rows.
//!
//! Operators own these rows; the engine only reads them. `insert_configuration`
//! exists for seeding and tests.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::{format_date, parse_date, parse_optional_date, RollupDb};
use chrono::NaiveDate;
use sqlx::Row;

impl RollupDb {
    /// Insert a configuration and return its id.
    pub async fn insert_configuration(&self, config: &NewAggregationConfiguration) -> Result<i64> {
        let now = Self::now_millis();
        self.insert_configuration_at(config, now).await
    }

    /// Insert a configuration with an explicit creation time (millis since epoch).
    pub async fn insert_configuration_at(
        &self,
        config: &NewAggregationConfiguration,
        created_millis: i64,
    ) -> Result<i64> {
        if let Some(end) = config.end_date {
            if end < config.start_date {
                return Err(DbError::constraint(format!(
                    "end_date {} precedes start_date {}",
                    end, config.start_date
                )));
            }
        }

        let result = sqlx::query(
            r#"
            INSERT INTO aggregation_configuration (
                file_name_prefix, file_delimiter, is_data_quotes_surrounded,
                aggregation_query, data_control_query, group_key_columns,
                start_date, end_date, created_datetime, last_updated_datetime
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.file_name_prefix)
        .bind(&config.file_delimiter)
        .bind(config.is_data_quotes_surrounded)
        .bind(&config.aggregation_query)
        .bind(&config.data_control_query)
        .bind(config.group_key_columns.join(","))
        .bind(format_date(config.start_date))
        .bind(config.end_date.map(format_date))
        .bind(created_millis)
        .bind(created_millis)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a configuration by id.
    pub async fn get_configuration(&self, id: i64) -> Result<Option<AggregationConfiguration>> {
        let row = sqlx::query(
            "SELECT * FROM aggregation_configuration WHERE aggregation_configuration_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_configuration).transpose()
    }

    /// All configurations, most recently created first.
    pub async fn list_configurations(&self) -> Result<Vec<AggregationConfiguration>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM aggregation_configuration
            ORDER BY created_datetime DESC, aggregation_configuration_id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_configuration).collect()
    }

    /// Configurations whose window covers `date`, most recently created first.
    pub async fn list_active_configurations(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AggregationConfiguration>> {
        let day = format_date(date);
        let rows = sqlx::query(
            r#"
            SELECT * FROM aggregation_configuration
            WHERE start_date <= ? AND (end_date IS NULL OR end_date >= ?)
            ORDER BY created_datetime DESC, aggregation_configuration_id DESC
            "#,
        )
        .bind(&day)
        .bind(&day)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_configuration).collect()
    }

    /// Close a configuration's window.
    pub async fn end_configuration(&self, id: i64, end_date: NaiveDate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE aggregation_configuration
            SET end_date = ?, last_updated_datetime = ?
            WHERE aggregation_configuration_id = ?
            "#,
        )
        .bind(format_date(end_date))
        .bind(Self::now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("configuration {}", id)));
        }
        Ok(())
    }
}

fn row_to_configuration(row: &sqlx::sqlite::SqliteRow) -> Result<AggregationConfiguration> {
    let group_key_columns: String = row.try_get("group_key_columns")?;
    let start_date: String = row.try_get("start_date")?;
    Ok(AggregationConfiguration {
        aggregation_configuration_id: row.try_get("aggregation_configuration_id")?,
        file_name_prefix: row.try_get("file_name_prefix")?,
        file_delimiter: row.try_get("file_delimiter")?,
        is_data_quotes_surrounded: row.try_get("is_data_quotes_surrounded")?,
        aggregation_query: row.try_get("aggregation_query")?,
        data_control_query: row.try_get("data_control_query")?,
        group_key_columns: split_columns(&group_key_columns),
        start_date: parse_date("start_date", &start_date)?,
        end_date: parse_optional_date("end_date", row.try_get("end_date")?)?,
        created_at: RollupDb::millis_to_datetime(row.try_get("created_datetime")?),
        updated_at: RollupDb::millis_to_datetime(row.try_get("last_updated_datetime")?),
    })
}

fn split_columns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(
        prefix: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> NewAggregationConfiguration {
        NewAggregationConfiguration {
            file_name_prefix: prefix.to_string(),
            file_delimiter: ",".to_string(),
            is_data_quotes_surrounded: false,
            aggregation_query: "SELECT transaction_line_id FROM transaction_line".to_string(),
            data_control_query: None,
            group_key_columns: vec!["store".to_string(), " business_date ".to_string()],
            start_date: start,
            end_date: end,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_configuration() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let id = db
            .insert_configuration(&config("JWN_SALES_PROMO", day(1), Some(day(31))))
            .await
            .unwrap();
        let loaded = db.get_configuration(id).await.unwrap().unwrap();

        assert_eq!(loaded.file_name_prefix, "JWN_SALES_PROMO");
        assert_eq!(loaded.group_key_columns, vec!["store", "business_date"]);
        assert_eq!(loaded.end_date, Some(day(31)));
        assert!(loaded.is_active_on(day(31)));
        assert!(!loaded.is_active_on(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()));
    }

    #[tokio::test]
    async fn test_list_active_configurations_respects_window() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        db.insert_configuration_at(&config("A", day(1), Some(day(10))), 1)
            .await
            .unwrap();
        db.insert_configuration_at(&config("B", day(5), None), 2)
            .await
            .unwrap();
        db.insert_configuration_at(&config("C", day(20), None), 3)
            .await
            .unwrap();

        let active: Vec<String> = db
            .list_active_configurations(day(10))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.file_name_prefix)
            .collect();
        assert_eq!(active, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_insert_rejects_inverted_window() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let err = db
            .insert_configuration(&config("A", day(10), Some(day(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_end_configuration() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let id = db.insert_configuration(&config("A", day(1), None)).await.unwrap();
        db.end_configuration(id, day(2)).await.unwrap();
        assert!(db.list_active_configurations(day(3)).await.unwrap().is_empty());

        assert!(matches!(
            db.end_configuration(999, day(2)).await,
            Err(DbError::NotFound(_))
        ));
    }
}
