//! Generated file details: one row per produced file, with its bytes and upload flag.

use crate::error::{DbError, Result};
use crate::lineage::parse_aggregation_id;
use crate::types::*;
use crate::RollupDb;
use rollup_ids::AggregationId;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl RollupDb {
    /// Record a produced file with its upload flag false.
    ///
    /// Re-recording the same name with the same content hash is a no-op that returns
    /// the existing row (the upload flag is left as it is). A different hash under an
    /// existing name is a constraint violation.
    pub async fn record_pending_file(
        &self,
        file: &NewGeneratedFile,
    ) -> Result<GeneratedFileDetail> {
        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO generated_file_detail (
                aggregation_configuration_id, aggregation_id, generated_file_name, file_kind,
                file_content, content_hash, is_uploaded_to_s3, is_published_to_data_platform,
                created_datetime, last_updated_datetime
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT(generated_file_name) DO NOTHING
            "#,
        )
        .bind(file.aggregation_configuration_id)
        .bind(file.aggregation_id.as_ref().map(|id| id.as_str()))
        .bind(&file.file_name)
        .bind(file.kind.as_str())
        .bind(&file.content)
        .bind(&file.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(crate::error::classify)?;

        let existing = self
            .get_file(&file.file_name)
            .await?
            .ok_or_else(|| DbError::not_found(format!("generated file {}", file.file_name)))?;

        if existing.content_hash != file.content_hash {
            return Err(DbError::constraint(format!(
                "generated file {} already recorded with different content",
                file.file_name
            )));
        }
        Ok(existing)
    }

    /// Flip the upload flag to true. Only called after the object store confirmed the put.
    pub async fn mark_file_uploaded(&self, file_name: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE generated_file_detail
            SET is_uploaded_to_s3 = 1, last_updated_datetime = ?
            WHERE generated_file_name = ?
            "#,
        )
        .bind(Self::now_millis())
        .bind(file_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("generated file {}", file_name)));
        }
        Ok(())
    }

    /// Get a file detail by name.
    pub async fn get_file(&self, file_name: &str) -> Result<Option<GeneratedFileDetail>> {
        let row = sqlx::query("SELECT * FROM generated_file_detail WHERE generated_file_name = ?")
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_file).transpose()
    }

    /// The data file detail of a group, if one was recorded.
    pub async fn file_for_group(
        &self,
        aggregation_id: &AggregationId,
    ) -> Result<Option<GeneratedFileDetail>> {
        let row = sqlx::query(
            "SELECT * FROM generated_file_detail WHERE aggregation_id = ? AND file_kind = 'DATA'",
        )
        .bind(aggregation_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_file).transpose()
    }

    /// Files whose upload flag is still false, oldest first.
    pub async fn list_files_pending_upload(&self) -> Result<Vec<GeneratedFileDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM generated_file_detail
            WHERE is_uploaded_to_s3 = 0
            ORDER BY created_datetime, generated_file_detail_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_file).collect()
    }

    /// All files of one configuration, oldest first.
    pub async fn list_files_for_configuration(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<GeneratedFileDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM generated_file_detail
            WHERE aggregation_configuration_id = ?
            ORDER BY created_datetime, generated_file_detail_id
            "#,
        )
        .bind(configuration_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_file).collect()
    }

    /// Allocate the next sequence under `file.name_prefix` and record the file, pending,
    /// under `file_name_for(sequence)`.
    ///
    /// Allocation and insert share one write transaction, so concurrent callers get
    /// distinct names. Sequences are never reused, even after the detail is deleted.
    pub async fn record_sequenced_file<F>(
        &self,
        file: &NewSequencedFile,
        file_name_for: F,
    ) -> Result<GeneratedFileDetail>
    where
        F: FnOnce(u32) -> String,
    {
        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;

        // Write first so the lock is held before any name is checked.
        let mut sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO file_sequence (name_prefix, last_sequence)
            VALUES (?, 1)
            ON CONFLICT(name_prefix) DO UPDATE SET last_sequence = last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(&file.name_prefix)
        .fetch_one(&mut *tx)
        .await?;

        // Skip past names recorded before the counter existed.
        let highest_recorded: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(generated_file_name) FROM generated_file_detail
            WHERE substr(generated_file_name, 1, length(?)) = ?
            "#,
        )
        .bind(&file.name_prefix)
        .bind(&file.name_prefix)
        .fetch_one(&mut *tx)
        .await?;
        if let Some(recorded) = highest_recorded
            .as_deref()
            .and_then(|name| parse_sequence(&file.name_prefix, name))
        {
            if recorded >= sequence {
                sequence = recorded + 1;
                sqlx::query("UPDATE file_sequence SET last_sequence = ? WHERE name_prefix = ?")
                    .bind(sequence)
                    .bind(&file.name_prefix)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let sequence = u32::try_from(sequence).map_err(|_| {
            DbError::invalid_state(format!("too many files for {}", file.name_prefix))
        })?;
        let file_name = file_name_for(sequence);

        sqlx::query(
            r#"
            INSERT INTO generated_file_detail (
                aggregation_configuration_id, aggregation_id, generated_file_name, file_kind,
                file_content, content_hash, is_uploaded_to_s3, is_published_to_data_platform,
                created_datetime, last_updated_datetime
            )
            VALUES (?, NULL, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(file.aggregation_configuration_id)
        .bind(&file_name)
        .bind(file.kind.as_str())
        .bind(&file.content)
        .bind(&file.content_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(crate::error::classify)?;

        tx.commit().await?;

        self.get_file(&file_name)
            .await?
            .ok_or_else(|| DbError::not_found(format!("generated file {}", file_name)))
    }

    /// Most recently created file whose name contains `term` (case-insensitive).
    pub async fn latest_file_matching(&self, term: &str) -> Result<Option<GeneratedFileDetail>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM generated_file_detail
            WHERE instr(UPPER(generated_file_name), UPPER(?)) > 0
            ORDER BY created_datetime DESC, generated_file_detail_id DESC
            LIMIT 1
            "#,
        )
        .bind(term)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_file).transpose()
    }

    /// Delete file details whose name contains `term`. Explicit cleanup only.
    pub async fn delete_files_matching(&self, term: &str) -> Result<u64> {
        if term.trim().is_empty() {
            return Err(DbError::invalid_state("file name pattern must not be empty"));
        }

        let result = sqlx::query(
            "DELETE FROM generated_file_detail WHERE instr(UPPER(generated_file_name), UPPER(?)) > 0",
        )
        .bind(term.trim())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Leading digits after `name_prefix`, e.g. `7` for `<prefix>0007.csv`.
fn parse_sequence(name_prefix: &str, name: &str) -> Option<i64> {
    let rest = name.strip_prefix(name_prefix)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn row_to_file(row: &SqliteRow) -> Result<GeneratedFileDetail> {
    let aggregation_id: Option<String> = row.try_get("aggregation_id")?;
    let kind: String = row.try_get("file_kind")?;
    Ok(GeneratedFileDetail {
        generated_file_detail_id: row.try_get("generated_file_detail_id")?,
        aggregation_configuration_id: row.try_get("aggregation_configuration_id")?,
        aggregation_id: aggregation_id.as_deref().map(parse_aggregation_id).transpose()?,
        generated_file_name: row.try_get("generated_file_name")?,
        kind: FileKind::parse(&kind)
            .ok_or_else(|| DbError::invalid_state(format!("unknown file kind {}", kind)))?,
        file_content: row.try_get("file_content")?,
        content_hash: row.try_get("content_hash")?,
        is_uploaded_to_s3: row.try_get("is_uploaded_to_s3")?,
        is_published_to_data_platform: row.try_get("is_published_to_data_platform")?,
        created_at: RollupDb::millis_to_datetime(row.try_get("created_datetime")?),
        updated_at: RollupDb::millis_to_datetime(row.try_get("last_updated_datetime")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn db_with_config() -> (TempDir, RollupDb, i64) {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();
        let id = db
            .insert_configuration(&NewAggregationConfiguration {
                file_name_prefix: "JWN_SALES_PROMO".to_string(),
                file_delimiter: ",".to_string(),
                is_data_quotes_surrounded: false,
                aggregation_query: "SELECT 1 AS transaction_line_id".to_string(),
                data_control_query: None,
                group_key_columns: Vec::new(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end_date: None,
            })
            .await
            .unwrap();
        (tmp, db, id)
    }

    fn file(config_id: i64, name: &str, content: &[u8], hash: &str) -> NewGeneratedFile {
        NewGeneratedFile {
            aggregation_configuration_id: config_id,
            aggregation_id: None,
            file_name: name.to_string(),
            kind: FileKind::Control,
            content: content.to_vec(),
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pending_then_uploaded() {
        let (_tmp, db, config_id) = db_with_config().await;

        let detail = db
            .record_pending_file(&file(config_id, "A_CONTROL_2026_01_02_0001.csv", b"x", "h1"))
            .await
            .unwrap();
        assert!(!detail.is_uploaded_to_s3);
        assert_eq!(db.list_files_pending_upload().await.unwrap().len(), 1);

        db.mark_file_uploaded(&detail.generated_file_name).await.unwrap();
        assert!(db.list_files_pending_upload().await.unwrap().is_empty());
        let reloaded = db.get_file(&detail.generated_file_name).await.unwrap().unwrap();
        assert!(reloaded.is_uploaded_to_s3);
        assert_eq!(reloaded.file_content, b"x");
    }

    #[tokio::test]
    async fn test_record_is_idempotent_for_same_content() {
        let (_tmp, db, config_id) = db_with_config().await;
        let new = file(config_id, "A.csv", b"x", "h1");

        db.record_pending_file(&new).await.unwrap();
        db.mark_file_uploaded("A.csv").await.unwrap();
        let again = db.record_pending_file(&new).await.unwrap();
        assert!(again.is_uploaded_to_s3);

        let err = db
            .record_pending_file(&file(config_id, "A.csv", b"y", "h2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_mark_unknown_file_is_not_found() {
        let (_tmp, db, _) = db_with_config().await;
        assert!(matches!(
            db.mark_file_uploaded("missing.csv").await,
            Err(DbError::NotFound(_))
        ));
    }

    fn control(config_id: i64, prefix: &str, content: &[u8]) -> NewSequencedFile {
        NewSequencedFile {
            aggregation_configuration_id: config_id,
            name_prefix: prefix.to_string(),
            kind: FileKind::Control,
            content: content.to_vec(),
            content_hash: String::from_utf8_lossy(content).into_owned(),
        }
    }

    #[tokio::test]
    async fn test_sequenced_files_and_pattern_queries() {
        let (_tmp, db, config_id) = db_with_config().await;
        let prefix = "JWN_SALES_PROMO_CONTROL_2026_01_02_";
        let name_for = |seq: u32| format!("{}{:04}.csv", prefix, seq);

        let first = db
            .record_sequenced_file(&control(config_id, prefix, b"a"), name_for)
            .await
            .unwrap();
        let second = db
            .record_sequenced_file(&control(config_id, prefix, b"b"), name_for)
            .await
            .unwrap();
        assert_eq!(first.generated_file_name, format!("{}0001.csv", prefix));
        assert_eq!(second.generated_file_name, format!("{}0002.csv", prefix));
        assert!(!second.is_uploaded_to_s3);

        let latest = db.latest_file_matching("promo_control").await.unwrap().unwrap();
        assert_eq!(latest.generated_file_name, second.generated_file_name);

        assert_eq!(db.delete_files_matching("PROMO").await.unwrap(), 2);
        assert!(db.latest_file_matching("PROMO").await.unwrap().is_none());
        assert!(db.delete_files_matching("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_sequence_not_reused_after_delete() {
        let (_tmp, db, config_id) = db_with_config().await;
        let prefix = "JWN_SALES_PROMO_CONTROL_2026_01_02_";
        let name_for = |seq: u32| format!("{}{:04}.csv", prefix, seq);

        for content in [b"a", b"b"] {
            db.record_sequenced_file(&control(config_id, prefix, content), name_for)
                .await
                .unwrap();
        }
        assert_eq!(db.delete_files_matching(&format!("{}0001", prefix)).await.unwrap(), 1);

        let third = db
            .record_sequenced_file(&control(config_id, prefix, b"c"), name_for)
            .await
            .unwrap();
        assert_eq!(third.generated_file_name, format!("{}0003.csv", prefix));
    }

    #[tokio::test]
    async fn test_sequence_skips_names_recorded_directly() {
        let (_tmp, db, config_id) = db_with_config().await;
        let prefix = "P_CONTROL_2026_01_02_";
        db.record_pending_file(&file(config_id, &format!("{}0004.csv", prefix), b"x", "x"))
            .await
            .unwrap();

        let next = db
            .record_sequenced_file(&control(config_id, prefix, b"y"), |seq| {
                format!("{}{:04}.csv", prefix, seq)
            })
            .await
            .unwrap();
        assert_eq!(next.generated_file_name, format!("{}0005.csv", prefix));
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("P_", "P_0012.csv"), Some(12));
        assert_eq!(parse_sequence("P_", "Q_0012.csv"), None);
        assert_eq!(parse_sequence("P_", "P_.csv"), None);
    }
}
