//! Execution of operator-authored read-only queries.
//!
//! Every cell comes back as text so the emitter never sees storage types. Integers
//! render in decimal, reals via Rust's shortest round-trip formatting.

use crate::error::{DbError, Result};
use crate::sql_guard::validate_read_only;
use crate::types::QueryRows;
use crate::RollupDb;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

impl RollupDb {
    /// Run a read-only statement and collect all rows as text.
    ///
    /// The statement runs on a `query_only` connection, so SQLite itself refuses any
    /// write the guard missed. Column names come from the first row; an empty result
    /// has no columns.
    pub async fn query_read_only(&self, sql: &str) -> Result<QueryRows> {
        validate_read_only(sql)?;

        let rows = sqlx::query(sql).fetch_all(&self.reader).await?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(cell_as_text(row, idx)?);
            }
            out.push(cells);
        }

        Ok(QueryRows { columns, rows: out })
    }
}

fn cell_as_text(row: &SqliteRow, idx: usize) -> Result<Option<String>> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(None);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let text = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(idx)?.to_string(),
        "REAL" => row.try_get_unchecked::<f64, _>(idx)?.to_string(),
        "BLOB" => {
            return Err(DbError::invalid_state(format!(
                "column {} is a BLOB and cannot be written to a text file",
                row.column(idx).name()
            )))
        }
        _ => row.try_get_unchecked::<String, _>(idx)?,
    };
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_query_renders_cells_as_text() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let rows = db
            .query_read_only("SELECT 7 AS n, 2.5 AS r, 'x' AS s, NULL AS z")
            .await
            .unwrap();

        assert_eq!(rows.columns, vec!["n", "r", "s", "z"]);
        assert_eq!(
            rows.rows,
            vec![vec![
                Some("7".to_string()),
                Some("2.5".to_string()),
                Some("x".to_string()),
                None
            ]]
        );
        assert_eq!(rows.column_index("S"), Some(2));
    }

    #[tokio::test]
    async fn test_query_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let err = db
            .query_read_only("DELETE FROM aggregation_configuration")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ReadOnly(_)));
    }

    #[tokio::test]
    async fn test_reader_connections_refuse_writes() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let err = db
            .query_read_only(
                "WITH c AS (SELECT 1) \
                 REPLACE INTO file_sequence (name_prefix, last_sequence) SELECT 'X', 1 FROM c",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ReadOnly(_)));

        // Even past the guard, the reader pool cannot write.
        let write =
            sqlx::query("INSERT INTO file_sequence (name_prefix, last_sequence) VALUES ('X', 1)")
                .execute(&db.reader)
                .await;
        assert!(write.is_err());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_sequence")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_empty_result_has_no_columns() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let rows = db
            .query_read_only("SELECT * FROM aggregation_configuration")
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(rows.columns.is_empty());
    }
}
