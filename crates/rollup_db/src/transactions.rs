//! The source transaction tree: transaction → lines → one type-specific extension.
//!
//! The engine never writes here. `insert_transaction` seeds fixtures and
//! `delete_transaction_tree` is the guarded operational cleanup.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::{
    format_date, parse_date, parse_decimal, parse_optional_date, parse_optional_decimal, RollupDb,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction as SqlxTransaction};
use tracing::{info, warn};

impl RollupDb {
    /// Insert a transaction with all of its lines and extensions atomically.
    pub async fn insert_transaction(&self, txn: &NewTransaction) -> Result<InsertedTransaction> {
        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO "transaction" (
                source_reference_transaction_id, source_reference_system_type, source_reference_type,
                source_processed_date, transaction_date, business_date, transaction_type,
                transaction_reversal_code, partner_relationship_type,
                created_datetime, last_updated_datetime
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&txn.source_reference_transaction_id)
        .bind(&txn.source.system_type)
        .bind(&txn.source.domain_type)
        .bind(txn.source_processed_date.map(format_date))
        .bind(txn.transaction_date.map(format_date))
        .bind(format_date(txn.business_date))
        .bind(&txn.transaction_type)
        .bind(if txn.is_reversal { "Y" } else { "N" })
        .bind(&txn.partner_relationship_type)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(crate::error::classify)?;
        let transaction_id = result.last_insert_rowid();

        let mut line_ids = Vec::with_capacity(txn.lines.len());
        for line in &txn.lines {
            let result = sqlx::query(
                r#"
                INSERT INTO transaction_line (
                    transaction_id, source_reference_line_id, source_reference_line_type,
                    transaction_line_type, ringing_store, store_of_intent,
                    created_datetime, last_updated_datetime
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(transaction_id)
            .bind(&line.source_reference_line_id)
            .bind(line.kind.line_type().as_str())
            .bind(&line.transaction_line_type)
            .bind(&line.ringing_store)
            .bind(&line.store_of_intent)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let line_id = result.last_insert_rowid();

            insert_line_kind(&mut tx, line_id, &line.kind).await?;
            line_ids.push(line_id);
        }

        tx.commit().await?;

        Ok(InsertedTransaction {
            transaction_id,
            line_ids,
        })
    }

    /// Load a transaction with its lines.
    pub async fn get_transaction(&self, transaction_id: i64) -> Result<Option<Transaction>> {
        let row = sqlx::query(r#"SELECT * FROM "transaction" WHERE transaction_id = ?"#)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT * FROM transaction_line WHERE transaction_id = ? ORDER BY transaction_line_id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        let mut lines = Vec::with_capacity(line_rows.len());
        for line_row in &line_rows {
            lines.push(self.row_to_line(line_row).await?);
        }

        let business_date: String = row.try_get("business_date")?;
        let reversal: String = row.try_get("transaction_reversal_code")?;
        Ok(Some(Transaction {
            transaction_id: row.try_get("transaction_id")?,
            source_reference_transaction_id: row.try_get("source_reference_transaction_id")?,
            source: SourceSystem {
                system_type: row.try_get("source_reference_system_type")?,
                domain_type: row.try_get("source_reference_type")?,
            },
            business_date: parse_date("business_date", &business_date)?,
            transaction_date: parse_optional_date(
                "transaction_date",
                row.try_get("transaction_date")?,
            )?,
            source_processed_date: parse_optional_date(
                "source_processed_date",
                row.try_get("source_processed_date")?,
            )?,
            transaction_type: row.try_get("transaction_type")?,
            is_reversal: reversal.eq_ignore_ascii_case("Y"),
            partner_relationship_type: row.try_get("partner_relationship_type")?,
            created_at: Self::millis_to_datetime(row.try_get("created_datetime")?),
            updated_at: Self::millis_to_datetime(row.try_get("last_updated_datetime")?),
            lines,
        }))
    }

    /// Delete transactions and everything they own, in child-to-parent order.
    ///
    /// A transaction is only touched when its source reference id matches
    /// `source_reference_pattern` (SQL `LIKE`). Ids that fail the check are skipped.
    /// Generated file details are not touched.
    pub async fn delete_transaction_tree(
        &self,
        transaction_ids: &[i64],
        source_reference_pattern: &str,
    ) -> Result<DeleteReport> {
        if !source_reference_pattern
            .chars()
            .any(|c| c != '%' && c != '_' && !c.is_whitespace())
        {
            return Err(DbError::invalid_state(format!(
                "source reference pattern {:?} must contain a literal part",
                source_reference_pattern
            )));
        }

        let mut report = DeleteReport::default();
        let mut tx = self.pool.begin().await?;

        for &transaction_id in transaction_ids {
            let matched: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT transaction_id FROM "transaction"
                WHERE transaction_id = ? AND source_reference_transaction_id LIKE ?
                "#,
            )
            .bind(transaction_id)
            .bind(source_reference_pattern)
            .fetch_optional(&mut *tx)
            .await?;

            if matched.is_none() {
                warn!(
                    transaction_id,
                    pattern = source_reference_pattern,
                    "Skipping transaction that is missing or fails the provenance check"
                );
                continue;
            }

            for line_type in LineType::ALL {
                let sql = format!(
                    "DELETE FROM {} WHERE transaction_line_id IN \
                     (SELECT transaction_line_id FROM transaction_line WHERE transaction_id = ?)",
                    line_type.table()
                );
                report.type_specific_lines += sqlx::query(&sql)
                    .bind(transaction_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }

            report.relations += sqlx::query(
                r#"
                DELETE FROM transaction_aggregation_relation WHERE transaction_line_id IN
                    (SELECT transaction_line_id FROM transaction_line WHERE transaction_id = ?)
                "#,
            )
            .bind(transaction_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            report.lines += sqlx::query("DELETE FROM transaction_line WHERE transaction_id = ?")
                .bind(transaction_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            report.transactions +=
                sqlx::query(r#"DELETE FROM "transaction" WHERE transaction_id = ?"#)
                    .bind(transaction_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
        }

        tx.commit().await?;

        info!(
            transactions = report.transactions,
            lines = report.lines,
            relations = report.relations,
            "Transaction trees deleted"
        );
        Ok(report)
    }

    async fn row_to_line(&self, row: &SqliteRow) -> Result<TransactionLine> {
        let line_id: i64 = row.try_get("transaction_line_id")?;
        let discriminator: String = row.try_get("source_reference_line_type")?;
        let line_type = LineType::parse(&discriminator).ok_or_else(|| {
            DbError::invalid_state(format!(
                "line {} has unknown line type {}",
                line_id, discriminator
            ))
        })?;

        let ext = sqlx::query(&format!(
            "SELECT * FROM {} WHERE transaction_line_id = ?",
            line_type.table()
        ))
        .bind(line_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DbError::invalid_state(format!(
                "line {} has no {} extension row",
                line_id, line_type
            ))
        })?;

        Ok(TransactionLine {
            transaction_line_id: line_id,
            transaction_id: row.try_get("transaction_id")?,
            source_reference_line_id: row.try_get("source_reference_line_id")?,
            transaction_line_type: row.try_get("transaction_line_type")?,
            ringing_store: row.try_get("ringing_store")?,
            store_of_intent: row.try_get("store_of_intent")?,
            kind: row_to_line_kind(line_type, &ext)?,
        })
    }
}

async fn insert_line_kind(
    tx: &mut SqlxTransaction<'_, Sqlite>,
    line_id: i64,
    kind: &LineKind,
) -> Result<()> {
    let query = match kind {
        LineKind::Retail(line) => sqlx::query(
            r#"
            INSERT INTO retail_transaction_line (
                transaction_line_id, department_id, class_id, fee_code, tender_type,
                line_item_amount, tax_amount, employee_discount_amount, tender_amount
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line_id)
        .bind(&line.department_id)
        .bind(&line.class_id)
        .bind(&line.fee_code)
        .bind(&line.tender_type)
        .bind(line.line_item_amount.to_string())
        .bind(amount(line.tax_amount))
        .bind(amount(line.employee_discount_amount))
        .bind(amount(line.tender_amount)),
        LineKind::Restaurant(line) => sqlx::query(
            r#"
            INSERT INTO restaurant_transaction_line (
                transaction_line_id, department_id, class_id, tender_type,
                restaurant_delivery_partner, line_item_amount, tax_amount,
                employee_discount_amount, tender_amount, restaurant_tip_amount
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line_id)
        .bind(&line.department_id)
        .bind(&line.class_id)
        .bind(&line.tender_type)
        .bind(&line.delivery_partner)
        .bind(line.line_item_amount.to_string())
        .bind(amount(line.tax_amount))
        .bind(amount(line.employee_discount_amount))
        .bind(amount(line.tender_amount))
        .bind(amount(line.tip_amount)),
        LineKind::Marketplace(line) => sqlx::query(
            r#"
            INSERT INTO marketplace_transaction_line (
                transaction_line_id, partner_relationship_type, fee_code, tender_type,
                line_item_amount, tax_amount, tender_amount, marketplace_jwn_commission_amount
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line_id)
        .bind(&line.partner_relationship_type)
        .bind(&line.fee_code)
        .bind(&line.tender_type)
        .bind(line.line_item_amount.to_string())
        .bind(amount(line.tax_amount))
        .bind(amount(line.tender_amount))
        .bind(amount(line.commission_amount)),
        LineKind::Promotion(line) => sqlx::query(
            r#"
            INSERT INTO promotion_transaction_line (
                transaction_line_id, promo_type, promo_amount, promo_business_origin
            )
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(line_id)
        .bind(&line.promo_type)
        .bind(line.promo_amount.to_string())
        .bind(&line.promo_business_origin),
    };

    query.execute(&mut **tx).await?;
    Ok(())
}

fn amount(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn row_to_line_kind(line_type: LineType, row: &SqliteRow) -> Result<LineKind> {
    let line_item_amount = || -> Result<Decimal> {
        let raw: String = row.try_get("line_item_amount")?;
        parse_decimal("line_item_amount", &raw)
    };
    let optional = |column: &str| -> Result<Option<Decimal>> {
        parse_optional_decimal(column, row.try_get(column)?)
    };

    let kind = match line_type {
        LineType::Retail => LineKind::Retail(RetailLine {
            department_id: row.try_get("department_id")?,
            class_id: row.try_get("class_id")?,
            fee_code: row.try_get("fee_code")?,
            tender_type: row.try_get("tender_type")?,
            line_item_amount: line_item_amount()?,
            tax_amount: optional("tax_amount")?,
            employee_discount_amount: optional("employee_discount_amount")?,
            tender_amount: optional("tender_amount")?,
        }),
        LineType::Restaurant => LineKind::Restaurant(RestaurantLine {
            department_id: row.try_get("department_id")?,
            class_id: row.try_get("class_id")?,
            tender_type: row.try_get("tender_type")?,
            delivery_partner: row.try_get("restaurant_delivery_partner")?,
            line_item_amount: line_item_amount()?,
            tax_amount: optional("tax_amount")?,
            employee_discount_amount: optional("employee_discount_amount")?,
            tender_amount: optional("tender_amount")?,
            tip_amount: optional("restaurant_tip_amount")?,
        }),
        LineType::Marketplace => LineKind::Marketplace(MarketplaceLine {
            partner_relationship_type: row.try_get("partner_relationship_type")?,
            fee_code: row.try_get("fee_code")?,
            tender_type: row.try_get("tender_type")?,
            line_item_amount: line_item_amount()?,
            tax_amount: optional("tax_amount")?,
            tender_amount: optional("tender_amount")?,
            commission_amount: optional("marketplace_jwn_commission_amount")?,
        }),
        LineType::Promotion => {
            let promo_amount: String = row.try_get("promo_amount")?;
            LineKind::Promotion(PromotionLine {
                promo_type: row.try_get("promo_type")?,
                promo_amount: parse_decimal("promo_amount", &promo_amount)?,
                promo_business_origin: row.try_get("promo_business_origin")?,
            })
        }
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn promo_transaction(reference: &str, lines: usize) -> NewTransaction {
        NewTransaction {
            source_reference_transaction_id: reference.to_string(),
            source: SourceSystem::new("GCP", "PROMO"),
            business_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            transaction_date: NaiveDate::from_ymd_opt(2026, 5, 4),
            source_processed_date: None,
            transaction_type: "SALE".to_string(),
            is_reversal: false,
            partner_relationship_type: None,
            lines: (0..lines)
                .map(|i| NewTransactionLine {
                    source_reference_line_id: format!("{}-{}", reference, i),
                    transaction_line_type: "PROMO".to_string(),
                    ringing_store: None,
                    store_of_intent: Some("9999".to_string()),
                    kind: LineKind::Promotion(PromotionLine {
                        promo_type: Some("LOYALTY".to_string()),
                        promo_amount: Decimal::new(1000, 2),
                        promo_business_origin: Some("LOAD_TEST".to_string()),
                    }),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_transaction_tree() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let inserted = db
            .insert_transaction(&promo_transaction("LOADTEST_1", 2))
            .await
            .unwrap();
        assert_eq!(inserted.line_ids.len(), 2);

        let txn = db.get_transaction(inserted.transaction_id).await.unwrap().unwrap();
        assert_eq!(txn.source, SourceSystem::new("GCP", "PROMO"));
        assert_eq!(txn.lines.len(), 2);
        match &txn.lines[0].kind {
            LineKind::Promotion(p) => {
                assert_eq!(p.promo_amount.to_string(), "10.00");
                assert_eq!(p.promo_business_origin.as_deref(), Some("LOAD_TEST"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_source_reference_is_constraint() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        db.insert_transaction(&promo_transaction("LOADTEST_1", 1))
            .await
            .unwrap();
        let err = db
            .insert_transaction(&promo_transaction("LOADTEST_1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_delete_tree_honours_provenance_pattern() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let test_txn = db
            .insert_transaction(&promo_transaction("LOADTEST_7", 3))
            .await
            .unwrap();
        let real_txn = db
            .insert_transaction(&promo_transaction("STORE_42", 1))
            .await
            .unwrap();

        let report = db
            .delete_transaction_tree(
                &[test_txn.transaction_id, real_txn.transaction_id],
                "LOADTEST%",
            )
            .await
            .unwrap();

        assert_eq!(
            report,
            DeleteReport {
                transactions: 1,
                lines: 3,
                type_specific_lines: 3,
                relations: 0,
            }
        );
        assert!(db.get_transaction(test_txn.transaction_id).await.unwrap().is_none());
        assert!(db.get_transaction(real_txn.transaction_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_tree_rejects_wildcard_only_pattern() {
        let tmp = TempDir::new().unwrap();
        let db = RollupDb::open(tmp.path().join("db.sqlite3")).await.unwrap();

        let err = db.delete_transaction_tree(&[1], "%").await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
    }
}
