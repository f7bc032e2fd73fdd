//! Shared fixtures for engine tests: a temp database, an in-memory store and
//! promotion/retail seed data.

#![allow(dead_code)]

use chrono::NaiveDate;
use rollup::{ConfigurationResolver, Pipeline};
use rollup_db::{
    LineKind, NewAggregationConfiguration, NewTransaction, NewTransactionLine, PromotionLine,
    RetailLine, RollupDb, SourceSystem,
};
use rollup_sinks::MemoryObjectStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;

pub const PROMO_QUERY: &str = r#"
SELECT tl.transaction_line_id, tl.store_of_intent, t.business_date, p.promo_amount
FROM transaction_line tl
JOIN "transaction" t ON t.transaction_id = tl.transaction_id
JOIN promotion_transaction_line p ON p.transaction_line_id = tl.transaction_line_id
WHERE tl.source_reference_line_type = 'PROMO'
ORDER BY tl.transaction_line_id
"#;

pub const PROMO_CONTROL_QUERY: &str = r#"
SELECT printf('%.2f', COALESCE(SUM(CAST(p.promo_amount AS REAL)), 0)) AS total_amount,
       COUNT(*) AS line_count
FROM promotion_transaction_line p
WHERE p.transaction_line_id NOT IN (SELECT transaction_line_id FROM transaction_aggregation_relation)
"#;

pub const RETAIL_QUERY: &str = r#"
SELECT tl.transaction_line_id, tl.ringing_store, r.department_id, r.line_item_amount
FROM transaction_line tl
JOIN retail_transaction_line r ON r.transaction_line_id = tl.transaction_line_id
WHERE tl.source_reference_line_type = 'RETAIL'
"#;

pub struct Harness {
    pub _tmp: TempDir,
    pub db: RollupDb,
    pub store: Arc<MemoryObjectStore>,
    pub pipeline: Pipeline,
}

pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
}

pub async fn setup() -> Harness {
    let tmp = TempDir::new().unwrap();
    let db = RollupDb::open(tmp.path().join("rollup.sqlite3")).await.unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = Pipeline::new(db.clone(), store.clone(), ConfigurationResolver::default());
    Harness {
        _tmp: tmp,
        db,
        store,
        pipeline,
    }
}

pub fn config(prefix: &str, query: &str) -> NewAggregationConfiguration {
    NewAggregationConfiguration {
        file_name_prefix: prefix.to_string(),
        file_delimiter: ",".to_string(),
        is_data_quotes_surrounded: false,
        aggregation_query: query.to_string(),
        data_control_query: None,
        group_key_columns: Vec::new(),
        start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        end_date: None,
    }
}

pub fn promo_config() -> NewAggregationConfiguration {
    config("JWN_SALES_PROMO", PROMO_QUERY)
}

/// One promotion transaction with a line per `(store, amount in cents)`.
pub async fn insert_promo_lines(db: &RollupDb, reference: &str, lines: &[(&str, i64)]) -> Vec<i64> {
    db.insert_transaction(&NewTransaction {
        source_reference_transaction_id: reference.to_string(),
        source: SourceSystem::new("GCP", "PROMO"),
        business_date: run_date(),
        transaction_date: Some(run_date()),
        source_processed_date: None,
        transaction_type: "SALE".to_string(),
        is_reversal: false,
        partner_relationship_type: None,
        lines: lines
            .iter()
            .enumerate()
            .map(|(i, (store, cents))| NewTransactionLine {
                source_reference_line_id: format!("{}-{}", reference, i),
                transaction_line_type: "PROMO".to_string(),
                ringing_store: None,
                store_of_intent: Some(store.to_string()),
                kind: LineKind::Promotion(PromotionLine {
                    promo_type: Some("LOYALTY".to_string()),
                    promo_amount: Decimal::new(*cents, 2),
                    promo_business_origin: Some("LOAD_TEST".to_string()),
                }),
            })
            .collect(),
    })
    .await
    .unwrap()
    .line_ids
}

pub async fn insert_retail_lines(db: &RollupDb, reference: &str, count: usize) -> Vec<i64> {
    db.insert_transaction(&NewTransaction {
        source_reference_transaction_id: reference.to_string(),
        source: SourceSystem::new("ertm", "retail"),
        business_date: run_date(),
        transaction_date: Some(run_date()),
        source_processed_date: None,
        transaction_type: "SALE".to_string(),
        is_reversal: false,
        partner_relationship_type: None,
        lines: (0..count)
            .map(|i| NewTransactionLine {
                source_reference_line_id: format!("{}-{}", reference, i),
                transaction_line_type: "MERCH".to_string(),
                ringing_store: Some("0210".to_string()),
                store_of_intent: Some("0210".to_string()),
                kind: LineKind::Retail(RetailLine {
                    department_id: Some("D12".to_string()),
                    class_id: None,
                    fee_code: None,
                    tender_type: Some("CASH".to_string()),
                    line_item_amount: Decimal::new(2500, 2),
                    tax_amount: None,
                    employee_discount_amount: None,
                    tender_amount: None,
                }),
            })
            .collect(),
    })
    .await
    .unwrap()
    .line_ids
}
