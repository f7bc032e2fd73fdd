//! Database schema creation for all rollup tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::RollupDb;
use tracing::info;

impl RollupDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_transaction_tables().await?;
        self.create_configuration_tables().await?;
        self.create_lineage_tables().await?;
        self.create_generated_file_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Source transaction tree. Read-only to the engine.
    async fn create_transaction_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS "transaction" (
                transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_reference_transaction_id TEXT NOT NULL,
                source_reference_system_type TEXT NOT NULL,
                source_reference_type TEXT NOT NULL,
                source_processed_date TEXT,
                transaction_date TEXT,
                business_date TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                transaction_reversal_code TEXT NOT NULL DEFAULT 'N',
                partner_relationship_type TEXT,
                created_datetime INTEGER NOT NULL,
                last_updated_datetime INTEGER NOT NULL,
                UNIQUE (source_reference_system_type, source_reference_type, source_reference_transaction_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS transaction_line (
                transaction_line_id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id INTEGER NOT NULL REFERENCES "transaction"(transaction_id) ON DELETE CASCADE,
                source_reference_line_id TEXT NOT NULL,
                source_reference_line_type TEXT NOT NULL,
                transaction_line_type TEXT NOT NULL,
                ringing_store TEXT,
                store_of_intent TEXT,
                created_datetime INTEGER NOT NULL,
                last_updated_datetime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transaction_line_transaction ON transaction_line(transaction_id)",
        )
        .execute(&self.pool)
        .await?;

        // Amounts are stored as TEXT so decimals round-trip exactly.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS retail_transaction_line (
                transaction_line_id INTEGER PRIMARY KEY REFERENCES transaction_line(transaction_line_id) ON DELETE CASCADE,
                department_id TEXT,
                class_id TEXT,
                fee_code TEXT,
                tender_type TEXT,
                line_item_amount TEXT NOT NULL,
                tax_amount TEXT,
                employee_discount_amount TEXT,
                tender_amount TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS restaurant_transaction_line (
                transaction_line_id INTEGER PRIMARY KEY REFERENCES transaction_line(transaction_line_id) ON DELETE CASCADE,
                department_id TEXT,
                class_id TEXT,
                tender_type TEXT,
                restaurant_delivery_partner TEXT,
                line_item_amount TEXT NOT NULL,
                tax_amount TEXT,
                employee_discount_amount TEXT,
                tender_amount TEXT,
                restaurant_tip_amount TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS marketplace_transaction_line (
                transaction_line_id INTEGER PRIMARY KEY REFERENCES transaction_line(transaction_line_id) ON DELETE CASCADE,
                partner_relationship_type TEXT,
                fee_code TEXT,
                tender_type TEXT,
                line_item_amount TEXT NOT NULL,
                tax_amount TEXT,
                tender_amount TEXT,
                marketplace_jwn_commission_amount TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS promotion_transaction_line (
                transaction_line_id INTEGER PRIMARY KEY REFERENCES transaction_line(transaction_line_id) ON DELETE CASCADE,
                promo_type TEXT,
                promo_amount TEXT NOT NULL,
                promo_business_origin TEXT
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_configuration_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS aggregation_configuration (
                aggregation_configuration_id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name_prefix TEXT NOT NULL,
                file_delimiter TEXT NOT NULL DEFAULT ',',
                is_data_quotes_surrounded INTEGER NOT NULL DEFAULT 0,
                aggregation_query TEXT NOT NULL DEFAULT '',
                data_control_query TEXT,
                group_key_columns TEXT NOT NULL DEFAULT '',
                start_date TEXT NOT NULL,
                end_date TEXT,
                created_datetime INTEGER NOT NULL,
                last_updated_datetime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aggregation_configuration_prefix ON aggregation_configuration(file_name_prefix)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Groups and relation rows. The UNIQUE on `transaction_line_id` is the
    /// at-most-one-aggregation-per-line constraint.
    async fn create_lineage_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS aggregation_group (
                aggregation_id TEXT PRIMARY KEY,
                aggregation_configuration_id INTEGER NOT NULL REFERENCES aggregation_configuration(aggregation_configuration_id),
                run_date TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                file_name TEXT NOT NULL UNIQUE,
                group_key TEXT NOT NULL,
                column_names TEXT NOT NULL,
                created_datetime INTEGER NOT NULL,
                UNIQUE (aggregation_configuration_id, run_date, sequence)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS transaction_aggregation_relation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                aggregation_id TEXT NOT NULL REFERENCES aggregation_group(aggregation_id),
                transaction_line_id INTEGER NOT NULL UNIQUE REFERENCES transaction_line(transaction_line_id) ON DELETE CASCADE,
                row_position INTEGER NOT NULL,
                row_values TEXT NOT NULL,
                is_published_to_data_platform INTEGER NOT NULL DEFAULT 0,
                created_datetime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relation_aggregation ON transaction_aggregation_relation(aggregation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Generated files hang off the configuration, not the transaction tree.
    async fn create_generated_file_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS generated_file_detail (
                generated_file_detail_id INTEGER PRIMARY KEY AUTOINCREMENT,
                aggregation_configuration_id INTEGER NOT NULL REFERENCES aggregation_configuration(aggregation_configuration_id),
                aggregation_id TEXT,
                generated_file_name TEXT NOT NULL UNIQUE,
                file_kind TEXT NOT NULL,
                file_content BLOB NOT NULL,
                content_hash TEXT NOT NULL,
                is_uploaded_to_s3 INTEGER NOT NULL DEFAULT 0,
                is_published_to_data_platform INTEGER NOT NULL DEFAULT 0,
                created_datetime INTEGER NOT NULL,
                last_updated_datetime INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Last sequence handed out per name prefix. Never decremented, so deleting a
        // file detail does not free its name for reuse.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS file_sequence (
                name_prefix TEXT PRIMARY KEY,
                last_sequence INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generated_file_pending ON generated_file_detail(is_uploaded_to_s3)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generated_file_aggregation ON generated_file_detail(aggregation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
