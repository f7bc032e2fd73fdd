//! Row types for the rollup store.
//!
//! Source transaction types are read-only to the engine; they are written only by
//! the fixture API in `transactions.rs`.

use chrono::{DateTime, NaiveDate, Utc};
use rollup_ids::AggregationId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Source transaction tree
// ============================================================================

/// External source-system identity of a transaction, e.g. `("GCP", "PROMO")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSystem {
    pub system_type: String,
    pub domain_type: String,
}

impl SourceSystem {
    pub fn new(system_type: impl Into<String>, domain_type: impl Into<String>) -> Self {
        Self {
            system_type: system_type.into(),
            domain_type: domain_type.into(),
        }
    }
}

/// Discriminator stored in `transaction_line.source_reference_line_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineType {
    Retail,
    Restaurant,
    Marketplace,
    Promotion,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retail => "RETAIL",
            Self::Restaurant => "RESTAURANT",
            Self::Marketplace => "MARKETPLACE",
            Self::Promotion => "PROMO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RETAIL" => Some(Self::Retail),
            "RESTAURANT" => Some(Self::Restaurant),
            "MARKETPLACE" => Some(Self::Marketplace),
            "PROMO" | "PROMOTION" => Some(Self::Promotion),
            _ => None,
        }
    }

    /// Table holding the type-specific extension rows.
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Retail => "retail_transaction_line",
            Self::Restaurant => "restaurant_transaction_line",
            Self::Marketplace => "marketplace_transaction_line",
            Self::Promotion => "promotion_transaction_line",
        }
    }

    pub(crate) const ALL: [LineType; 4] = [
        Self::Retail,
        Self::Restaurant,
        Self::Marketplace,
        Self::Promotion,
    ];
}

impl std::fmt::Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailLine {
    pub department_id: Option<String>,
    pub class_id: Option<String>,
    pub fee_code: Option<String>,
    pub tender_type: Option<String>,
    pub line_item_amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub employee_discount_amount: Option<Decimal>,
    pub tender_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantLine {
    pub department_id: Option<String>,
    pub class_id: Option<String>,
    pub tender_type: Option<String>,
    pub delivery_partner: Option<String>,
    pub line_item_amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub employee_discount_amount: Option<Decimal>,
    pub tender_amount: Option<Decimal>,
    pub tip_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceLine {
    pub partner_relationship_type: Option<String>,
    pub fee_code: Option<String>,
    pub tender_type: Option<String>,
    pub line_item_amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub tender_amount: Option<Decimal>,
    pub commission_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionLine {
    pub promo_type: Option<String>,
    pub promo_amount: Decimal,
    pub promo_business_origin: Option<String>,
}

/// The one type-specific extension owned by a transaction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LineKind {
    Retail(RetailLine),
    Restaurant(RestaurantLine),
    Marketplace(MarketplaceLine),
    Promotion(PromotionLine),
}

impl LineKind {
    pub fn line_type(&self) -> LineType {
        match self {
            Self::Retail(_) => LineType::Retail,
            Self::Restaurant(_) => LineType::Restaurant,
            Self::Marketplace(_) => LineType::Marketplace,
            Self::Promotion(_) => LineType::Promotion,
        }
    }
}

/// A transaction to be inserted together with its lines.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub source_reference_transaction_id: String,
    pub source: SourceSystem,
    pub business_date: NaiveDate,
    pub transaction_date: Option<NaiveDate>,
    pub source_processed_date: Option<NaiveDate>,
    pub transaction_type: String,
    pub is_reversal: bool,
    pub partner_relationship_type: Option<String>,
    pub lines: Vec<NewTransactionLine>,
}

#[derive(Debug, Clone)]
pub struct NewTransactionLine {
    pub source_reference_line_id: String,
    pub transaction_line_type: String,
    pub ringing_store: Option<String>,
    pub store_of_intent: Option<String>,
    pub kind: LineKind,
}

/// Identifiers assigned by [`crate::RollupDb::insert_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedTransaction {
    pub transaction_id: i64,
    pub line_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: i64,
    pub source_reference_transaction_id: String,
    pub source: SourceSystem,
    pub business_date: NaiveDate,
    pub transaction_date: Option<NaiveDate>,
    pub source_processed_date: Option<NaiveDate>,
    pub transaction_type: String,
    pub is_reversal: bool,
    pub partner_relationship_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<TransactionLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLine {
    pub transaction_line_id: i64,
    pub transaction_id: i64,
    pub source_reference_line_id: String,
    pub transaction_line_type: String,
    pub ringing_store: Option<String>,
    pub store_of_intent: Option<String>,
    pub kind: LineKind,
}

/// Row counts removed by a transaction tree delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub transactions: u64,
    pub lines: u64,
    pub type_specific_lines: u64,
    pub relations: u64,
}

// ============================================================================
// Aggregation configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfiguration {
    pub aggregation_configuration_id: i64,
    pub file_name_prefix: String,
    pub file_delimiter: String,
    pub is_data_quotes_surrounded: bool,
    pub aggregation_query: String,
    pub data_control_query: Option<String>,
    /// Projected columns forming the business key; empty means one group.
    pub group_key_columns: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregationConfiguration {
    /// `start_date <= date <= end_date`, with an open end.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.map_or(true, |end| date <= end)
    }
}

#[derive(Debug, Clone)]
pub struct NewAggregationConfiguration {
    pub file_name_prefix: String,
    pub file_delimiter: String,
    pub is_data_quotes_surrounded: bool,
    pub aggregation_query: String,
    pub data_control_query: Option<String>,
    pub group_key_columns: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

// ============================================================================
// Lineage
// ============================================================================

/// One member of a group: the claimed line and its projected values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub transaction_line_id: i64,
    pub values: Vec<Option<String>>,
}

/// A finalized group ready to be claimed.
#[derive(Debug, Clone)]
pub struct NewAggregationGroup {
    pub aggregation_id: AggregationId,
    pub aggregation_configuration_id: i64,
    pub run_date: NaiveDate,
    pub group_key: String,
    pub columns: Vec<String>,
    pub members: Vec<GroupMember>,
}

/// A claimed group; `file_name` is fixed at claim time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationGroup {
    pub aggregation_id: AggregationId,
    pub aggregation_configuration_id: i64,
    pub run_date: NaiveDate,
    pub sequence: u32,
    pub file_name: String,
    pub group_key: String,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationRelation {
    pub id: i64,
    pub aggregation_id: AggregationId,
    pub transaction_line_id: i64,
    pub row_position: u32,
    pub is_published_to_data_platform: bool,
    pub created_at: DateTime<Utc>,
}

/// Member count of one group, as seen from a set of line ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMembership {
    pub aggregation_id: AggregationId,
    pub line_count: u64,
}

// ============================================================================
// Generated files
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileKind {
    Data,
    Control,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Control => "CONTROL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DATA" => Some(Self::Data),
            "CONTROL" => Some(Self::Control),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewGeneratedFile {
    pub aggregation_configuration_id: i64,
    pub aggregation_id: Option<AggregationId>,
    pub file_name: String,
    pub kind: FileKind,
    pub content: Vec<u8>,
    pub content_hash: String,
}

/// A file whose name is only known once its sequence is allocated.
#[derive(Debug, Clone)]
pub struct NewSequencedFile {
    pub aggregation_configuration_id: i64,
    /// Names sharing this prefix share one sequence.
    pub name_prefix: String,
    pub kind: FileKind,
    pub content: Vec<u8>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedFileDetail {
    pub generated_file_detail_id: i64,
    pub aggregation_configuration_id: i64,
    pub aggregation_id: Option<AggregationId>,
    pub generated_file_name: String,
    pub kind: FileKind,
    #[serde(skip)]
    pub file_content: Vec<u8>,
    pub content_hash: String,
    pub is_uploaded_to_s3: bool,
    pub is_published_to_data_platform: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Ad hoc queries
// ============================================================================

/// Result of a read-only query, every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }
}
