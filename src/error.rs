// ⚠️ Error taxonomy for the consolidation pipeline
//
// Setup failures and data-shape violations abort a pass. Heuristic ambiguity
// (odd names, multi-address email fields) is never an error: it becomes a
// review flag on the output rows instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for all library operations
pub type Result<T> = std::result::Result<T, ConsolidationError>;

#[derive(Error, Debug)]
pub enum ConsolidationError {
    // ========================================================================
    // SETUP (fatal before any row is processed)
    // ========================================================================
    /// Store could not be opened
    #[error("failed to open store at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Configuration missing, unreadable or invalid
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // DATA SHAPE (aborts the pass, reported verbatim)
    // ========================================================================
    /// A legacy value the canonical schema cannot represent
    #[error("row {row_id} of '{key}': {detail}")]
    DataShape {
        key: String,
        row_id: i64,
        detail: String,
    },

    /// The store rejected a generated statement
    #[error("statement rejected: {source}\n  statement: {statement}\n  input: {input}")]
    Statement {
        statement: String,
        input: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Write attempted after the pass was committed
    #[error("sink already committed")]
    SinkClosed,

    // ========================================================================
    // GROUP PRECONDITIONS (caller handed the aggregator a bad group)
    // ========================================================================
    #[error("group '{key}' has no rows")]
    EmptyGroup { key: String },

    #[error("group '{key}' is not in ascending order at row {row_id}")]
    GroupOutOfOrder { key: String, row_id: i64 },

    #[error("row {row_id} has key '{found}', expected '{key}'")]
    KeyMismatch {
        key: String,
        row_id: i64,
        found: String,
    },

    #[error("policy for {policy} cannot consolidate {rows} rows")]
    PolicyMismatch {
        policy: &'static str,
        rows: &'static str,
    },

    /// Report input not grouped by customer then order date
    #[error("report rows out of order at order {order_id}")]
    ReportOutOfOrder { order_id: i64 },
}

impl ConsolidationError {
    /// Setup failures happen before any row processing
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            ConsolidationError::Connect { .. }
                | ConsolidationError::Config(_)
                | ConsolidationError::Io(_)
        )
    }

    /// Data-shape failures are tied to a specific input row or statement
    pub fn is_data_shape(&self) -> bool {
        matches!(
            self,
            ConsolidationError::DataShape { .. }
                | ConsolidationError::Statement { .. }
                | ConsolidationError::Csv(_)
        )
    }
}
