// Legacy Record Consolidation - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;          // Error taxonomy
pub mod config;         // TOML / env / flag configuration
pub mod name_parser;    // Free-text full name → title, given, surname, suffix
pub mod email;          // Email field splitting
pub mod legacy;         // Legacy row types + '|' delimited export reader
pub mod aggregator;     // Group → canonical entity + links
pub mod entities;       // Canonical customer / producer rules
pub mod driver;         // Full consolidation pass
pub mod db;             // SQLite store
pub mod report;         // Customer order report

// Re-export commonly used types
pub use error::{ConsolidationError, Result};
pub use config::{ConfigOverrides, ConsolidationConfig};
pub use name_parser::{parse_fullname, is_name_suffix, is_name_title, ParsedName};
pub use email::get_email_addresses;
pub use legacy::{
    LegacyOrderRow, LegacyWineRow, OrderItem,
    read_order_file, read_wine_file,
};
pub use aggregator::{
    consolidate_group, CanonicalizationPolicy, Canonicalize, ConsolidatedGroup,
    EntityKind, LegacyRecord, Link, NoteScope, ReviewFlags, Selection,
};
pub use entities::{CanonicalCustomer, CanonicalProducer};
pub use driver::{run_consolidation, ConsolidationSummary, EntitySink, RowSource};
pub use db::{LoadReport, SqliteSink, SqliteStore, StoreCounts};
pub use report::{write_customer_order_report, CustomerOrderItem};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
