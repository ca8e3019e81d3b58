// 🗄️ SQLite store - legacy tables, canonical tables, link tables
//
// SqliteStore owns the connection for its whole lifetime; dropping it closes
// the connection on every exit path. Reads go straight to the connection,
// consolidation writes go through a SqliteSink holding one transaction for
// the whole pass (dropped without commit = rolled back).

use crate::aggregator::{CanonicalizationPolicy, EntityKind, Link};
use crate::config::ConsolidationConfig;
use crate::driver::{EntitySink, RowSource};
use crate::entities::{CanonicalCustomer, CanonicalProducer};
use crate::error::{ConsolidationError, Result};
use crate::legacy::{
    read_order_file, read_wine_file, LegacyOrderRow, LegacyWineRow, OrderItem, ORDER_ITEM_SLOTS,
};
use crate::report::CustomerOrderItem;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row, ToSql, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

const DATE_FMT: &str = "%Y-%m-%d";
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a bulk load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_affected: usize,
    pub warnings: usize,
}

/// Row counts of the canonical and link tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub customers: i64,
    pub customer_links: i64,
    pub producers: i64,
    pub producer_links: i64,
}

pub struct SqliteStore {
    conn: Connection,
    config: ConsolidationConfig,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(config: &ConsolidationConfig) -> Result<Self> {
        let conn = Connection::open(&config.database).map_err(|source| {
            ConsolidationError::Connect {
                path: config.database.clone(),
                source,
            }
        })?;

        // WAL for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = SqliteStore {
            conn,
            config: config.clone(),
        };
        store.setup_database()?;
        info!("Opened store at {}", config.database.display());
        Ok(store)
    }

    /// In-memory database with the schema in place
    pub fn in_memory(config: &ConsolidationConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| ConsolidationError::Connect {
            path: ":memory:".into(),
            source,
        })?;
        let store = SqliteStore {
            conn,
            config: config.clone(),
        };
        store.setup_database()?;
        Ok(store)
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn setup_database(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;

        let item_columns: String = (1..=ORDER_ITEM_SLOTS)
            .map(|n| {
                format!(
                    "item{n} TEXT NOT NULL DEFAULT '',
                     vintage{n} TEXT NOT NULL DEFAULT '',
                     quantity{n} TEXT NOT NULL DEFAULT '',"
                )
            })
            .collect();

        // ======================================================================
        // Legacy tables (read-only input once loaded)
        // ======================================================================
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {orders} (
                email_order_id INTEGER PRIMARY KEY,
                first_date TEXT,
                full_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email1 TEXT NOT NULL DEFAULT '',
                company_apt_no TEXT NOT NULL DEFAULT '',
                street TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                zip TEXT NOT NULL DEFAULT '',
                phone_home TEXT NOT NULL DEFAULT '',
                phone_work TEXT NOT NULL DEFAULT '',
                fax_number TEXT NOT NULL DEFAULT '',
                {item_columns}
                loaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx{orders}_full_name ON {orders}(full_name, first_date);

            CREATE TABLE IF NOT EXISTS {wines} (
                wine_id INTEGER PRIMARY KEY,
                wine_name TEXT NOT NULL DEFAULT '',
                vintage INTEGER,
                color TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                producer_name TEXT NOT NULL DEFAULT '',
                producer_description TEXT NOT NULL DEFAULT '',
                producer_code TEXT NOT NULL DEFAULT '',
                year_established TEXT NOT NULL DEFAULT '',
                last_updated TEXT,
                loaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx{wines}_producer ON {wines}(producer_name, last_updated);",
            orders = self.config.orders_table(),
            wines = self.config.wines_table(),
        ))?;

        // ======================================================================
        // Canonical + link tables (no natural-key uniqueness)
        // ======================================================================
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS email_customers (
                email_customer_id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                given_name TEXT NOT NULL,
                surname TEXT NOT NULL,
                suffix TEXT,
                email TEXT,
                first_order_date TEXT,
                last_order_date TEXT,
                created_by TEXT NOT NULL,
                last_modified_by TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS email_customers_legacy_orders (
                email_customer_id INTEGER NOT NULL REFERENCES email_customers(email_customer_id),
                email_order_id INTEGER NOT NULL,
                name_needs_review INTEGER NOT NULL,
                email_needs_review INTEGER NOT NULL,
                conversion_notes TEXT,
                PRIMARY KEY (email_customer_id, email_order_id)
            );
            CREATE INDEX IF NOT EXISTS idx_ec_legacy_order ON email_customers_legacy_orders(email_order_id);

            CREATE TABLE IF NOT EXISTS producers (
                producer_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                producer_code TEXT NOT NULL,
                year_established INTEGER
                    CHECK (year_established IS NULL OR year_established BETWEEN 1000 AND 9999),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS producers_legacy_wines (
                producer_id INTEGER NOT NULL REFERENCES producers(producer_id),
                wine_id INTEGER NOT NULL,
                conversion_notes TEXT,
                PRIMARY KEY (producer_id, wine_id)
            );",
        )?;

        Ok(())
    }

    // ========================================================================
    // BULK LOAD
    // ========================================================================

    /// Load a '|' delimited orders export, replacing rows with the same id
    pub fn load_legacy_orders(&self, path: &Path) -> Result<LoadReport> {
        let parsed = read_order_file(path)?;
        for warning in &parsed.warnings {
            warn!("{}: {}", path.display(), warning);
        }

        let slot_columns: Vec<String> = (1..=ORDER_ITEM_SLOTS)
            .map(|n| format!("item{n}, vintage{n}, quantity{n}"))
            .collect();
        let placeholders: Vec<String> = (1..=13 + 3 * ORDER_ITEM_SLOTS)
            .map(|n| format!("?{n}"))
            .collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} (
                email_order_id, first_date, full_name, last_name, email1,
                company_apt_no, street, city, state, zip,
                phone_home, phone_work, fax_number, {}
            ) VALUES ({})",
            self.config.orders_table(),
            slot_columns.join(", "),
            placeholders.join(", ")
        );

        let blank = String::new();
        let tx = self.conn.unchecked_transaction()?;
        let mut rows_affected = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in &parsed.rows {
                let first_date = row.first_date.map(|d| d.format(DATE_FMT).to_string());
                let mut values: Vec<&dyn ToSql> = vec![
                    &row.email_order_id,
                    &first_date,
                    &row.full_name,
                    &row.last_name,
                    &row.email1,
                    &row.company_apt_no,
                    &row.street,
                    &row.city,
                    &row.state,
                    &row.zip,
                    &row.phone_home,
                    &row.phone_work,
                    &row.fax_number,
                ];
                // Blank slots were dropped on read; pad back to the fixed width
                for slot in 0..ORDER_ITEM_SLOTS {
                    match row.items.get(slot) {
                        Some(item) => {
                            values.extend([&item.item as &dyn ToSql, &item.vintage, &item.quantity])
                        }
                        None => values.extend([&blank as &dyn ToSql, &blank, &blank]),
                    }
                }

                rows_affected += stmt
                    .execute(values.as_slice())
                    .map_err(|source| statement_error(&sql, row, source))?;
            }
        }
        tx.commit()?;

        let report = LoadReport {
            rows_affected,
            warnings: parsed.warnings.len(),
        };
        info!(
            "Loaded {} into {}: {} rows affected, {} warnings",
            path.display(),
            self.config.orders_table(),
            report.rows_affected,
            report.warnings
        );
        Ok(report)
    }

    /// Load a '|' delimited wine master export, replacing rows with the same id
    pub fn load_legacy_wines(&self, path: &Path) -> Result<LoadReport> {
        let parsed = read_wine_file(path)?;
        for warning in &parsed.warnings {
            warn!("{}: {}", path.display(), warning);
        }

        let sql = format!(
            "INSERT OR REPLACE INTO {} (
                wine_id, wine_name, vintage, color, country, region,
                producer_name, producer_description, producer_code,
                year_established, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            self.config.wines_table()
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut rows_affected = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in &parsed.rows {
                rows_affected += stmt
                    .execute(params![
                        row.wine_id,
                        row.wine_name,
                        row.vintage,
                        row.color,
                        row.country,
                        row.region,
                        row.producer_name,
                        row.producer_description,
                        row.producer_code,
                        row.year_established,
                        row.last_updated.map(|ts| ts.format(TIMESTAMP_FMT).to_string()),
                    ])
                    .map_err(|source| statement_error(&sql, row, source))?;
            }
        }
        tx.commit()?;

        let report = LoadReport {
            rows_affected,
            warnings: parsed.warnings.len(),
        };
        info!(
            "Loaded {} into {}: {} rows affected, {} warnings",
            path.display(),
            self.config.wines_table(),
            report.rows_affected,
            report.warnings
        );
        Ok(report)
    }

    // ========================================================================
    // CONSOLIDATION SINK
    // ========================================================================

    /// Start a consolidation pass: every write until `commit` is one transaction
    pub fn begin_pass(&self) -> Result<SqliteSink<'_>> {
        Ok(SqliteSink {
            tx: Some(self.conn.unchecked_transaction()?),
            update_user: self.config.update_user.clone(),
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            customers: self.count("email_customers")?,
            customer_links: self.count("email_customers_legacy_orders")?,
            producers: self.count("producers")?,
            producer_links: self.count("producers_legacy_wines")?,
        })
    }

    fn count(&self, table: &str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }

    /// All canonical customers with their ids, in id order
    pub fn customers(&self) -> Result<Vec<(i64, CanonicalCustomer)>> {
        let mut stmt = self.conn.prepare(
            "SELECT email_customer_id, title, given_name, surname, suffix, email,
                    first_order_date, last_order_date
             FROM email_customers
             ORDER BY email_customer_id",
        )?;

        let customers = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    CanonicalCustomer {
                        title: row.get(1)?,
                        given_name: row.get(2)?,
                        surname: row.get(3)?,
                        suffix: row.get(4)?,
                        email: row.get(5)?,
                        first_order_date: date_column(row, 6)?,
                        last_order_date: date_column(row, 7)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(customers)
    }

    /// (customer id, link) pairs, in insertion order
    pub fn customer_links(&self) -> Result<Vec<(i64, Link)>> {
        let mut stmt = self.conn.prepare(
            "SELECT email_customer_id, email_order_id, name_needs_review,
                    email_needs_review, conversion_notes
             FROM email_customers_legacy_orders
             ORDER BY rowid",
        )?;

        let links = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    Link {
                        legacy_row_id: row.get(1)?,
                        name_needs_review: row.get(2)?,
                        email_needs_review: row.get(3)?,
                        conversion_note: row.get(4)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(links)
    }

    pub fn producers(&self) -> Result<Vec<(i64, CanonicalProducer)>> {
        let mut stmt = self.conn.prepare(
            "SELECT producer_id, name, description, producer_code, year_established
             FROM producers
             ORDER BY producer_id",
        )?;

        let producers = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    CanonicalProducer {
                        name: row.get(1)?,
                        description: row.get(2)?,
                        producer_code: row.get(3)?,
                        year_established: row.get(4)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(producers)
    }

    /// (producer id, link) pairs, in insertion order
    pub fn producer_links(&self) -> Result<Vec<(i64, Link)>> {
        let mut stmt = self.conn.prepare(
            "SELECT producer_id, wine_id, conversion_notes
             FROM producers_legacy_wines
             ORDER BY rowid",
        )?;

        let links = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    Link {
                        legacy_row_id: row.get(1)?,
                        name_needs_review: false,
                        email_needs_review: false,
                        conversion_note: row.get(2)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(links)
    }

    /// One row per ordered item, grouped by customer then order date.
    /// An empty `emails` slice selects every customer.
    pub fn customer_order_items(&self, emails: &[String]) -> Result<Vec<CustomerOrderItem>> {
        let orders = self.config.orders_table();

        let slots: Vec<String> = (1..=ORDER_ITEM_SLOTS)
            .map(|n| {
                format!(
                    "SELECT email_order_id, item{n} AS item, vintage{n} AS vintage,
                            quantity{n} AS quantity, {n} AS slot
                     FROM {orders}
                     WHERE item{n} != ''"
                )
            })
            .collect();

        let filter = if emails.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = (1..=emails.len()).map(|n| format!("?{n}")).collect();
            format!("WHERE ec.email IN ({})", placeholders.join(", "))
        };

        let sql = format!(
            "SELECT ec.email_customer_id, ec.given_name, ec.surname, ec.email,
                    leo.phone_home, leo.first_date, u.email_order_id,
                    u.item, u.vintage, u.quantity
             FROM ({slots}) AS u
             JOIN {orders} AS leo ON leo.email_order_id = u.email_order_id
             JOIN email_customers_legacy_orders AS ecl ON ecl.email_order_id = u.email_order_id
             JOIN email_customers AS ec ON ec.email_customer_id = ecl.email_customer_id
             {filter}
             ORDER BY ec.email_customer_id ASC, leo.first_date ASC,
                      u.email_order_id ASC, u.slot ASC",
            slots = slots.join(" UNION ALL "),
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(emails.iter()), |row| {
                Ok(CustomerOrderItem {
                    customer_id: row.get(0)?,
                    given_name: row.get(1)?,
                    surname: row.get(2)?,
                    email: row.get(3)?,
                    phone_home: row.get(4)?,
                    order_date: date_column(row, 5)?,
                    order_id: row.get(6)?,
                    item: OrderItem {
                        item: row.get(7)?,
                        vintage: row.get(8)?,
                        quantity: row.get(9)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn ensure_policy(&self, policy: &CanonicalizationPolicy, rows: EntityKind) -> Result<()> {
        if policy.entity != rows {
            return Err(ConsolidationError::PolicyMismatch {
                policy: policy.entity.as_str(),
                rows: rows.as_str(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ROW SOURCES
// ============================================================================

impl RowSource<LegacyOrderRow> for SqliteStore {
    fn distinct_natural_keys(&self, policy: &CanonicalizationPolicy) -> Result<Vec<String>> {
        self.ensure_policy(policy, EntityKind::Customer)?;
        distinct_keys(
            &self.conn,
            &format!(
                "SELECT DISTINCT full_name FROM {}
                 WHERE full_name != ''
                 ORDER BY full_name ASC",
                self.config.orders_table()
            ),
        )
    }

    fn rows_for_key(&self, key: &str, policy: &CanonicalizationPolicy) -> Result<Vec<LegacyOrderRow>> {
        self.ensure_policy(policy, EntityKind::Customer)?;

        let item_columns: Vec<String> = (1..=ORDER_ITEM_SLOTS)
            .map(|n| format!("item{n}, vintage{n}, quantity{n}"))
            .collect();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT email_order_id, first_date, full_name, last_name, email1,
                    company_apt_no, street, city, state, zip,
                    phone_home, phone_work, fax_number, {}
             FROM {}
             WHERE full_name = ?1
             ORDER BY first_date ASC, email_order_id ASC",
            item_columns.join(", "),
            self.config.orders_table()
        ))?;

        let rows = stmt
            .query_map([key], |row| {
                let mut items = Vec::new();
                for slot in 0..ORDER_ITEM_SLOTS {
                    let base = 13 + 3 * slot;
                    let item: String = row.get(base)?;
                    if !item.trim().is_empty() {
                        items.push(OrderItem {
                            item,
                            vintage: row.get(base + 1)?,
                            quantity: row.get(base + 2)?,
                        });
                    }
                }

                Ok(LegacyOrderRow {
                    email_order_id: row.get(0)?,
                    first_date: date_column(row, 1)?,
                    full_name: row.get(2)?,
                    last_name: row.get(3)?,
                    email1: row.get(4)?,
                    company_apt_no: row.get(5)?,
                    street: row.get(6)?,
                    city: row.get(7)?,
                    state: row.get(8)?,
                    zip: row.get(9)?,
                    phone_home: row.get(10)?,
                    phone_work: row.get(11)?,
                    fax_number: row.get(12)?,
                    items,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

impl RowSource<LegacyWineRow> for SqliteStore {
    fn distinct_natural_keys(&self, policy: &CanonicalizationPolicy) -> Result<Vec<String>> {
        self.ensure_policy(policy, EntityKind::Producer)?;
        distinct_keys(
            &self.conn,
            &format!(
                "SELECT DISTINCT producer_name FROM {}
                 ORDER BY producer_name ASC",
                self.config.wines_table()
            ),
        )
    }

    fn rows_for_key(&self, key: &str, policy: &CanonicalizationPolicy) -> Result<Vec<LegacyWineRow>> {
        self.ensure_policy(policy, EntityKind::Producer)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT wine_id, wine_name, vintage, color, country, region,
                    producer_name, producer_description, producer_code,
                    year_established, last_updated
             FROM {}
             WHERE producer_name = ?1
             ORDER BY last_updated ASC, wine_id ASC",
            self.config.wines_table()
        ))?;

        let rows = stmt
            .query_map([key], |row| {
                Ok(LegacyWineRow {
                    wine_id: row.get(0)?,
                    wine_name: row.get(1)?,
                    vintage: row.get(2)?,
                    color: row.get(3)?,
                    country: row.get(4)?,
                    region: row.get(5)?,
                    producer_name: row.get(6)?,
                    producer_description: row.get(7)?,
                    producer_code: row.get(8)?,
                    year_established: row.get(9)?,
                    last_updated: timestamp_column(row, 10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn distinct_keys(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(keys)
}

// ============================================================================
// SINK
// ============================================================================

/// Consolidation writes for one pass. Dropping it uncommitted rolls back.
pub struct SqliteSink<'conn> {
    tx: Option<Transaction<'conn>>,
    update_user: String,
}

impl<'conn> SqliteSink<'conn> {
    fn tx(&self) -> Result<&Transaction<'conn>> {
        self.tx.as_ref().ok_or(ConsolidationError::SinkClosed)
    }
}

const INSERT_CUSTOMER_SQL: &str = "INSERT INTO email_customers (
        title, given_name, surname, suffix, email,
        first_order_date, last_order_date, created_by, last_modified_by
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_CUSTOMER_LINK_SQL: &str = "INSERT INTO email_customers_legacy_orders (
        email_customer_id, email_order_id, name_needs_review, email_needs_review, conversion_notes
    ) VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_PRODUCER_SQL: &str = "INSERT INTO producers (
        name, description, producer_code, year_established
    ) VALUES (?1, ?2, ?3, ?4)";

const INSERT_PRODUCER_LINK_SQL: &str = "INSERT INTO producers_legacy_wines (
        producer_id, wine_id, conversion_notes
    ) VALUES (?1, ?2, ?3)";

impl EntitySink<CanonicalCustomer> for SqliteSink<'_> {
    fn insert_canonical(&mut self, entity: &CanonicalCustomer) -> Result<i64> {
        let tx = self.tx()?;
        tx.execute(
            INSERT_CUSTOMER_SQL,
            params![
                entity.title,
                entity.given_name,
                entity.surname,
                entity.suffix,
                entity.email,
                entity.first_order_date.map(|d| d.format(DATE_FMT).to_string()),
                entity.last_order_date.map(|d| d.format(DATE_FMT).to_string()),
                self.update_user,
                self.update_user,
            ],
        )
        .map_err(|source| statement_error(INSERT_CUSTOMER_SQL, entity, source))?;
        Ok(tx.last_insert_rowid())
    }

    fn insert_link(&mut self, canonical_id: i64, link: &Link) -> Result<()> {
        self.tx()?
            .execute(
                INSERT_CUSTOMER_LINK_SQL,
                params![
                    canonical_id,
                    link.legacy_row_id,
                    link.name_needs_review,
                    link.email_needs_review,
                    link.conversion_note,
                ],
            )
            .map_err(|source| statement_error(INSERT_CUSTOMER_LINK_SQL, link, source))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        commit_pass(&mut self.tx)
    }
}

impl EntitySink<CanonicalProducer> for SqliteSink<'_> {
    fn insert_canonical(&mut self, entity: &CanonicalProducer) -> Result<i64> {
        let tx = self.tx()?;
        tx.execute(
            INSERT_PRODUCER_SQL,
            params![
                entity.name,
                entity.description,
                entity.producer_code,
                entity.year_established,
            ],
        )
        .map_err(|source| statement_error(INSERT_PRODUCER_SQL, entity, source))?;
        Ok(tx.last_insert_rowid())
    }

    fn insert_link(&mut self, canonical_id: i64, link: &Link) -> Result<()> {
        self.tx()?
            .execute(
                INSERT_PRODUCER_LINK_SQL,
                params![canonical_id, link.legacy_row_id, link.conversion_note],
            )
            .map_err(|source| statement_error(INSERT_PRODUCER_LINK_SQL, link, source))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        commit_pass(&mut self.tx)
    }
}

fn commit_pass(tx: &mut Option<Transaction<'_>>) -> Result<()> {
    let tx = tx.take().ok_or(ConsolidationError::SinkClosed)?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

fn statement_error<T: Serialize>(sql: &str, input: &T, source: rusqlite::Error) -> ConsolidationError {
    ConsolidationError::Statement {
        statement: sql.split_whitespace().collect::<Vec<_>>().join(" "),
        input: serde_json::to_string(input).unwrap_or_else(|e| format!("<unserializable: {}>", e)),
        source,
    }
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FMT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FMT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::run_consolidation;
    use std::io::Write;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(&ConsolidationConfig::default()).unwrap()
    }

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const ORDERS: &str = "EmailOrderId|FirstDate|FullName|Email1|PhoneHome|DelItemss|Vintage|Quantity|DelItem2|Vintage2|Quant2\n\
        3|2024-03-01|Smith|b@x.com|555-0101|Rioja|2018|6|||\n\
        1|2024-01-01|Smith|a@x.com|555-0101|Barolo|2015|2|Chianti|2019|1\n\
        2|2024-02-01|Jane Doe|jane@x.com|555-0199|Cava|NV|12|||\n\
        4|2024-02-02||blank@x.com||Port|1977|1|||\n";

    const WINES: &str = "WineId|FullName|Vintage|ProducerName|ProducerDescription|ProducerCode|YearEstablished|LastUpdated\n\
        10|Rouge|2019|Maison A|Family estate|MA|1995|2023-01-01 08:00:00\n\
        11|Blanc|2020|Maison A|Family estate|MA||2023-02-01 08:00:00\n\
        12|Brut|NV|Maison A|Family estate|MA2|1980s|2023-03-01 08:00:00\n\
        13|Tinto|2018|Bodega B|Hillside|BB|1901|\n";

    #[test]
    fn test_load_and_read_orders_in_order() {
        let store = store();
        let file = write_file(ORDERS);

        let report = store.load_legacy_orders(file.path()).unwrap();
        assert_eq!(report.rows_affected, 4);
        assert_eq!(report.warnings, 0);

        let policy = CanonicalizationPolicy::CUSTOMER;
        let keys = RowSource::<LegacyOrderRow>::distinct_natural_keys(&store, &policy).unwrap();
        assert_eq!(keys, vec!["Jane Doe".to_string(), "Smith".to_string()]);

        let rows: Vec<LegacyOrderRow> = store.rows_for_key("Smith", &policy).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.email_order_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(rows[0].items.len(), 2);
        assert_eq!(rows[0].phone_home, "555-0101");
    }

    #[test]
    fn test_reload_replaces_rows() {
        let store = store();
        let file = write_file(ORDERS);

        store.load_legacy_orders(file.path()).unwrap();
        store.load_legacy_orders(file.path()).unwrap();

        let rows: Vec<LegacyOrderRow> = store
            .rows_for_key("Smith", &CanonicalizationPolicy::CUSTOMER)
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_wrong_policy_rejected() {
        let store = store();
        let result: Result<Vec<LegacyWineRow>> =
            store.rows_for_key("Maison A", &CanonicalizationPolicy::CUSTOMER);
        assert!(matches!(result, Err(ConsolidationError::PolicyMismatch { .. })));
    }

    #[test]
    fn test_customer_pass_end_to_end() {
        let store = store();
        store.load_legacy_orders(write_file(ORDERS).path()).unwrap();

        let summary = {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyOrderRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::CUSTOMER)
                .unwrap()
        };

        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.review_count, 1);

        let customers = store.customers().unwrap();
        assert_eq!(customers.len(), 2);
        let (smith_id, smith) = &customers[1];
        assert_eq!(smith.surname, "Smith");
        assert_eq!(smith.email.as_deref(), Some("a@x.com"));
        assert_eq!(smith.first_order_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(smith.last_order_date, NaiveDate::from_ymd_opt(2024, 3, 1));

        let links: Vec<Link> = store
            .customer_links()
            .unwrap()
            .into_iter()
            .filter(|(id, _)| id == smith_id)
            .map(|(_, link)| link)
            .collect();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.email_needs_review));
        assert_eq!(
            links[0].conversion_note.as_deref(),
            Some("Email was changed in order ids: 3")
        );
    }

    #[test]
    fn test_producer_pass_end_to_end() {
        let store = store();
        let report = store.load_legacy_wines(write_file(WINES).path()).unwrap();
        assert_eq!(report.rows_affected, 4);

        let summary = {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyWineRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::PRODUCER)
                .unwrap()
        };
        assert_eq!(summary.processed_count, 2);
        // Decade note alone is not a review
        assert_eq!(summary.review_count, 0);

        let producers = store.producers().unwrap();
        assert_eq!(producers[0].1.name, "Bodega B");
        assert_eq!(producers[0].1.year_established, Some(1901));
        assert_eq!(producers[1].1.name, "Maison A");
        assert_eq!(producers[1].1.year_established, Some(1980));
        assert_eq!(producers[1].1.producer_code, "MA2");

        let maison_id = producers[1].0;
        let notes: Vec<Option<String>> = store
            .producer_links()
            .unwrap()
            .into_iter()
            .filter(|(id, _)| *id == maison_id)
            .map(|(_, link)| link.conversion_note)
            .collect();
        assert_eq!(
            notes,
            vec![None, None, Some("year established is decade".to_string())]
        );
    }

    #[test]
    fn test_whitespace_name_becomes_review_flagged_customer() {
        let store = store();
        let orders = "EmailOrderId|FirstDate|FullName|Email1\n\
            1|2024-01-01|   |a@x.com\n\
            2|2024-01-02|Jane Doe|j@x.com\n\
            3|2024-01-03||nobody@x.com\n";
        store.load_legacy_orders(write_file(orders).path()).unwrap();

        let summary = {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyOrderRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::CUSTOMER)
                .unwrap()
        };
        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.review_count, 1);

        let mut linked: Vec<i64> = store
            .customer_links()
            .unwrap()
            .iter()
            .map(|(_, link)| link.legacy_row_id)
            .collect();
        linked.sort();
        // Only the exactly-empty name is left out
        assert_eq!(linked, vec![1, 2]);

        let links = store.customer_links().unwrap();
        let blank_link = links.iter().find(|(_, l)| l.legacy_row_id == 1).unwrap();
        assert!(blank_link.1.name_needs_review);
    }

    #[test]
    fn test_blank_producer_name_still_consolidated() {
        let store = store();
        let wines = "WineId|ProducerName|ProducerDescription|YearEstablished|LastUpdated\n\
            1||unknown||2023-01-01\n\
            2|Alpha|ok|1900|2023-01-01\n";
        store.load_legacy_wines(write_file(wines).path()).unwrap();

        let summary = {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyWineRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::PRODUCER)
                .unwrap()
        };

        assert_eq!(summary.processed_count, 2);
        let names: Vec<String> = store.producers().unwrap().into_iter().map(|(_, p)| p.name).collect();
        assert_eq!(names, vec![String::new(), "Alpha".to_string()]);
        assert_eq!(store.counts().unwrap().producer_links, 2);
    }

    #[test]
    fn test_rerun_without_clearing_duplicates() {
        let store = store();
        store.load_legacy_orders(write_file(ORDERS).path()).unwrap();

        for _ in 0..2 {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyOrderRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::CUSTOMER)
                .unwrap();
        }

        let counts = store.counts().unwrap();
        assert_eq!(counts.customers, 4);
        assert_eq!(counts.customer_links, 6);
    }

    #[test]
    fn test_failed_pass_leaves_nothing_committed() {
        let store = store();
        let wines = "WineId|ProducerName|ProducerDescription|YearEstablished|LastUpdated\n\
            1|Alpha|ok|1900|2023-01-01\n\
            2|Beta|ok|circa 1900|2023-01-01\n";
        store.load_legacy_wines(write_file(wines).path()).unwrap();

        let result = {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyWineRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::PRODUCER)
        };

        let err = result.unwrap_err();
        assert!(err.is_data_shape());
        // Alpha was written before Beta failed, then rolled back with the sink
        assert_eq!(store.counts().unwrap().producers, 0);
    }

    #[test]
    fn test_commit_closes_sink() {
        let store = store();
        let mut sink = store.begin_pass().unwrap();

        EntitySink::<CanonicalProducer>::commit(&mut sink).unwrap();
        let err = EntitySink::<CanonicalProducer>::insert_canonical(
            &mut sink,
            &CanonicalProducer {
                name: "Late".to_string(),
                description: String::new(),
                producer_code: String::new(),
                year_established: None,
            },
        )
        .unwrap_err();

        assert!(matches!(err, ConsolidationError::SinkClosed));
    }

    #[test]
    fn test_schema_rejection_reports_statement() {
        let store = store();
        let mut sink = store.begin_pass().unwrap();

        let err = EntitySink::<CanonicalProducer>::insert_canonical(
            &mut sink,
            &CanonicalProducer {
                name: "Too Old".to_string(),
                description: String::new(),
                producer_code: String::new(),
                year_established: Some(99),
            },
        )
        .unwrap_err();

        match err {
            ConsolidationError::Statement { statement, input, .. } => {
                assert!(statement.starts_with("INSERT INTO producers"));
                assert!(input.contains("Too Old"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_customer_order_items_filter() {
        let store = store();
        store.load_legacy_orders(write_file(ORDERS).path()).unwrap();
        {
            let mut sink = store.begin_pass().unwrap();
            run_consolidation::<LegacyOrderRow, _, _>(&store, &mut sink, &CanonicalizationPolicy::CUSTOMER)
                .unwrap();
        }

        let all = store.customer_order_items(&[]).unwrap();
        // Jane: 1 item; Smith: 2 + 1 items; blank-name order has no customer
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].surname, "Doe");

        let smith = store.customer_order_items(&["a@x.com".to_string()]).unwrap();
        let items: Vec<&str> = smith.iter().map(|i| i.item.item.as_str()).collect();
        assert_eq!(items, vec!["Barolo", "Chianti", "Rioja"]);
        assert_eq!(smith[0].order_id, 1);
        assert_eq!(smith[2].order_id, 3);
    }
}
