// 📜 Legacy Records - read-only input rows + delimited file reader
//
// Legacy tables are bulk-loaded from '|' delimited exports with a header line.
// Rows are never mutated after loading; the consolidation engine only reads them.

use crate::error::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Item slots per legacy order row
pub const ORDER_ITEM_SLOTS: usize = 5;

// ============================================================================
// LEGACY ORDER (email orders export)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub item: String,
    pub vintage: String,
    pub quantity: String,
}

/// One row of the legacy email orders table.
/// Natural key: `full_name`. Ordering: `first_date` (the order date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyOrderRow {
    pub email_order_id: i64,
    pub first_date: Option<NaiveDate>,
    pub full_name: String,
    pub last_name: String,
    pub email1: String,
    pub company_apt_no: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub phone_home: String,
    pub phone_work: String,
    pub fax_number: String,
    /// Non-blank item slots only
    pub items: Vec<OrderItem>,
}

impl LegacyOrderRow {
    /// Minimal row for building groups by hand
    pub fn new(email_order_id: i64, full_name: &str, first_date: Option<NaiveDate>, email1: &str) -> Self {
        LegacyOrderRow {
            email_order_id,
            first_date,
            full_name: full_name.to_string(),
            last_name: String::new(),
            email1: email1.to_string(),
            company_apt_no: String::new(),
            street: String::new(),
            city: String::new(),
            state: String::new(),
            zip: String::new(),
            phone_home: String::new(),
            phone_work: String::new(),
            fax_number: String::new(),
            items: Vec::new(),
        }
    }
}

// ============================================================================
// LEGACY WINE MASTER
// ============================================================================

/// One row of the legacy wine master table.
/// Natural key: `producer_name`. Ordering: `last_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyWineRow {
    pub wine_id: i64,
    pub wine_name: String,
    /// -1 for non-vintage ("NV")
    pub vintage: Option<i32>,
    pub color: String,
    pub country: String,
    pub region: String,
    pub producer_name: String,
    pub producer_description: String,
    pub producer_code: String,
    /// Raw text: "1995", "1920s" or blank
    pub year_established: String,
    pub last_updated: Option<NaiveDateTime>,
}

impl LegacyWineRow {
    /// Minimal row for building groups by hand
    pub fn new(
        wine_id: i64,
        producer_name: &str,
        last_updated: Option<NaiveDateTime>,
        producer_description: &str,
        year_established: &str,
    ) -> Self {
        LegacyWineRow {
            wine_id,
            wine_name: String::new(),
            vintage: None,
            color: String::new(),
            country: String::new(),
            region: String::new(),
            producer_name: producer_name.to_string(),
            producer_description: producer_description.to_string(),
            producer_code: String::new(),
            year_established: year_established.to_string(),
            last_updated,
        }
    }
}

// ============================================================================
// FILE RECORDS (header names as exported by the legacy system)
// ============================================================================

#[derive(Debug, Deserialize)]
struct OrderRecord {
    #[serde(rename = "EmailOrderId")]
    email_order_id: i64,
    #[serde(rename = "FirstDate", default)]
    first_date: String,
    #[serde(rename = "FullName", default)]
    full_name: String,
    #[serde(rename = "LastName", default)]
    last_name: String,
    #[serde(rename = "Email1", default)]
    email1: String,
    #[serde(rename = "CompanyAptNo", default)]
    company_apt_no: String,
    #[serde(rename = "Street", default)]
    street: String,
    #[serde(rename = "City", default)]
    city: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Zip", default)]
    zip: String,
    #[serde(rename = "PhoneHome", default)]
    phone_home: String,
    #[serde(rename = "PhoneWork", default)]
    phone_work: String,
    #[serde(rename = "FaxNumber", default)]
    fax_number: String,

    // The export names the first item slot "DelItemss"
    #[serde(rename = "DelItemss", alias = "DelItem1", default)]
    item1: String,
    #[serde(rename = "DelItem2", default)]
    item2: String,
    #[serde(rename = "DelItem3", default)]
    item3: String,
    #[serde(rename = "DelItem4", default)]
    item4: String,
    #[serde(rename = "DelItem5", default)]
    item5: String,
    #[serde(rename = "Vintage", default)]
    vintage1: String,
    #[serde(rename = "Vintage2", default)]
    vintage2: String,
    #[serde(rename = "Vintage3", default)]
    vintage3: String,
    #[serde(rename = "Vintage4", default)]
    vintage4: String,
    #[serde(rename = "Vintage5", default)]
    vintage5: String,
    #[serde(rename = "Quantity", default)]
    quantity1: String,
    #[serde(rename = "Quant2", default)]
    quantity2: String,
    #[serde(rename = "Quant3", default)]
    quantity3: String,
    #[serde(rename = "Quant4", default)]
    quantity4: String,
    #[serde(rename = "Quant5", default)]
    quantity5: String,
}

#[derive(Debug, Deserialize)]
struct WineRecord {
    #[serde(rename = "WineId")]
    wine_id: i64,
    #[serde(rename = "FullName", default)]
    wine_name: String,
    #[serde(rename = "Vintage", default)]
    vintage: String,
    #[serde(rename = "Color", default)]
    color: String,
    #[serde(rename = "Country", default)]
    country: String,
    #[serde(rename = "Region", default)]
    region: String,
    #[serde(rename = "ProducerName", default)]
    producer_name: String,
    #[serde(rename = "ProducerDescription", default)]
    producer_description: String,
    #[serde(rename = "ProducerCode", default)]
    producer_code: String,
    #[serde(rename = "YearEstablished", default)]
    year_established: String,
    #[serde(rename = "LastUpdated", alias = "LASTUPDATED", default)]
    last_updated: String,
}

/// Rows read from a legacy export plus per-value conversion warnings
#[derive(Debug)]
pub struct ParsedFile<T> {
    pub rows: Vec<T>,
    pub warnings: Vec<String>,
}

fn reader_for(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .quote(b'"')
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)?;
    Ok(reader)
}

/// Read a legacy email orders export
pub fn read_order_file(path: &Path) -> Result<ParsedFile<LegacyOrderRow>> {
    let mut rdr = reader_for(path)?;
    let mut parsed = ParsedFile {
        rows: Vec::new(),
        warnings: Vec::new(),
    };

    for result in rdr.deserialize() {
        let record: OrderRecord = result?;

        let first_date = match parse_legacy_date(&record.first_date) {
            Ok(date) => date,
            Err(msg) => {
                parsed
                    .warnings
                    .push(format!("order {}: FirstDate {}", record.email_order_id, msg));
                None
            }
        };

        let slots = [
            (record.item1, record.vintage1, record.quantity1),
            (record.item2, record.vintage2, record.quantity2),
            (record.item3, record.vintage3, record.quantity3),
            (record.item4, record.vintage4, record.quantity4),
            (record.item5, record.vintage5, record.quantity5),
        ];
        let items = slots
            .into_iter()
            .filter(|(item, _, _)| !item.trim().is_empty())
            .map(|(item, vintage, quantity)| OrderItem {
                item,
                vintage,
                quantity,
            })
            .collect();

        parsed.rows.push(LegacyOrderRow {
            email_order_id: record.email_order_id,
            first_date,
            full_name: record.full_name,
            last_name: record.last_name,
            email1: record.email1,
            company_apt_no: record.company_apt_no,
            street: record.street,
            city: record.city,
            state: record.state,
            zip: record.zip,
            phone_home: record.phone_home,
            phone_work: record.phone_work,
            fax_number: record.fax_number,
            items,
        });
    }

    Ok(parsed)
}

/// Read a legacy wine master export
pub fn read_wine_file(path: &Path) -> Result<ParsedFile<LegacyWineRow>> {
    let mut rdr = reader_for(path)?;
    let mut parsed = ParsedFile {
        rows: Vec::new(),
        warnings: Vec::new(),
    };

    for result in rdr.deserialize() {
        let record: WineRecord = result?;

        let vintage = match parse_vintage(&record.vintage) {
            Ok(v) => v,
            Err(msg) => {
                parsed
                    .warnings
                    .push(format!("wine {}: Vintage {}", record.wine_id, msg));
                None
            }
        };

        let last_updated = match parse_legacy_timestamp(&record.last_updated) {
            Ok(ts) => ts,
            Err(msg) => {
                parsed
                    .warnings
                    .push(format!("wine {}: LastUpdated {}", record.wine_id, msg));
                None
            }
        };

        parsed.rows.push(LegacyWineRow {
            wine_id: record.wine_id,
            wine_name: record.wine_name,
            vintage,
            color: record.color,
            country: record.country,
            region: record.region,
            producer_name: record.producer_name,
            producer_description: record.producer_description,
            producer_code: record.producer_code,
            year_established: record.year_established,
            last_updated,
        });
    }

    Ok(parsed)
}

// ============================================================================
// VALUE CONVERSIONS
// ============================================================================

/// Blank → None. Accepts YYYY-MM-DD and MM/DD/YYYY.
pub fn parse_legacy_date(raw: &str) -> std::result::Result<Option<NaiveDate>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .map(Some)
        .map_err(|_| format!("'{}' is not a date", raw))
}

/// Blank → None. Accepts a full timestamp or any date `parse_legacy_date` accepts.
pub fn parse_legacy_timestamp(raw: &str) -> std::result::Result<Option<NaiveDateTime>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(ts));
    }

    parse_legacy_date(raw)
        .map(|date| date.and_then(|d| d.and_hms_opt(0, 0, 0)))
        .map_err(|_| format!("'{}' is not a timestamp", raw))
}

/// "NV" → -1, blank → None
pub fn parse_vintage(raw: &str) -> std::result::Result<Option<i32>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw == "NV" {
        return Ok(Some(-1));
    }

    raw.parse::<i32>()
        .map(Some)
        .map_err(|_| format!("'{}' is not a vintage", raw))
}
