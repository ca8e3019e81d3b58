// 🍇 Producer - canonical producer from legacy wine master rows
//
// Policy: rows are scanned oldest to newest by LastUpdated and the canonical
// snapshot is replaced by every row, so the most recently updated row wins.
// The producer identity is fixed at first sight of the name; every wine row
// links to it.
//
// Each row's description is compared with the snapshot it replaces (the row
// just before it), so a producer whose description flips back and forth gets
// "Description changed" on every flip, not only on net change.

use crate::aggregator::{Canonicalize, EntityKind, LegacyRecord, ReviewFlags};
use crate::error::{ConsolidationError, Result};
use crate::legacy::LegacyWineRow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const DECADE_NOTE: &str = "year established is decade";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalProducer {
    pub name: String,
    pub description: String,
    pub producer_code: String,
    pub year_established: Option<i32>,
}

// ============================================================================
// YEAR ESTABLISHED
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearEstablished {
    Blank,
    Year(i32),
    /// "1920s" → 1920
    Decade(i32),
}

impl YearEstablished {
    pub fn year(&self) -> Option<i32> {
        match self {
            YearEstablished::Blank => None,
            YearEstablished::Year(y) | YearEstablished::Decade(y) => Some(*y),
        }
    }
}

/// Normalize the legacy YearEstablished text. Anything other than blank,
/// four digits, or four digits followed by 's' is rejected.
pub fn parse_year_established(raw: &str) -> std::result::Result<YearEstablished, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(YearEstablished::Blank);
    }

    let four_digits = |s: &str| s.len() == 4 && s.chars().all(|c| c.is_ascii_digit());

    if four_digits(raw) {
        return raw
            .parse()
            .map(YearEstablished::Year)
            .map_err(|e| format!("year established '{}': {}", raw, e));
    }

    if let Some(decade) = raw.strip_suffix('s') {
        if four_digits(decade) {
            return decade
                .parse()
                .map(YearEstablished::Decade)
                .map_err(|e| format!("year established '{}': {}", raw, e));
        }
    }

    Err(format!("year established '{}' is not a year", raw))
}

fn year_for_row(key: &str, row: &LegacyWineRow) -> Result<YearEstablished> {
    parse_year_established(&row.year_established).map_err(|detail| {
        ConsolidationError::DataShape {
            key: key.to_string(),
            row_id: row.wine_id,
            detail,
        }
    })
}

// ============================================================================
// CONSOLIDATION RULES
// ============================================================================

impl LegacyRecord for LegacyWineRow {
    fn row_id(&self) -> i64 {
        self.wine_id
    }

    fn natural_key(&self) -> &str {
        &self.producer_name
    }

    fn ordering_key(&self) -> Option<NaiveDateTime> {
        self.last_updated
    }

    fn tracked_value(&self) -> &str {
        &self.producer_description
    }
}

impl Canonicalize for LegacyWineRow {
    type Entity = CanonicalProducer;

    const ENTITY: EntityKind = EntityKind::Producer;

    fn canonical(key: &str, _rows: &[Self], selected: &Self) -> Result<CanonicalProducer> {
        Ok(CanonicalProducer {
            name: selected.producer_name.clone(),
            description: selected.producer_description.clone(),
            producer_code: selected.producer_code.clone(),
            year_established: year_for_row(key, selected)?.year(),
        })
    }

    /// Producers carry notes only, no review flags
    fn review(_key: &str, _rows: &[Self], _drifted: bool) -> ReviewFlags {
        ReviewFlags::default()
    }

    fn row_notes(&self, key: &str) -> Result<Vec<String>> {
        match year_for_row(key, self)? {
            YearEstablished::Decade(_) => Ok(vec![DECADE_NOTE.to_string()]),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{consolidate_group, CanonicalizationPolicy};
    use chrono::NaiveDate;

    fn wine(id: i64, day: u32, description: &str, year: &str) -> LegacyWineRow {
        LegacyWineRow::new(
            id,
            "Maison Test",
            NaiveDate::from_ymd_opt(2023, 1, day).and_then(|d| d.and_hms_opt(9, 0, 0)),
            description,
            year,
        )
    }

    #[test]
    fn test_parse_year_established() {
        assert_eq!(parse_year_established("1995"), Ok(YearEstablished::Year(1995)));
        assert_eq!(parse_year_established(" "), Ok(YearEstablished::Blank));
        assert_eq!(parse_year_established("1920s"), Ok(YearEstablished::Decade(1920)));
        assert!(parse_year_established("circa 1900").is_err());
        assert!(parse_year_established("95").is_err());
        assert!(parse_year_established("1920S").is_err());
    }

    #[test]
    fn test_last_row_wins_with_decade_note() {
        let rows = vec![
            wine(1, 1, "Family estate", "1995"),
            wine(2, 2, "Family estate", ""),
            wine(3, 3, "Family estate", "1980s"),
        ];

        let group = consolidate_group("Maison Test", &rows, &CanonicalizationPolicy::PRODUCER).unwrap();

        assert_eq!(group.entity.year_established, Some(1980));
        assert_eq!(group.links[0].conversion_note, None);
        assert_eq!(group.links[1].conversion_note, None);
        assert_eq!(group.links[2].conversion_note.as_deref(), Some(DECADE_NOTE));
        assert!(!group.review.any());
        assert!(group.needs_review());
    }

    #[test]
    fn test_description_change_noted_per_row() {
        let mut rows = vec![
            wine(1, 1, "Old text", "1901"),
            wine(2, 2, "New text", "1901"),
            wine(3, 3, "Old text", "1901"),
            wine(4, 4, "Old text", "1901"),
        ];
        rows[3].producer_code = "MT2".to_string();

        let group = consolidate_group("Maison Test", &rows, &CanonicalizationPolicy::PRODUCER).unwrap();
        let notes: Vec<Option<&str>> = group
            .links
            .iter()
            .map(|l| l.conversion_note.as_deref())
            .collect();

        // Flip back is noted again: comparison is against the previous row
        assert_eq!(
            notes,
            vec![None, Some("Description changed"), Some("Description changed"), None]
        );
        assert_eq!(group.entity.description, "Old text");
        assert_eq!(group.entity.producer_code, "MT2");
    }

    #[test]
    fn test_drift_and_decade_notes_combine() {
        let rows = vec![wine(1, 1, "A", "1990"), wine(2, 2, "B", "1990s")];

        let group = consolidate_group("Maison Test", &rows, &CanonicalizationPolicy::PRODUCER).unwrap();

        assert_eq!(
            group.links[1].conversion_note.as_deref(),
            Some("Description changed; year established is decade")
        );
    }

    #[test]
    fn test_bad_year_aborts_group() {
        let rows = vec![wine(1, 1, "A", "circa 1900"), wine(2, 2, "A", "1900")];

        let err = consolidate_group("Maison Test", &rows, &CanonicalizationPolicy::PRODUCER).unwrap_err();

        match err {
            ConsolidationError::DataShape { row_id, key, .. } => {
                assert_eq!(row_id, 1);
                assert_eq!(key, "Maison Test");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
