// 🧬 Legacy Group Aggregator - one canonical record per natural key
//
// Input: every legacy row sharing a natural key, in ascending order of the
// policy's ordering field. Output: the canonical payload plus one Link per
// row, carrying review flags and conversion notes.
//
// Both entity types run through the same scan. What differs lives in the
// CanonicalizationPolicy value:
//   - which row supplies the canonical values (first vs last)
//   - whether drift notes are shared by the group or attached per row
//   - the wording of the drift note
// and in the Canonicalize impl of the row type (what "canonical" means).

use crate::error::{ConsolidationError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Email customers from legacy order rows
    Customer,
    /// Producers from legacy wine master rows
    Producer,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Producer => "producer",
        }
    }
}

/// Which row of the ordered group supplies the canonical values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    FirstRow,
    LastRow,
}

/// Where drift notes end up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteScope {
    /// One note listing every drifting row, copied onto every Link
    Group,
    /// Each drifting row's own Link gets the note
    Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizationPolicy {
    pub entity: EntityKind,
    pub selection: Selection,
    pub note_scope: NoteScope,
    /// Group scope: prefix for the list of drifting row ids.
    /// Row scope: the whole note.
    pub drift_note: &'static str,
}

impl CanonicalizationPolicy {
    /// First row wins; email drift is a group-level note
    pub const CUSTOMER: CanonicalizationPolicy = CanonicalizationPolicy {
        entity: EntityKind::Customer,
        selection: Selection::FirstRow,
        note_scope: NoteScope::Group,
        drift_note: "Email was changed in order ids: ",
    };

    /// Last row wins; description drift is noted on the row where it happened
    pub const PRODUCER: CanonicalizationPolicy = CanonicalizationPolicy {
        entity: EntityKind::Producer,
        selection: Selection::LastRow,
        note_scope: NoteScope::Row,
        drift_note: "Description changed",
    };

    pub fn for_entity(entity: EntityKind) -> Self {
        match entity {
            EntityKind::Customer => Self::CUSTOMER,
            EntityKind::Producer => Self::PRODUCER,
        }
    }
}

// ============================================================================
// ROW CONTRACTS
// ============================================================================

/// A read-only legacy row that can be grouped by natural key
pub trait LegacyRecord {
    /// Primary key in the legacy table
    fn row_id(&self) -> i64;

    fn natural_key(&self) -> &str;

    /// Value of the ordering field (None sorts first)
    fn ordering_key(&self) -> Option<NaiveDateTime>;

    /// Value of the field watched for drift within the group
    fn tracked_value(&self) -> &str;
}

/// Group-level review flags, shared by every Link of the group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlags {
    pub name_needs_review: bool,
    pub email_needs_review: bool,
}

impl ReviewFlags {
    pub fn any(&self) -> bool {
        self.name_needs_review || self.email_needs_review
    }
}

/// How one legacy row type becomes its canonical entity
pub trait Canonicalize: LegacyRecord + Sized {
    type Entity: std::fmt::Debug + Serialize;

    const ENTITY: EntityKind;

    /// Build the canonical payload. `selected` is the row the policy picked.
    fn canonical(key: &str, rows: &[Self], selected: &Self) -> Result<Self::Entity>;

    /// Group-level review flags. `drifted` is true when the tracked field
    /// changed anywhere in the group.
    fn review(key: &str, rows: &[Self], drifted: bool) -> ReviewFlags;

    /// Notes about this row alone, independent of drift
    fn row_notes(&self, key: &str) -> Result<Vec<String>> {
        let _ = key;
        Ok(Vec::new())
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Per-legacy-row linkage record. The canonical id is assigned by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub legacy_row_id: i64,
    pub name_needs_review: bool,
    pub email_needs_review: bool,
    pub conversion_note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedGroup<E> {
    pub key: String,
    pub entity: E,
    /// Same order as the input rows
    pub links: Vec<Link>,
    pub review: ReviewFlags,
}

impl<E> ConsolidatedGroup<E> {
    /// Any review flag raised or any conversion note written
    pub fn needs_review(&self) -> bool {
        self.review.any() || self.links.iter().any(|l| l.conversion_note.is_some())
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Consolidate one natural-key group.
///
/// Preconditions (checked): `rows` is non-empty, every row carries `key`,
/// rows are in ascending order of their ordering field, and the policy was
/// written for this row type.
pub fn consolidate_group<R: Canonicalize>(
    key: &str,
    rows: &[R],
    policy: &CanonicalizationPolicy,
) -> Result<ConsolidatedGroup<R::Entity>> {
    if policy.entity != R::ENTITY {
        return Err(ConsolidationError::PolicyMismatch {
            policy: policy.entity.as_str(),
            rows: R::ENTITY.as_str(),
        });
    }
    check_group(key, rows)?;

    // Running-previous comparison: each row against the one right before it
    let drift_rows: Vec<usize> = rows
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0].tracked_value() != pair[1].tracked_value())
        .map(|(i, _)| i + 1)
        .collect();

    if !drift_rows.is_empty() {
        debug!(
            "{} '{}': tracked field changed at rows {:?}",
            policy.entity.as_str(),
            key,
            drift_rows.iter().map(|&i| rows[i].row_id()).collect::<Vec<_>>()
        );
    }

    // Non-empty was checked above
    let selected = match policy.selection {
        Selection::FirstRow => &rows[0],
        Selection::LastRow => &rows[rows.len() - 1],
    };
    let entity = R::canonical(key, rows, selected)?;
    let review = R::review(key, rows, !drift_rows.is_empty());

    let group_note = match policy.note_scope {
        NoteScope::Group if !drift_rows.is_empty() => Some(format!(
            "{}{}",
            policy.drift_note,
            drift_rows
                .iter()
                .map(|&i| rows[i].row_id().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        _ => None,
    };

    let mut links = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let mut notes = Vec::new();
        match policy.note_scope {
            NoteScope::Group => notes.extend(group_note.clone()),
            NoteScope::Row => {
                if drift_rows.contains(&i) {
                    notes.push(policy.drift_note.to_string());
                }
            }
        }
        notes.extend(row.row_notes(key)?);

        links.push(Link {
            legacy_row_id: row.row_id(),
            name_needs_review: review.name_needs_review,
            email_needs_review: review.email_needs_review,
            conversion_note: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
        });
    }

    Ok(ConsolidatedGroup {
        key: key.to_string(),
        entity,
        links,
        review,
    })
}

fn check_group<R: LegacyRecord>(key: &str, rows: &[R]) -> Result<()> {
    if rows.is_empty() {
        return Err(ConsolidationError::EmptyGroup {
            key: key.to_string(),
        });
    }

    if let Some(row) = rows.iter().find(|r| r.natural_key() != key) {
        return Err(ConsolidationError::KeyMismatch {
            key: key.to_string(),
            row_id: row.row_id(),
            found: row.natural_key().to_string(),
        });
    }

    // Option orders None first, matching ascending SQL order with NULLs first
    if let Some(pair) = rows
        .windows(2)
        .find(|pair| pair[0].ordering_key() > pair[1].ordering_key())
    {
        return Err(ConsolidationError::GroupOutOfOrder {
            key: key.to_string(),
            row_id: pair[1].row_id(),
        });
    }

    Ok(())
}
