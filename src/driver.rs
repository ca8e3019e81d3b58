// 🚚 Consolidation Driver - one full pass over a legacy table
//
// distinct keys → rows per key (pre-ordered) → aggregator → sink
//
// Single exclusive writer, one key at a time. The sink is committed once, at
// the end of the pass. Any error returns before the commit, leaving the sink's
// writes uncommitted; there is no resume.

use crate::aggregator::{consolidate_group, CanonicalizationPolicy, Canonicalize, Link};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where legacy rows come from
pub trait RowSource<R> {
    /// Distinct natural keys, ascending. Empty keys may be left out.
    fn distinct_natural_keys(&self, policy: &CanonicalizationPolicy) -> Result<Vec<String>>;

    /// Every row for `key`, ascending by the policy's ordering field
    fn rows_for_key(&self, key: &str, policy: &CanonicalizationPolicy) -> Result<Vec<R>>;
}

/// Where canonical entities and their links go
pub trait EntitySink<E> {
    /// Returns the generated canonical id
    fn insert_canonical(&mut self, entity: &E) -> Result<i64>;

    fn insert_link(&mut self, canonical_id: i64, link: &Link) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    /// Groups consolidated (one canonical entity each)
    pub processed_count: usize,
    /// Groups whose name needs manual review
    pub review_count: usize,
    pub link_count: usize,
}

/// Run one consolidation pass and commit the sink.
pub fn run_consolidation<R, S, K>(
    source: &S,
    sink: &mut K,
    policy: &CanonicalizationPolicy,
) -> Result<ConsolidationSummary>
where
    R: Canonicalize,
    S: RowSource<R>,
    K: EntitySink<R::Entity>,
{
    let keys = source.distinct_natural_keys(policy)?;
    info!(
        "Consolidating {} {} groups",
        keys.len(),
        policy.entity.as_str()
    );

    let mut summary = ConsolidationSummary::default();

    for key in &keys {
        let rows = source.rows_for_key(key, policy)?;
        let group = consolidate_group(key, &rows, policy)?;

        let canonical_id = sink.insert_canonical(&group.entity)?;
        for link in &group.links {
            sink.insert_link(canonical_id, link)?;
        }

        debug!(
            "{} '{}' → id {} ({} rows)",
            policy.entity.as_str(),
            key,
            canonical_id,
            group.links.len()
        );

        summary.processed_count += 1;
        summary.link_count += group.links.len();
        if group.review.name_needs_review {
            summary.review_count += 1;
        }
        if group.needs_review() {
            warn!(
                "{} '{}' (id {}) needs review: name={} email={} notes={}",
                policy.entity.as_str(),
                key,
                canonical_id,
                group.review.name_needs_review,
                group.review.email_needs_review,
                group
                    .links
                    .iter()
                    .filter(|l| l.conversion_note.is_some())
                    .count()
            );
        }
    }

    sink.commit()?;

    info!(
        "Consolidated {} {} groups ({} need review, {} links)",
        summary.processed_count,
        policy.entity.as_str(),
        summary.review_count,
        summary.link_count
    );

    Ok(summary)
}
