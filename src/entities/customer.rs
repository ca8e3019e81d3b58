// 👤 Email Customer - canonical customer from legacy order rows
//
// Policy: the FIRST order supplies name parts and email; the order dates of the
// first and last orders bracket the customer's history.
//
// Email1 drift between consecutive orders, or a last Email1 field holding more
// than one address, flags the whole group for email review.

use crate::aggregator::{Canonicalize, EntityKind, LegacyRecord, ReviewFlags};
use crate::email::get_email_addresses;
use crate::error::Result;
use crate::legacy::LegacyOrderRow;
use crate::name_parser::parse_fullname;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCustomer {
    pub title: Option<String>,
    pub given_name: String,
    pub surname: String,
    pub suffix: Option<String>,
    /// First address found in the first order's Email1 field
    pub email: Option<String>,
    pub first_order_date: Option<NaiveDate>,
    pub last_order_date: Option<NaiveDate>,
}

impl LegacyRecord for LegacyOrderRow {
    fn row_id(&self) -> i64 {
        self.email_order_id
    }

    fn natural_key(&self) -> &str {
        &self.full_name
    }

    fn ordering_key(&self) -> Option<NaiveDateTime> {
        self.first_date.and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    fn tracked_value(&self) -> &str {
        &self.email1
    }
}

impl Canonicalize for LegacyOrderRow {
    type Entity = CanonicalCustomer;

    const ENTITY: EntityKind = EntityKind::Customer;

    fn canonical(key: &str, rows: &[Self], selected: &Self) -> Result<CanonicalCustomer> {
        let name = parse_fullname(key);

        Ok(CanonicalCustomer {
            title: name.title,
            given_name: name.given_name,
            surname: name.surname,
            suffix: name.suffix,
            email: get_email_addresses(&selected.email1).into_iter().next(),
            // Missing dates stay NULL, never a 1970-01-01 placeholder
            first_order_date: rows.first().and_then(|r| r.first_date),
            last_order_date: rows.last().and_then(|r| r.first_date),
        })
    }

    fn review(key: &str, rows: &[Self], drifted: bool) -> ReviewFlags {
        // A last field with several addresses is ambiguous even without drift
        let ambiguous_last = rows
            .last()
            .map(|r| {
                get_email_addresses(&r.email1)
                    .into_iter()
                    .collect::<HashSet<_>>()
                    .len()
                    > 1
            })
            .unwrap_or(false);

        ReviewFlags {
            name_needs_review: parse_fullname(key).manual_review_needed,
            email_needs_review: drifted || ambiguous_last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{consolidate_group, CanonicalizationPolicy};

    fn order(id: i64, name: &str, date: &str, email: &str) -> LegacyOrderRow {
        LegacyOrderRow::new(
            id,
            name,
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            email,
        )
    }

    fn consolidate(key: &str, rows: &[LegacyOrderRow]) -> crate::aggregator::ConsolidatedGroup<CanonicalCustomer> {
        consolidate_group(key, rows, &CanonicalizationPolicy::CUSTOMER).unwrap()
    }

    #[test]
    fn test_smith_two_orders_email_changed() {
        let rows = vec![
            order(1, "Smith", "2024-01-01", "a@x.com"),
            order(2, "Smith", "2024-03-01", "b@x.com"),
        ];

        let group = consolidate("Smith", &rows);

        assert_eq!(group.entity.first_order_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(group.entity.last_order_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(group.entity.email.as_deref(), Some("a@x.com"));
        assert_eq!(group.entity.surname, "Smith");
        assert!(group.review.email_needs_review);
        // Single word name
        assert!(group.review.name_needs_review);

        for link in &group.links {
            assert_eq!(
                link.conversion_note.as_deref(),
                Some("Email was changed in order ids: 2")
            );
            assert!(link.email_needs_review);
            assert!(link.name_needs_review);
        }
    }

    #[test]
    fn test_third_order_email_change_cited() {
        let rows = vec![
            order(100, "Jane Doe", "2023-01-01", "e1@x.com"),
            order(101, "Jane Doe", "2023-02-01", "e1@x.com"),
            order(102, "Jane Doe", "2023-03-01", "e2@x.com"),
        ];

        let group = consolidate("Jane Doe", &rows);

        assert!(group.review.email_needs_review);
        assert!(!group.review.name_needs_review);
        assert_eq!(
            group.links[0].conversion_note.as_deref(),
            Some("Email was changed in order ids: 102")
        );
        assert_eq!(group.entity.given_name, "Jane");
        assert_eq!(group.entity.email.as_deref(), Some("e1@x.com"));
    }

    #[test]
    fn test_single_order_no_email_review() {
        let rows = vec![order(5, "Ann Lee", "2022-06-01", "ann@x.com")];

        let group = consolidate("Ann Lee", &rows);

        assert!(!group.review.email_needs_review);
        assert!(!group.needs_review());
        assert_eq!(group.links.len(), 1);
        assert_eq!(group.links[0].conversion_note, None);
        assert_eq!(group.entity.first_order_date, group.entity.last_order_date);
    }

    #[test]
    fn test_single_order_with_two_addresses() {
        let rows = vec![order(5, "Ann Lee", "2022-06-01", "ann@x.com ann@work.com")];

        let group = consolidate("Ann Lee", &rows);

        assert!(group.review.email_needs_review);
        assert_eq!(group.entity.email.as_deref(), Some("ann@x.com"));
        assert_eq!(group.links[0].conversion_note, None);
    }

    #[test]
    fn test_repeated_address_is_not_ambiguous() {
        let rows = vec![order(5, "Ann Lee", "2022-06-01", "ann@x.com ann@x.com")];

        let group = consolidate("Ann Lee", &rows);

        assert!(!group.review.email_needs_review);
    }

    #[test]
    fn test_no_email_in_field() {
        let rows = vec![
            order(1, "Dr. Paul Roe", "2021-01-01", "phone only"),
            order(2, "Dr. Paul Roe", "2021-05-01", "phone only"),
        ];

        let group = consolidate("Dr. Paul Roe", &rows);

        assert_eq!(group.entity.email, None);
        assert_eq!(group.entity.title.as_deref(), Some("Dr."));
        assert!(!group.review.email_needs_review);
        assert!(!group.review.name_needs_review);
    }

    #[test]
    fn test_missing_order_dates_sort_first() {
        let rows = vec![
            LegacyOrderRow::new(1, "Kim Park", None, "k@x.com"),
            order(2, "Kim Park", "2020-01-01", "k@x.com"),
        ];

        let group = consolidate("Kim Park", &rows);

        assert_eq!(group.entity.first_order_date, None);
        assert_ne!(group.entity.first_order_date, NaiveDate::from_ymd_opt(1970, 1, 1));
        assert_eq!(group.entity.last_order_date, NaiveDate::from_ymd_opt(2020, 1, 1));
    }
}
