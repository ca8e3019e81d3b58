// 📋 Customer order report - Markdown projection of consolidated customers
//
// Input rows come from SqliteStore::customer_order_items, already sorted by
// customer id, order date, order id. The writer relies on that ordering to
// open one section per customer and print each order header once.

use crate::error::{ConsolidationError, Result};
use crate::legacy::OrderItem;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One ordered item joined to its canonical customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerOrderItem {
    pub customer_id: i64,
    pub given_name: String,
    pub surname: String,
    pub email: Option<String>,
    pub phone_home: String,
    pub order_date: Option<NaiveDate>,
    pub order_id: i64,
    pub item: OrderItem,
}

impl CustomerOrderItem {
    fn sort_key(&self) -> (i64, Option<NaiveDate>, i64) {
        (self.customer_id, self.order_date, self.order_id)
    }

    pub fn display_name(&self) -> String {
        match (self.given_name.is_empty(), self.surname.is_empty()) {
            (true, _) => self.surname.clone(),
            (false, true) => self.given_name.clone(),
            (false, false) => format!("{} {}", self.given_name, self.surname),
        }
    }
}

/// Write the report. Fails without writing further sections once an item
/// breaks the customer / order date / order id ordering.
pub fn write_customer_order_report<W: Write>(items: &[CustomerOrderItem], out: &mut W) -> Result<()> {
    writeln!(out, "# Customer Orders")?;

    if items.is_empty() {
        writeln!(out)?;
        writeln!(out, "_No orders found._")?;
        return Ok(());
    }

    let mut previous: Option<&CustomerOrderItem> = None;

    for item in items {
        if let Some(prev) = previous {
            if item.sort_key() < prev.sort_key() {
                return Err(ConsolidationError::ReportOutOfOrder {
                    order_id: item.order_id,
                });
            }
        }

        let new_customer = previous.map_or(true, |p| p.customer_id != item.customer_id);
        let new_order = new_customer || previous.map_or(true, |p| p.order_id != item.order_id);

        if new_customer {
            writeln!(out)?;
            writeln!(out, "## {}", cell(&item.display_name()))?;
            writeln!(out)?;
            writeln!(out, "- Email: {}", item.email.as_deref().unwrap_or(""))?;
            writeln!(out, "- Home phone: {}", item.phone_home)?;
            writeln!(out, "- Customer id: {}", item.customer_id)?;
            writeln!(out)?;
            writeln!(out, "| Order | Item | Vintage | Quantity |")?;
            writeln!(out, "|-------|------|---------|----------|")?;
        }

        let order = if new_order {
            let date = item
                .order_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "(no date)".to_string());
            format!("{} #{}", date, item.order_id)
        } else {
            String::new()
        };

        writeln!(
            out,
            "| {} | {} | {} | {} |",
            order,
            cell(&item.item.item),
            cell(&item.item.vintage),
            cell(&item.item.quantity)
        )?;

        previous = Some(item);
    }

    Ok(())
}

/// Markdown table cells cannot hold a raw '|'
fn cell(text: &str) -> String {
    text.trim().replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(customer_id: i64, order_id: i64, day: u32, name: &str) -> CustomerOrderItem {
        CustomerOrderItem {
            customer_id,
            given_name: "Jane".to_string(),
            surname: format!("Doe{}", customer_id),
            email: Some(format!("jane{}@x.com", customer_id)),
            phone_home: "555-0199".to_string(),
            order_date: NaiveDate::from_ymd_opt(2024, 1, day),
            order_id,
            item: OrderItem {
                item: name.to_string(),
                vintage: "2015".to_string(),
                quantity: "1".to_string(),
            },
        }
    }

    fn render(items: &[CustomerOrderItem]) -> Result<String> {
        let mut out = Vec::new();
        write_customer_order_report(items, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_order_header_printed_once() {
        let items = vec![
            item(1, 10, 1, "Barolo"),
            item(1, 10, 1, "Chianti"),
            item(1, 11, 5, "Rioja"),
        ];

        let text = render(&items).unwrap();

        assert_eq!(text.matches("## Jane Doe1").count(), 1);
        assert!(text.contains("- Email: jane1@x.com"));
        assert!(text.contains("| 2024-01-01 #10 | Barolo | 2015 | 1 |"));
        assert!(text.contains("|  | Chianti | 2015 | 1 |"));
        assert!(text.contains("| 2024-01-05 #11 | Rioja | 2015 | 1 |"));
    }

    #[test]
    fn test_section_per_customer() {
        let items = vec![item(1, 10, 1, "Barolo"), item(2, 10, 1, "Cava")];

        let text = render(&items).unwrap();

        assert!(text.contains("## Jane Doe1"));
        assert!(text.contains("## Jane Doe2"));
        // Same order id under a new customer still gets its header
        assert_eq!(text.matches("#10 |").count(), 2);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let items = vec![item(2, 10, 1, "Barolo"), item(1, 11, 1, "Cava")];

        let err = render(&items).unwrap_err();
        assert!(matches!(err, ConsolidationError::ReportOutOfOrder { order_id: 11 }));
    }

    #[test]
    fn test_empty_and_escaping() {
        assert!(render(&[]).unwrap().contains("_No orders found._"));

        let mut odd = item(1, 10, 1, "Red | White");
        odd.order_date = None;
        let text = render(&[odd]).unwrap();
        assert!(text.contains("| (no date) #10 | Red \\| White |"));
    }
}
