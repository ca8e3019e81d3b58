// Canonical entities - one per natural key
//
// Each module holds the canonical record type and the rules that derive it
// from its legacy row type:
// - customer: first order wins, group-level email review
// - producer: most recently updated wine row wins, per-row notes

pub mod customer;
pub mod producer;

pub use customer::CanonicalCustomer;
pub use producer::{parse_year_established, CanonicalProducer, YearEstablished};
