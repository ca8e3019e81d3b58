// 🪪 Name Heuristic Parser
// Splits a freeform full name into title / given name / surname / suffix
//
// "Dr. Jane Q Public Jr." → title "Dr.", given "Jane Q", surname "Public", suffix "Jr."
//
// Only a name that leaves exactly two words after stripping the title and
// suffix is trusted. Everything else is best effort + manual review flag.

use serde::{Deserialize, Serialize};

/// Known titles (case-sensitive, matched on the first word only)
const KNOWN_TITLES: [&str; 8] = ["Mr", "Mr.", "Ms", "Ms.", "Mrs", "Mrs.", "Dr", "Dr."];

/// Known suffixes (case-sensitive, matched on the last word only)
const KNOWN_SUFFIXES: [&str; 6] = ["Jr", "Jr.", "II", "III", "111", "MD"];

// ============================================================================
// PARSED NAME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedName {
    pub title: Option<String>,
    pub given_name: String,
    pub surname: String,
    pub suffix: Option<String>,

    /// True unless exactly two words remained after title/suffix removal
    pub manual_review_needed: bool,
}

impl Default for ParsedName {
    fn default() -> Self {
        ParsedName {
            title: None,
            given_name: String::new(),
            surname: String::new(),
            suffix: None,
            manual_review_needed: true,
        }
    }
}

/// Parse a freeform full name. Never fails.
pub fn parse_fullname(fullname: &str) -> ParsedName {
    let mut parsed = ParsedName::default();
    let mut words: Vec<&str> = fullname.split_whitespace().collect();

    if let Some(first) = words.first() {
        if is_name_title(first) {
            parsed.title = Some(first.to_string());
            words.remove(0);
        }
    }

    if let Some(last) = words.last() {
        if is_name_suffix(last) {
            parsed.suffix = Some(last.to_string());
            words.pop();
        }
    }

    if let Some((surname, given)) = words.split_last() {
        parsed.given_name = given.join(" ");
        parsed.surname = surname.to_string();
    }
    parsed.manual_review_needed = words.len() != 2;

    parsed
}

pub fn is_name_title(word: &str) -> bool {
    KNOWN_TITLES.contains(&word)
}

pub fn is_name_suffix(word: &str) -> bool {
    KNOWN_SUFFIXES.contains(&word)
}
