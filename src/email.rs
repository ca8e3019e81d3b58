// 📧 Email Extractor
// Pulls candidate addresses out of a freeform contact field.
// Heuristic only: any whitespace-separated token containing '@'.

/// Every token containing '@', in field order, duplicates kept
pub fn get_email_addresses(field: &str) -> Vec<String> {
    field
        .split_whitespace()
        .filter(|word| word.contains('@'))
        .map(str::to_string)
        .collect()
}
