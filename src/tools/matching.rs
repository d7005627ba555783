//! Label comparison between the list row and the detail view.

use std::collections::HashSet;

/// Lowercase and collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-insensitive, whitespace-normalized substring test.
pub fn contains_identity(haystack: &str, expected: &str) -> bool {
    let needle = normalize(expected);
    if needle.is_empty() {
        return true;
    }
    normalize(haystack).contains(&needle)
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Token-overlap match: accepted when the shared tokens cover at least
/// `threshold` of the smaller token set. Punctuation and case are ignored,
/// so "Smith, J. – Q3 Report" matches "q3 report smith j".
pub fn fuzzy_match(a: &str, b: &str, threshold: f64) -> bool {
    let ta = tokens(a);
    let tb = tokens(b);
    let shorter = ta.len().min(tb.len());
    if shorter == 0 {
        return false;
    }
    let overlap = ta.intersection(&tb).count();
    overlap as f64 >= threshold * shorter as f64
}
