//! Canonical matching keys.
//!
//! Both sides of the join go through [`normalize_key`]. Document keys are built
//! segment by segment with [`matching_key`]; investor keys are taken from the
//! table and passed through the same function, which is idempotent.

/// Separates group label, issuing entity and receiving entity.
pub const KEY_DELIMITER: char = '#';

/// Removed after case folding.
pub const STOP_CHARACTERS: [char; 5] = [' ', '.', ',', '\'', '\u{2019}'];

/// Stands in for an unresolved entity. It contains a space, which
/// normalization always strips, so it never equals a normalized investor key.
pub const NULL_SEGMENT: &str = "<no entity>";

pub fn normalize_key(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| !STOP_CHARACTERS.contains(c))
        .collect()
}

pub fn matching_key(group_label: &str, issuing: Option<&str>, receiving: Option<&str>) -> String {
    let segment = |value: Option<&str>| match value {
        Some(v) => normalize_key(v),
        None => NULL_SEGMENT.to_string(),
    };

    format!(
        "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
        normalize_key(group_label),
        segment(issuing),
        segment(receiving)
    )
}
