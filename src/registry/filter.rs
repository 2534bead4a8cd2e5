//! Topic filter matching
//!
//! Filters use the broker's wildcard rules:
//! - `+` matches exactly one topic level
//! - `#` matches the remaining levels (including none) and must be last
//! - a topic whose first level starts with `$` is never matched by a leading
//!   wildcard, so `#` does not swallow `$aws/...` system topics

use crate::utils::error::RegistryError;

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

/// Check wildcard placement. Empty filters are rejected.
pub fn validate(filter: &str) -> Result<(), RegistryError> {
    if filter.is_empty() {
        return Err(RegistryError::InvalidFilter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    for (idx, level) in levels.iter().enumerate() {
        let is_last = idx + 1 == levels.len();
        if level.contains('#') && (*level != MULTI_LEVEL || !is_last) {
            return Err(RegistryError::InvalidFilter(filter.to_string()));
        }
        if level.contains('+') && *level != SINGLE_LEVEL {
            return Err(RegistryError::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}

/// Whether `topic` is matched by `filter`.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with(SINGLE_LEVEL) || filter.starts_with(MULTI_LEVEL)) {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
