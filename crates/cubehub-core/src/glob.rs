//! `*`/`?` wildcard matching with a process-global compiled-pattern cache.
//!
//! Compiled patterns are immutable once built, so the cache is shared freely
//! across threads; a lost insertion race simply adopts the winner's regex.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

static PATTERNS: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn cache() -> &'static RwLock<HashMap<String, Regex>> {
    PATTERNS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Matches `value` against a glob `pattern` where `*` matches any run of
/// characters and `?` matches exactly one. Matching is case-insensitive and
/// anchored at both ends.
#[must_use]
pub fn matches(pattern: &str, value: &str) -> bool {
    if let Some(re) = cache()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(pattern)
    {
        return re.is_match(value);
    }

    let re = compile(pattern);
    let hit = re.is_match(value);
    cache()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(pattern.to_string())
        .or_insert(re);
    hit
}

fn compile(pattern: &str) -> Regex {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    // The escape above guarantees a valid pattern; fall back to match-nothing
    // rather than panicking if that ever stops holding.
    Regex::new(&source).unwrap_or_else(|_| Regex::new("$^").unwrap())
}
