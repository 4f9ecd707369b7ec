//! Segment-glob pattern matching shared by topic patterns (`order.*`) and
//! fact-key patterns (`order:*:status`), plus the process-wide regex cache
//! used by the `matches` condition operator.
//!
//! Patterns are compiled once and cached, per the fact-store/event-bus
//! invariant that pattern compilation is not repeated per stimulus.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Compiles (or fetches from cache) a regex for the `matches` condition
/// operator.
///
/// # Errors
///
/// Returns the underlying `regex::Error` if the pattern does not compile.
pub fn cached_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern)?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard.entry(pattern.to_string()).or_insert_with(|| compiled.clone());
    }

    Ok(compiled)
}

/// Splits a pattern/subject on `sep` and matches segment-by-segment.
///
/// `*` matches exactly one segment. A trailing `*` segment additionally
/// matches any number of remaining segments (so `a.*` at the topic level
/// means "one more segment", while a bare `*` matches everything).
///
/// This single function backs both topic patterns (`sep = '.'`) and fact-key
/// patterns (`sep = ':'`) — both use the same per-segment glob semantics.
#[must_use]
pub fn segment_glob_match(pattern: &str, subject: &str, sep: char) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segments: Vec<&str> = pattern.split(sep).collect();
    let subject_segments: Vec<&str> = subject.split(sep).collect();

    match_segments(&pattern_segments, &subject_segments)
}

fn match_segments(pattern: &[&str], subject: &[&str]) -> bool {
    match (pattern.first(), subject.first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        // A terminal `*` matches the remainder: one or more segments, but
        // not zero (`a.*` matches `a.created`, not bare `a`).
        (Some(&"*"), Some(_)) if pattern.len() == 1 => true,
        (Some(&"*"), Some(_)) => match_segments(&pattern[1..], &subject[1..]),
        (Some(p), Some(s)) => *p == *s && match_segments(&pattern[1..], &subject[1..]),
    }
}
