//! # Topics
//!
//! Topics are plain strings. The empty string is the default topic, and an
//! absent topic means the same thing. Topic strings are split on `.` into
//! path segments when they are matched against the routing trie; the literal
//! segment `*` matches exactly one segment at lookup time.

/// The canonical default topic.
pub const DEFAULT_TOPIC: &str = "";

/// Separator between topic path segments.
pub const TOPIC_SEPARATOR: char = '.';

/// Single-segment wildcard. Only valid in lookups, never in registrations.
pub const WILDCARD: &str = "*";

/// Canonicalize a single topic. `None` and `""` are the same topic.
#[must_use]
pub fn canonical_topic(topic: Option<&str>) -> String {
    topic.unwrap_or(DEFAULT_TOPIC).to_string()
}

/// Canonicalize a requested set of topics.
///
/// Duplicates are removed (first occurrence wins), and an empty request
/// becomes `[""]`.
pub fn canonical_topics<I, S>(topics: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut canonical: Vec<String> = Vec::new();
    for topic in topics {
        let topic = topic.as_ref();
        if !canonical.iter().any(|t| t == topic) {
            canonical.push(topic.to_string());
        }
    }
    if canonical.is_empty() {
        canonical.push(DEFAULT_TOPIC.to_string());
    }
    canonical
}

/// Split a topic into trie path segments.
#[must_use]
pub fn topic_segments(topic: &str) -> Vec<&str> {
    topic.split(TOPIC_SEPARATOR).collect()
}

/// Returns true if any segment of the topic is the wildcard.
#[must_use]
pub fn has_wildcard(topic: &str) -> bool {
    topic_segments(topic).iter().any(|s| *s == WILDCARD)
}
