//! Topic validation and wildcard pattern matching.
//!
//! A topic is a dot-separated sequence of non-empty segments built from
//! alphanumerics, `-`, and `_`. A pattern is the same, except it may use
//! `+` (exactly one segment) or `#` (zero or more trailing segments, only
//! legal as the last segment). Patterns compile once into a tagged segment
//! list; topics never carry wildcards.

use crate::error::{PubsubError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind<'a> {
    Literal(&'a str),
    Single,
    Multi,
}

/// A compiled wildcard pattern, ready to match many topics cheaply.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    has_wildcards: bool,
    segments: Vec<CompiledSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompiledSegment {
    Literal(String),
    Single,
    Multi,
}

fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn classify_segment(seg: &str) -> Option<SegmentKind<'_>> {
    if seg.is_empty() {
        return None;
    }
    if seg == "+" {
        return Some(SegmentKind::Single);
    }
    if seg == "#" {
        return Some(SegmentKind::Multi);
    }
    if seg.chars().all(is_valid_segment_char) {
        Some(SegmentKind::Literal(seg))
    } else {
        None
    }
}

impl Pattern {
    /// Compile a pattern string. Fails on empty segments, invalid
    /// characters, or a `#` that is not the final segment.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(PubsubError::invalid_input("pattern must not be empty"));
        }

        let raw_segments: Vec<&str> = pattern.split('.').collect();
        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut has_wildcards = false;

        for (idx, seg) in raw_segments.iter().enumerate() {
            let kind = classify_segment(seg).ok_or_else(|| {
                PubsubError::invalid_input(format!(
                    "invalid segment '{seg}' in pattern '{pattern}'"
                ))
            })?;

            match kind {
                SegmentKind::Literal(lit) => segments.push(CompiledSegment::Literal(lit.to_string())),
                SegmentKind::Single => {
                    has_wildcards = true;
                    segments.push(CompiledSegment::Single);
                }
                SegmentKind::Multi => {
                    if idx != raw_segments.len() - 1 {
                        return Err(PubsubError::invalid_input(format!(
                            "'#' must be the last segment of pattern '{pattern}'"
                        )));
                    }
                    has_wildcards = true;
                    segments.push(CompiledSegment::Multi);
                }
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            has_wildcards,
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcards(&self) -> bool {
        self.has_wildcards
    }

    /// Match a concrete topic against this compiled pattern.
    pub fn matches(&self, topic: &str) -> bool {
        if !self.has_wildcards {
            return self.raw == topic;
        }

        let topic_segments: Vec<&str> = topic.split('.').collect();
        let mut ti = 0usize;

        for (si, seg) in self.segments.iter().enumerate() {
            match seg {
                CompiledSegment::Literal(lit) => {
                    if topic_segments.get(ti) != Some(&lit.as_str()) {
                        return false;
                    }
                    ti += 1;
                }
                CompiledSegment::Single => {
                    if topic_segments.get(ti).is_none() {
                        return false;
                    }
                    ti += 1;
                }
                CompiledSegment::Multi => {
                    // '#' is always last; matches the remainder unconditionally,
                    // including zero remaining segments.
                    debug_assert_eq!(si, self.segments.len() - 1);
                    return true;
                }
            }
        }

        ti == topic_segments.len()
    }
}

/// Validate a concrete (publish-time) topic: non-empty segments, valid
/// characters, no wildcards permitted.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(PubsubError::invalid_input("topic must not be empty"));
    }
    for seg in topic.split('.') {
        if seg.is_empty() || seg == "+" || seg == "#" || !seg.chars().all(is_valid_segment_char) {
            return Err(PubsubError::invalid_input(format!(
                "invalid topic segment '{seg}' in topic '{topic}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_requires_exact_equality() {
        let p = Pattern::compile("user.login").unwrap();
        assert!(p.matches("user.login"));
        assert!(!p.matches("user.logout"));
        assert!(!p.matches("user.login.extra"));
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        let p = Pattern::compile("cart.+").unwrap();
        assert!(p.matches("cart.add"));
        assert!(!p.matches("cart.item.remove"));
        assert!(!p.matches("cart"));
    }

    #[test]
    fn multi_wildcard_matches_trailing_remainder() {
        let p = Pattern::compile("cart.#").unwrap();
        assert!(p.matches("cart.add"));
        assert!(p.matches("cart.item.remove"));
        assert!(p.matches("cart"));
        assert!(!p.matches("user.login"));
    }

    #[test]
    fn bare_hash_matches_everything() {
        let p = Pattern::compile("#").unwrap();
        assert!(p.matches("anything.at.all"));
        assert!(p.matches("x"));
    }

    #[test]
    fn hash_not_in_final_position_is_rejected() {
        assert!(Pattern::compile("cart.#.extra").is_err());
    }

    #[test]
    fn invalid_characters_are_rejected() {
        assert!(Pattern::compile("cart..add").is_err());
        assert!(Pattern::compile("cart. add").is_err());
        assert!(Pattern::compile("cart/add").is_err());
    }

    #[test]
    fn publish_topics_reject_wildcards() {
        assert!(validate_topic("cart.add").is_ok());
        assert!(validate_topic("cart.+").is_err());
        assert!(validate_topic("cart.#").is_err());
        assert!(validate_topic("").is_err());
    }

    // Scenario S1 from the spec: subscribe `cart.#`, publish three topics,
    // handler receives exactly the first two.
    #[test]
    fn s1_wildcard_routing() {
        let p = Pattern::compile("cart.#").unwrap();
        let topics = ["cart.add", "cart.item.remove", "user.login"];
        let matched: Vec<&&str> = topics.iter().filter(|t| p.matches(t)).collect();
        assert_eq!(matched, vec![&"cart.add", &"cart.item.remove"]);
    }

    proptest::proptest! {
        #[test]
        fn literal_pattern_iff_equal(topic in "[a-zA-Z0-9_-]{1,8}(\\.[a-zA-Z0-9_-]{1,8}){0,3}") {
            let p = Pattern::compile(&topic).unwrap();
            proptest::prop_assert!(p.matches(&topic));
            let mutated = format!("{topic}.z");
            proptest::prop_assert_eq!(p.matches(&mutated), p.raw() == mutated);
        }

        #[test]
        fn hash_suffix_matches_iff_prefix_equal(
            prefix in "[a-zA-Z0-9_-]{1,6}(\\.[a-zA-Z0-9_-]{1,6}){0,2}",
            suffix in "(\\.[a-zA-Z0-9_-]{1,6}){0,3}",
        ) {
            let pattern_str = format!("{prefix}.#");
            let p = Pattern::compile(&pattern_str).unwrap();
            let topic = format!("{prefix}{suffix}");
            proptest::prop_assert!(p.matches(&topic));

            let other_topic = format!("other-prefix-that-wont-match{suffix}");
            proptest::prop_assert!(!p.matches(&other_topic));
        }
    }
}
