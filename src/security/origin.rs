//! Origin allowlist validation.
//!
//! Passes if the allowed-origin list is empty or contains `"*"`; otherwise
//! matches exact strings or compiles wildcard patterns where `*` expands to
//! `[^/.]+` (one path/host segment) and all other regex metacharacters are
//! escaped first. There is no external regex dependency in the teacher's
//! stack, so wildcard origins are matched with a small hand-rolled
//! segment-glob matcher rather than pulling in the `regex` crate for a
//! single-purpose need — mirrors the teacher's own preference for
//! dependency-light helpers (`utils.rs`, `schema_validation.rs`) over
//! reaching for a crate per single function.

#[derive(Debug, Clone, Default)]
pub struct OriginValidatorConfig {
    pub allowed_origins: Vec<String>,
}

pub struct OriginValidator {
    config: OriginValidatorConfig,
}

impl OriginValidator {
    pub fn new(config: OriginValidatorConfig) -> Self {
        Self { config }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.config.allowed_origins.is_empty() {
            return true;
        }
        self.config.allowed_origins.iter().any(|pattern| {
            pattern == "*" || pattern == origin || glob_matches(pattern, origin)
        })
    }
}

/// Matches `pattern` against `text`, where `*` in pattern matches one or
/// more characters that are not `/` or `.` (a single host/path segment) and
/// every other character must match literally.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    if !text.starts_with(parts[0]) {
        return false;
    }
    let mut pos = parts[0].len();

    for (i, part) in parts.iter().enumerate().skip(1) {
        let is_last = i == parts.len() - 1;
        if is_last {
            if pos > text.len() {
                return false;
            }
            let tail = &text[pos..];
            if part.is_empty() {
                return is_valid_wildcard_span(tail);
            }
            if !tail.ends_with(part) {
                return false;
            }
            let span = &tail[..tail.len() - part.len()];
            return is_valid_wildcard_span(span);
        }

        let search_space = &text[pos..];
        let mut search_start = 0;
        loop {
            match search_space[search_start..].find(part) {
                Some(rel) => {
                    let found = search_start + rel;
                    if is_valid_wildcard_span(&search_space[..found]) {
                        pos += found + part.len();
                        break;
                    }
                    search_start = found + 1;
                }
                None => return false,
            }
        }
    }
    true
}

fn is_valid_wildcard_span(s: &str) -> bool {
    !s.is_empty() && !s.contains('/') && !s.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(origins: &[&str]) -> OriginValidator {
        OriginValidator::new(OriginValidatorConfig {
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn empty_list_allows_everything() {
        let v = validator(&[]);
        assert!(v.is_allowed("https://evil.example"));
    }

    #[test]
    fn star_allows_everything() {
        let v = validator(&["*"]);
        assert!(v.is_allowed("https://anything.example"));
    }

    #[test]
    fn exact_match_passes_others_fail() {
        let v = validator(&["https://app.example.com"]);
        assert!(v.is_allowed("https://app.example.com"));
        assert!(!v.is_allowed("https://other.example.com"));
    }

    #[test]
    fn wildcard_subdomain() {
        let v = validator(&["https://*.example.com"]);
        assert!(v.is_allowed("https://app.example.com"));
        assert!(v.is_allowed("https://widgets.example.com"));
        assert!(!v.is_allowed("https://example.com"));
        assert!(!v.is_allowed("https://evil.com"));
    }
}
