//! Event name patterns
//!
//! Event names are dot-delimited (`user.login`, `logs.system.error`).
//! A pattern segment `*` matches exactly one segment, `**` matches one or
//! more segments. Any other segment is matched literally.

/// Single compiled pattern segment
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Many,
}

/// A compiled event pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    wildcard: bool,
}

impl Pattern {
    /// Compile a pattern
    #[must_use]
    pub fn compile(raw: &str) -> Self {
        let segments: Vec<Segment> = raw
            .split('.')
            .map(|segment| match segment {
                "*" => Segment::One,
                "**" => Segment::Many,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        let wildcard = segments
            .iter()
            .any(|s| matches!(s, Segment::One | Segment::Many));

        Self {
            raw: raw.to_string(),
            segments,
            wildcard,
        }
    }

    /// The pattern as it was registered
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains any wildcard segment
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Check if a concrete event name matches this pattern
    #[must_use]
    pub fn matches(&self, event: &str) -> bool {
        if !self.wildcard {
            return self.raw == event;
        }

        let parts: Vec<&str> = event.split('.').collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::One, rest)) => !parts.is_empty() && match_segments(rest, &parts[1..]),
        Some((Segment::Many, rest)) => {
            (1..=parts.len()).any(|taken| match_segments(rest, &parts[taken..]))
        }
        Some((Segment::Literal(literal), rest)) => {
            parts.first().is_some_and(|part| *part == literal.as_str()) && match_segments(rest, &parts[1..])
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = Pattern::compile("connection");
        assert!(!pattern.is_wildcard());
        assert!(pattern.matches("connection"));
        assert!(!pattern.matches("connection.open"));
        assert!(!pattern.matches("disconnect"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let pattern = Pattern::compile("user.*");
        assert!(pattern.is_wildcard());
        assert!(pattern.matches("user.login"));
        assert!(pattern.matches("user.logout"));
        assert!(!pattern.matches("user.settings.update"));
        assert!(!pattern.matches("user"));
        assert!(!pattern.matches("admin.login"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let pattern = Pattern::compile("logs.**");
        assert!(pattern.matches("logs.system"));
        assert!(pattern.matches("logs.system.error.critical"));
        // `**` needs at least one segment
        assert!(!pattern.matches("logs"));
        assert!(!pattern.matches("metrics.system"));
    }

    #[test]
    fn test_wildcard_in_the_middle() {
        let pattern = Pattern::compile("room.*.message");
        assert!(pattern.matches("room.general.message"));
        assert!(!pattern.matches("room.general.join"));
        assert!(!pattern.matches("room.a.b.message"));

        let deep = Pattern::compile("room.**.message");
        assert!(deep.matches("room.a.b.message"));
        assert!(deep.matches("room.a.message"));
        assert!(!deep.matches("room.message"));
    }

    #[test]
    fn test_bare_wildcards() {
        assert!(Pattern::compile("*").matches("ping"));
        assert!(!Pattern::compile("*").matches("room.join"));
        assert!(Pattern::compile("**").matches("room.join"));
        assert!(Pattern::compile("**").matches("ping"));
    }

    #[test]
    fn test_partial_star_is_literal() {
        let pattern = Pattern::compile("user*.login");
        assert!(!pattern.is_wildcard());
        assert!(pattern.matches("user*.login"));
        assert!(!pattern.matches("users.login"));
    }
}
