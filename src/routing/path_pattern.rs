//! # Path Matcher
//!
//! Hierarchical glob patterns for request paths, and the classifier that sorts a
//! path into the authentication-exempt and privileged tiers.
//!
//! ## Pattern syntax
//!
//! Patterns are matched segment by segment (`/` separated):
//!
//! - `literal` matches that exact segment
//! - `{name}` matches any single segment
//! - `*` / `?` inside a segment match any run of characters / one character
//! - a trailing `**` matches any suffix, including none: `/admin/**` matches
//!   `/admin`, `/admin/x` and `/admin/x/y`
//!
//! Empty segments are ignored on both sides, so `/admin//x/` is matched like
//! `/admin/x`. Compiled patterns are immutable and shared freely between
//! requests.
//!
//! Request paths are put through [`normalize_path`] before they are
//! classified, and the normalized form is what gets forwarded.

use regex::Regex;
use std::fmt;
use tracing::debug;

use crate::core::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Capture,
    Glob(Regex),
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Capture => true,
            Self::Glob(regex) => regex.is_match(segment),
        }
    }
}

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    trailing_any: bool,
}

impl PathPattern {
    /// Compile a pattern
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('/') {
            return Err(GatewayError::config(format!(
                "path pattern '{}' must start with '/'",
                raw
            )));
        }

        let parts: Vec<&str> = split_segments(trimmed).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut trailing_any = false;

        for (index, part) in parts.iter().enumerate() {
            if *part == "**" {
                if index != parts.len() - 1 {
                    return Err(GatewayError::config(format!(
                        "path pattern '{}': '**' is only allowed as the last segment",
                        raw
                    )));
                }
                trailing_any = true;
            } else if part.contains("**") {
                return Err(GatewayError::config(format!(
                    "path pattern '{}': '**' must be a whole segment",
                    raw
                )));
            } else {
                segments.push(compile_segment(raw, part)?);
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
            trailing_any,
        })
    }

    /// The pattern as configured
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` matches this pattern
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(path);

        for segment in &self.segments {
            match parts.next() {
                Some(part) if segment.matches(part) => {}
                _ => return false,
            }
        }

        self.trailing_any || parts.next().is_none()
    }

    /// The longest purely literal path this pattern is anchored on.
    ///
    /// Used at startup to detect exempt and privileged sets that cover the same
    /// paths.
    pub fn literal_prefix(&self) -> String {
        let literal: Vec<&str> = self
            .segments
            .iter()
            .map_while(|segment| match segment {
                Segment::Literal(literal) => Some(literal.as_str()),
                _ => None,
            })
            .collect();
        format!("/{}", literal.join("/"))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn compile_segment(raw: &str, part: &str) -> GatewayResult<Segment> {
    if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
        return Ok(Segment::Capture);
    }

    if !part.contains('*') && !part.contains('?') {
        return Ok(Segment::Literal(part.to_string()));
    }

    let mut expression = String::from("^");
    let mut literal = String::new();
    for ch in part.chars() {
        match ch {
            '*' | '?' => {
                expression.push_str(&regex::escape(&literal));
                literal.clear();
                expression.push_str(if ch == '*' { "[^/]*" } else { "[^/]" });
            }
            _ => literal.push(ch),
        }
    }
    expression.push_str(&regex::escape(&literal));
    expression.push('$');

    Regex::new(&expression)
        .map(Segment::Glob)
        .map_err(|e| GatewayError::config(format!("path pattern '{}': {}", raw, e)))
}

/// Canonical form of a request path.
///
/// Percent-encoded unreserved characters are decoded, empty and `.` segments
/// are dropped and `..` removes the previous segment. A trailing slash is
/// kept. Fails on a `..` above the root and on encoded `/` or `\`.
pub fn normalize_path(raw: &str) -> GatewayResult<String> {
    let decoded = decode_unreserved(raw)?;

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(GatewayError::invalid_path(raw));
                }
            }
            other => segments.push(other),
        }
    }

    let mut normalized = format!("/{}", segments.join("/"));
    if decoded.ends_with('/') && !segments.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

fn decode_unreserved(raw: &str) -> GatewayResult<String> {
    let bytes = raw.as_bytes();
    let mut decoded = String::with_capacity(raw.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'%' {
            let byte = raw
                .get(index + 1..index + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            match byte {
                Some(b'/') | Some(b'\\') => return Err(GatewayError::invalid_path(raw)),
                Some(byte) if is_unreserved(byte) => {
                    decoded.push(char::from(byte));
                    index += 3;
                    continue;
                }
                _ => {}
            }
        }

        match raw[index..].chars().next() {
            Some(ch) => {
                decoded.push(ch);
                index += ch.len_utf8();
            }
            None => break,
        }
    }

    Ok(decoded)
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Classification of one request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathClassification {
    pub exempt: bool,
    pub privileged: bool,
}

/// Immutable exempt and privileged pattern sets
#[derive(Debug, Clone)]
pub struct PathMatcher {
    exempt: Vec<PathPattern>,
    privileged: Vec<PathPattern>,
}

impl PathMatcher {
    /// Compile both pattern sets.
    ///
    /// Fails when any pattern is malformed, or when an exempt pattern and a
    /// privileged pattern cover the same path.
    pub fn new<S: AsRef<str>>(exempt: &[S], privileged: &[S]) -> GatewayResult<Self> {
        let exempt = compile_all(exempt)?;
        let privileged = compile_all(privileged)?;

        let mut conflicts = Vec::new();
        for e in &exempt {
            for p in &privileged {
                if p.matches(&e.literal_prefix()) || e.matches(&p.literal_prefix()) {
                    conflicts.push(format!("'{}' and '{}'", e, p));
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(GatewayError::config(format!(
                "exempt and privileged path patterns overlap: {}",
                conflicts.join(", ")
            )));
        }

        debug!(
            exempt = exempt.len(),
            privileged = privileged.len(),
            "Compiled path patterns"
        );

        Ok(Self { exempt, privileged })
    }

    /// Classify a request path against both sets
    pub fn classify(&self, path: &str) -> PathClassification {
        PathClassification {
            exempt: self.exempt.iter().any(|pattern| pattern.matches(path)),
            privileged: self.privileged.iter().any(|pattern| pattern.matches(path)),
        }
    }

    pub fn exempt_patterns(&self) -> &[PathPattern] {
        &self.exempt
    }

    pub fn privileged_patterns(&self) -> &[PathPattern] {
        &self.privileged
    }
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> GatewayResult<Vec<PathPattern>> {
    patterns
        .iter()
        .map(|pattern| PathPattern::parse(pattern.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> PathPattern {
        PathPattern::parse(raw).unwrap()
    }

    #[test]
    fn test_normalize_resolves_dot_segments() {
        assert_eq!(normalize_path("/orders/../admin/reports").unwrap(), "/admin/reports");
        assert_eq!(normalize_path("/admin/./reports").unwrap(), "/admin/reports");
        assert_eq!(normalize_path("//admin///reports/").unwrap(), "/admin/reports/");
        assert_eq!(normalize_path("/admin/..").unwrap(), "/");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn test_normalize_decodes_unreserved_only() {
        assert_eq!(normalize_path("/%61dmin/reports").unwrap(), "/admin/reports");
        assert_eq!(normalize_path("/orders/%2e%2E/admin").unwrap(), "/admin");
        assert_eq!(normalize_path("/search/a%20b").unwrap(), "/search/a%20b");
        assert_eq!(normalize_path("/bad/%zz").unwrap(), "/bad/%zz");
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert!(normalize_path("/../etc/passwd").is_err());
        assert!(normalize_path("/orders/../../admin").is_err());
        assert!(normalize_path("/orders%2F..%2Fadmin/reports").is_err());
        assert!(normalize_path("/orders%5c..%5cadmin").is_err());
    }

    #[test]
    fn test_trailing_wildcard_matches_any_suffix() {
        let admin = pattern("/admin/**");
        assert!(admin.matches("/admin"));
        assert!(admin.matches("/admin/"));
        assert!(admin.matches("/admin/x"));
        assert!(admin.matches("/admin/x/y"));
        assert!(!admin.matches("/administrator"));
        assert!(!admin.matches("/"));
        assert!(!admin.matches("/api/admin"));
    }

    #[test]
    fn test_literal_pattern_is_exact() {
        let login = pattern("/auth/login");
        assert!(login.matches("/auth/login"));
        assert!(login.matches("/auth/login/"));
        assert!(!login.matches("/auth/login/extra"));
        assert!(!login.matches("/auth"));
    }

    #[test]
    fn test_empty_segments_are_ignored() {
        assert!(pattern("/admin/**").matches("//admin//reports"));
        assert!(pattern("/orders/{id}").matches("/orders//5/"));
    }

    #[test]
    fn test_capture_and_glob_segments() {
        let orders = pattern("/orders/{id}/items");
        assert!(orders.matches("/orders/5/items"));
        assert!(!orders.matches("/orders/5"));

        let files = pattern("/static/*.css");
        assert!(files.matches("/static/site.css"));
        assert!(!files.matches("/static/site.js"));
        assert!(!files.matches("/static/css/site.css"));

        let versioned = pattern("/api/v?/users");
        assert!(versioned.matches("/api/v1/users"));
        assert!(!versioned.matches("/api/v10/users"));
    }

    #[test]
    fn test_root_wildcard() {
        let all = pattern("/**");
        assert!(all.matches("/"));
        assert!(all.matches("/anything/at/all"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("admin/**").is_err());
        assert!(PathPattern::parse("/admin/**/reports").is_err());
        assert!(PathPattern::parse("/admin/a**").is_err());
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(pattern("/admin/**").literal_prefix(), "/admin");
        assert_eq!(pattern("/orders/{id}/items").literal_prefix(), "/orders");
        assert_eq!(pattern("/**").literal_prefix(), "/");
    }

    #[test]
    fn test_classify() {
        let matcher =
            PathMatcher::new(&["/auth/**"], &["/admin/**", "/backoffice/**"]).unwrap();

        assert_eq!(
            matcher.classify("/auth/login"),
            PathClassification { exempt: true, privileged: false }
        );
        assert_eq!(
            matcher.classify("/backoffice/users/3"),
            PathClassification { exempt: false, privileged: true }
        );
        assert_eq!(matcher.classify("/orders/5"), PathClassification::default());
    }

    #[test]
    fn test_overlapping_sets_are_rejected() {
        assert!(PathMatcher::new(&["/**"], &["/admin/**"]).is_err());
        assert!(PathMatcher::new(&["/admin/login"], &["/admin/**"]).is_err());
        assert!(PathMatcher::new(&["/admin/**"], &["/admin/reports"]).is_err());
        assert!(PathMatcher::new(&["/auth/**"], &["/admin/**"]).is_ok());
    }
}
