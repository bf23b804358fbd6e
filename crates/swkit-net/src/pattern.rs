//! URL patterns for request classification.

use url::Url;

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact URL match (fragment ignored).
    Exact,
    /// Prefix of the full URL (e.g., a pinned CDN origin).
    Prefix,
    /// Substring of the URL path (e.g., `/css/`).
    PathContains,
    /// Suffix of the URL path (e.g., `.woff2`).
    PathSuffix,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a path-substring pattern.
    pub fn path_contains(segment: &str) -> Self {
        Self {
            pattern_type: PatternType::PathContains,
            pattern: segment.to_string(),
        }
    }

    /// Create a path-suffix pattern.
    pub fn path_suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::PathSuffix,
            pattern: suffix.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self.pattern_type {
            PatternType::Exact => {
                let mut url = url.clone();
                url.set_fragment(None);
                url.as_str() == self.pattern
            }
            PatternType::Prefix => url.as_str().starts_with(&self.pattern),
            PatternType::PathContains => url.path().contains(&self.pattern),
            PatternType::PathSuffix => url.path().ends_with(&self.pattern),
        }
    }

    /// True if any of `patterns` matches `url`.
    pub fn any_matches(patterns: &[UrlPattern], url: &Url) -> bool {
        patterns.iter().any(|p| p.matches(url))
    }
}
