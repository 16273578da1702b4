//! Compiled key patterns.

use regex::Regex;

use crate::error::CacheError;

/// A key matcher compiled once and reused for every entry in a scan.
///
/// Regex patterns match anywhere in the key unless anchored; glob patterns
/// (`*`, `?`) must match the whole key.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, CacheError> {
        let regex = Regex::new(pattern).map_err(|source| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn glob(glob: &str) -> Result<Self, CacheError> {
        let mut translated = String::with_capacity(glob.len() + 8);
        translated.push('^');
        for c in glob.chars() {
            match c {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');

        let mut pattern = Self::new(&translated)?;
        pattern.source = glob.to_string();
        Ok(pattern)
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as written by the caller.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
