//! Key patterns for selective invalidation

use nf_core::{Error, Result};
use regex::Regex;

/// Pattern matched against cache keys.
///
/// String patterns use glob syntax (`*`, `?`, `[...]`) and must match the
/// whole key. A string wrapped in slashes (`/^schemas:.*slack/`) is compiled
/// as a regular expression instead, which may match anywhere in the key.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl KeyPattern {
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(KeyPattern::Glob)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(KeyPattern::Regex)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    /// `/expr/` → regex, anything else → glob
    pub fn parse(pattern: &str) -> Result<Self> {
        match pattern
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix('/'))
        {
            Some(expr) if !expr.is_empty() => Self::regex(expr),
            _ => Self::glob(pattern),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Glob(pattern) => pattern.matches(key),
            KeyPattern::Regex(regex) => regex.is_match(key),
        }
    }
}

impl std::str::FromStr for KeyPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KeyPattern::parse(s)
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPattern::Glob(pattern) => write!(f, "{}", pattern.as_str()),
            KeyPattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}
