//! Dot-separated key paths into the execution context

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors parsing a key path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("segment pattern is valid"))
}

/// A parsed key path such as `dataset.uri` or `$.metrics.accuracy`
///
/// The empty path (`$`) addresses the whole context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse a path, accepting an optional `$` / `$.` root prefix
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        let body = if trimmed == "$" {
            ""
        } else if let Some(rest) = trimmed.strip_prefix("$.") {
            rest
        } else {
            trimmed
        };

        if body.is_empty() {
            if trimmed.is_empty() {
                return Err(PathError {
                    path: raw.to_string(),
                    reason: "path is empty".into(),
                });
            }
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in body.split('.') {
            if !segment_pattern().is_match(segment) {
                return Err(PathError {
                    path: raw.to_string(),
                    reason: format!("bad segment '{}'", segment),
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment, if any
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(|s| s.as_str())
    }

    /// Append a single segment
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Concatenate two paths
    pub fn join(&self, other: &KeyPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// True if `prefix` is equal to or an ancestor of this path
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True if either path is equal to or contains the other
    pub fn overlaps(&self, other: &KeyPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Render the first `len` segments (used in error messages)
    pub fn prefix_string(&self, len: usize) -> String {
        if len == 0 {
            return "$".into();
        }
        self.segments[..len.min(self.segments.len())].join(".")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "$")
        } else {
            write!(f, "{}", self.segments.join("."))
        }
    }
}
