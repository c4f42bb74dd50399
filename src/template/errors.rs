//! Template error types with suggestions for mistyped context keys

use std::fmt;
use thiserror::Error;

/// Location in a template where an error occurred
#[derive(Debug, Clone, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub template_name: Option<String>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.template_name {
            Some(ref name) => write!(f, "{}:{}", name, self.line),
            None => write!(f, "line {}", self.line),
        }
    }
}

/// Template rendering errors
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Referenced context key doesn't exist
    #[error("undefined variable '{name}' at {location}{}", .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UndefinedVariable {
        name: String,
        location: SourceLocation,
        suggestion: Option<String>,
    },

    #[error("syntax error at {location}: {message}")]
    SyntaxError {
        message: String,
        location: SourceLocation,
    },

    #[error("filter '{filter}' failed: {message}")]
    FilterError { filter: String, message: String },

    /// Wrapped minijinja error
    #[error("template error: {0}")]
    Internal(#[from] minijinja::Error),
}

impl TemplateError {
    pub fn undefined_variable_at(name: impl Into<String>, line: usize, known: &[&str]) -> Self {
        let name = name.into();
        // Suggest against the top-level key only
        let head = name.split('.').next().unwrap_or(&name).to_string();
        let suggestion = if known.contains(&head.as_str()) {
            None
        } else {
            suggest_correction(&head, known)
        };
        Self::UndefinedVariable {
            name,
            location: SourceLocation {
                line,
                template_name: None,
            },
            suggestion,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::SyntaxError {
            message: message.into(),
            location: SourceLocation {
                line,
                template_name: None,
            },
        }
    }

    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FilterError {
            filter: filter.into(),
            message: message.into(),
        }
    }
}

/// Closest candidate within half the typo's length in edits
pub fn suggest_correction(typo: &str, candidates: &[&str]) -> Option<String> {
    let max_distance = (typo.len() / 2).max(2);
    candidates
        .iter()
        .map(|c| (edit_distance(typo, c), *c))
        .filter(|(d, _)| *d <= max_distance)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

/// Levenshtein distance, two rows at a time
fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut cur = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b_chars.len()]
}
