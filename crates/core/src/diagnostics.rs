//! Non-fatal configuration diagnostics.
//!
//! A malformed attribute value or target property is reported here with the
//! location of the offending declaration, and the caller falls back to the
//! default value so unrelated compilation can continue. Every entry is also
//! emitted through `tracing` when it is recorded.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Fully qualified name of the declaration, e.g. `main.src.out`,
    /// or `target.cores` for target properties.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub message: String,
    /// Optional "did you mean" hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.location)?;
        if let Some(attr) = &self.attribute {
            write!(f, " @{}", attr)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(s) = &self.suggestion {
            write!(f, " (did you mean '{}'?)", s)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::warn!("{}", diagnostic),
            Severity::Warning => tracing::warn!("{}", diagnostic),
            Severity::Info => tracing::info!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, location: impl Into<String>, attribute: Option<&str>, message: impl Into<String>) {
        self.record(Severity::Error, location, attribute, message, None);
    }

    pub fn error_with_suggestion(
        &mut self,
        location: impl Into<String>,
        attribute: Option<&str>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        self.record(Severity::Error, location, attribute, message, Some(suggestion.into()));
    }

    pub fn warn(&mut self, location: impl Into<String>, attribute: Option<&str>, message: impl Into<String>) {
        self.record(Severity::Warning, location, attribute, message, None);
    }

    pub fn info(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.record(Severity::Info, location, None, message, None);
    }

    fn record(
        &mut self,
        severity: Severity,
        location: impl Into<String>,
        attribute: Option<&str>,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) {
        self.push(Diagnostic {
            severity,
            location: location.into(),
            attribute: attribute.map(str::to_string),
            message: message.into(),
            suggestion,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

/// Closest candidate by Levenshtein distance, if reasonably close.
pub(crate) fn fuzzy_match<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let input_lower = input.to_lowercase();
    let mut best: Option<(&str, usize)> = None;

    for candidate in candidates {
        let dist = levenshtein(&input_lower, &candidate.to_lowercase());
        match best {
            None => best = Some((candidate, dist)),
            Some((_, best_dist)) if dist < best_dist => best = Some((candidate, dist)),
            _ => {}
        }
    }

    best.and_then(|(name, dist)| {
        let max_len = input.len().max(name.len());
        (dist <= max_len / 2).then_some(name)
    })
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = (0..=b.len()).collect::<Vec<_>>();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
