//! Error taxonomy for state queries and log access.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ResourceKind;

/// Note attached to `NotFound` when the owning source already reclaimed the data.
pub const STALE_NOTE: &str = "data already reclaimed by its owning source";

/// One failed data source and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub reason: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source_id, self.reason)
    }
}

/// Call-level errors. Per-source failures never surface here unless every
/// source failed; they are folded into `Snapshot::warnings` instead.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StateError {
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },
    #[error("all {} data sources failed: {}", .failures.len(), render_failures(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },
    #[error("no data source registered for {0}")]
    NoSources(ResourceKind),
    #[error("not found: {what}{}", render_note(.note))]
    NotFound { what: String, note: Option<String> },
    #[error("ambiguous target {selector}: {} matches ({})", .matches.len(), .matches.join(", "))]
    AmbiguousTarget { selector: String, matches: Vec<String> },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type StateResult<T> = Result<T, StateError>;

fn render_failures(failures: &[SourceFailure]) -> String {
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

fn render_note(note: &Option<String>) -> String {
    note.as_deref().map(|n| format!(" ({})", n)).unwrap_or_default()
}

impl StateError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StateError::NotFound { what: what.into(), note: None }
    }

    /// `NotFound` for a resource that existed but was garbage-collected by its source.
    pub fn stale(what: impl Into<String>) -> Self {
        StateError::NotFound { what: what.into(), note: Some(STALE_NOTE.to_string()) }
    }

    /// `NotFound` when some sources could not be asked; the record may live on one of them.
    pub fn not_found_with_failures(what: impl Into<String>, failures: &[SourceFailure]) -> Self {
        if failures.is_empty() {
            return Self::not_found(what);
        }
        let note = format!("sources that could not be asked: {}", render_failures(failures));
        StateError::NotFound { what: what.into(), note: Some(note) }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, StateError::NotFound { note: Some(n), .. } if n == STALE_NOTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_failed_lists_each_reason() {
        let e = StateError::AllSourcesFailed {
            failures: vec![
                SourceFailure { source_id: "node-a".into(), reason: "timed out".into() },
                SourceFailure { source_id: "node-b".into(), reason: "connection refused".into() },
            ],
        };
        let msg = e.to_string();
        assert!(msg.starts_with("all 2 data sources failed"));
        assert!(msg.contains("node-a: timed out"));
        assert!(msg.contains("node-b: connection refused"));
    }

    #[test]
    fn stale_not_found_carries_note() {
        let e = StateError::stale("ACTOR abc");
        assert!(e.is_not_found());
        assert!(e.is_stale());
        assert_eq!(e.to_string(), format!("not found: ACTOR abc ({})", STALE_NOTE));
        assert!(!StateError::not_found("ACTOR abc").is_stale());
    }

    #[test]
    fn not_found_names_unreachable_sources() {
        let failures = vec![SourceFailure { source_id: "n1".into(), reason: "unavailable: connection refused".into() }];
        let e = StateError::not_found_with_failures("WORKER w1", &failures);
        assert!(e.is_not_found());
        assert!(!e.is_stale());
        assert_eq!(e.to_string(), "not found: WORKER w1 (sources that could not be asked: n1: unavailable: connection refused)");
        assert_eq!(StateError::not_found_with_failures("WORKER w1", &[]), StateError::not_found("WORKER w1"));
    }
}
