//! Scry sources: the seams the query layer talks through.
//!
//! A `DataSource` answers list / detail / by-id lookups for one owner of
//! state (the cluster coordinator or a single machine). A `LogAgent` exposes
//! the text files living on one machine. Both are reached over an unreliable
//! channel; every call may fail independently.

#![forbid(unsafe_code)]

use bytes::Bytes;
use scry_core::{Record, ResourceKind, SourceBatch};

pub mod registry;
pub mod static_source;

pub use registry::{SourceEntry, SourceRegistry, SourceRole};
pub use static_source::StaticSource;

/// Why a single source call failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

impl SourceError {
    /// Low-cardinality label for metrics.
    pub fn reason_label(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "unavailable",
            SourceError::Timeout => "timeout",
            SourceError::Failed(_) => "failed",
        }
    }

    /// Fold into a tagged response slot.
    pub fn into_batch(self, source_id: impl Into<String>) -> SourceBatch {
        match self {
            SourceError::Timeout => SourceBatch::timeout(source_id),
            other => SourceBatch::failure(source_id, other.to_string()),
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Outcome of a by-id lookup on one source.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Record),
    /// The source knew this id but already garbage-collected it.
    Reclaimed,
    Absent,
}

#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// All records of `kind` this source owns, at summary level.
    async fn list(&self, kind: ResourceKind) -> SourceResult<Vec<Record>>;

    /// One record at detail level (its `details` map filled).
    async fn detail(&self, kind: ResourceKind, id: &str) -> SourceResult<Record>;

    async fn lookup(&self, kind: ResourceKind, id: &str) -> SourceResult<Lookup>;
}

#[async_trait::async_trait]
pub trait LogAgent: Send + Sync {
    /// File names available on this machine, unordered.
    async fn list_files(&self) -> SourceResult<Vec<String>>;

    /// Up to `max` bytes of `filename` starting at `offset`.
    /// An empty chunk means the reader is at end of file.
    async fn read_chunk(&self, filename: &str, offset: u64, max: usize) -> SourceResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_core::SourceResponse;

    #[test]
    fn timeout_folds_into_timeout_slot() {
        let b = SourceError::Timeout.into_batch("node-a");
        assert!(matches!(b.response, SourceResponse::Timeout));
        let b = SourceError::Unavailable("connection refused".into()).into_batch("node-b");
        assert_eq!(b.failure_reason().as_deref(), Some("unavailable: connection refused"));
        assert_eq!(SourceError::Failed("x".into()).reason_label(), "failed");
    }
}
