//! Scry store: turns per-source batches into one ordered, capped view, and
//! folds records into per-group summaries.

#![forbid(unsafe_code)]

use scry_core::{Record, ResourceKind, Snapshot, SourceBatch, SourceFailure, SourceResponse};
use tracing::debug;

pub mod summary;

pub use summary::{
    default_key, summarize, summarize_by, GroupKey, GroupSummary, Summary, SummaryAccumulator, SummaryOptions, DISABLED_KEY,
};

/// Merged result of one fan-out, before it becomes a `Snapshot`.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    /// Sorted by id; equal ids keep source order.
    pub records: Vec<Record>,
    /// `owners[i]` is the source that returned `records[i]`.
    pub owners: Vec<String>,
    /// Record count before the limit was applied.
    pub total: usize,
    pub truncated: bool,
    pub warnings: Vec<String>,
    pub failed: Vec<SourceFailure>,
    /// Number of batches seen.
    pub sources: usize,
}

impl Aggregate {
    /// Every batch failed (and there was at least one).
    pub fn all_failed(&self) -> bool {
        self.sources > 0 && self.failed.len() == self.sources
    }

    pub fn into_snapshot(self, kind: ResourceKind) -> Snapshot {
        let complete = self.failed.is_empty();
        Snapshot {
            kind,
            records: self.records,
            total: self.total,
            truncated: self.truncated,
            warnings: self.warnings,
            complete,
        }
    }
}

pub fn source_warning(f: &SourceFailure) -> String {
    format!("source {}: {}", f.source_id, f.reason)
}

pub fn truncation_warning(limit: usize, total: usize) -> String {
    format!(
        "limit {limit} reached: showing {limit} of {total} records; narrow with filters or raise the limit",
        limit = limit,
        total = total
    )
}

/// Concatenate successful batches, sort by record id, cap at `limit`.
///
/// Failed and timed-out batches contribute one warning each, in batch order;
/// a truncation warning follows them when the cap was hit.
pub fn aggregate(batches: Vec<SourceBatch>, limit: usize) -> Aggregate {
    let mut agg = Aggregate { sources: batches.len(), ..Default::default() };
    let mut rows: Vec<(Record, String)> = Vec::new();
    for b in batches {
        match b.response {
            SourceResponse::Success(recs) => {
                rows.reserve(recs.len());
                for r in recs {
                    rows.push((r, b.source_id.clone()));
                }
            }
            SourceResponse::PartialFailure(reason) => {
                agg.failed.push(SourceFailure { source_id: b.source_id, reason });
            }
            SourceResponse::Timeout => {
                agg.failed.push(SourceFailure { source_id: b.source_id, reason: "timed out".to_string() });
            }
        }
    }
    // stable: duplicates across sources stay in batch order
    rows.sort_by(|a, b| a.0.id().cmp(b.0.id()));
    agg.total = rows.len();
    if rows.len() > limit {
        rows.truncate(limit);
        agg.truncated = true;
    }
    agg.warnings = agg.failed.iter().map(source_warning).collect();
    if agg.truncated {
        agg.warnings.push(truncation_warning(limit, agg.total));
    }
    let (records, owners): (Vec<Record>, Vec<String>) = rows.into_iter().unzip();
    agg.records = records;
    agg.owners = owners;
    debug!(sources = agg.sources, failed = agg.failed.len(), total = agg.total, kept = agg.records.len(), "aggregate: merged");
    agg
}
