//! Scry core types: resource kinds, typed records, queries and snapshots.
//!
//! Everything here is transport-agnostic plain data. Records are transient
//! copies fetched per query; nothing in this crate caches them.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod columns;
pub mod error;
pub mod record;

pub use error::{SourceFailure, StateError, StateResult, STALE_NOTE};
pub use record::Record;

/// Default cap on records returned by a list query.
pub const DEFAULT_LIMIT: usize = 100_000;

/// Default per-call budget for reaching data sources.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Actor,
    Task,
    Object,
    Node,
    Worker,
    Job,
    PlacementGroup,
    RuntimeEnv,
}

/// Where authoritative state for a kind lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Held by the central coordinator source.
    Cluster,
    /// Held by the per-machine sources; every reachable machine is queried.
    PerMachine,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Actor,
        ResourceKind::Task,
        ResourceKind::Object,
        ResourceKind::Node,
        ResourceKind::Worker,
        ResourceKind::Job,
        ResourceKind::PlacementGroup,
        ResourceKind::RuntimeEnv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Actor => "ACTOR",
            ResourceKind::Task => "TASK",
            ResourceKind::Object => "OBJECT",
            ResourceKind::Node => "NODE",
            ResourceKind::Worker => "WORKER",
            ResourceKind::Job => "JOB",
            ResourceKind::PlacementGroup => "PLACEMENT_GROUP",
            ResourceKind::RuntimeEnv => "RUNTIME_ENV",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ResourceKind::Object | ResourceKind::Worker | ResourceKind::RuntimeEnv => Scope::PerMachine,
            _ => Scope::Cluster,
        }
    }

    /// Name of the field carrying the record id for this kind.
    pub fn id_field(&self) -> &'static str {
        match self {
            ResourceKind::Actor => "actor_id",
            ResourceKind::Task => "task_id",
            ResourceKind::Object => "object_id",
            ResourceKind::Node => "node_id",
            ResourceKind::Worker => "worker_id",
            ResourceKind::Job => "job_id",
            ResourceKind::PlacementGroup => "placement_group_id",
            ResourceKind::RuntimeEnv => "runtime_env_id",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = StateError;

    /// Accepts `actors`, `actor`, `ACTOR`, `placement-groups`, `placement_group`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase().replace('-', "_");
        let norm = lowered.strip_suffix('s').unwrap_or(lowered.as_str());
        let kind = match norm {
            "actor" => ResourceKind::Actor,
            "task" => ResourceKind::Task,
            "object" => ResourceKind::Object,
            "node" => ResourceKind::Node,
            "worker" => ResourceKind::Worker,
            "job" => ResourceKind::Job,
            "placement_group" | "pg" => ResourceKind::PlacementGroup,
            "runtime_env" => ResourceKind::RuntimeEnv,
            _ => return Err(StateError::InvalidArgument(format!("unknown resource kind: {}", s))),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailLevel {
    /// Single round trip, cheap fields only.
    Summary,
    /// Enriched by a second, per-record round trip to the owning source.
    Detail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Eq => f.write_str("="),
            FilterOp::Ne => f.write_str("!="),
        }
    }
}

/// `(field, op, value)`; evaluated as string (in)equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { field: field.into(), op: FilterOp::Eq, value: value.into() }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { field: field.into(), op: FilterOp::Ne, value: value.into() }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.op, self.value)
    }
}

pub type Filters = SmallVec<[Predicate; 4]>;

#[derive(Debug, Clone)]
pub struct Query {
    pub kind: ResourceKind,
    /// ANDed, evaluated in order.
    pub filters: Filters,
    pub limit: usize,
    pub detail: bool,
    pub timeout: Duration,
}

impl Query {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, filters: SmallVec::new(), limit: DEFAULT_LIMIT, detail: false, timeout: DEFAULT_TIMEOUT }
    }

    pub fn filter(mut self, p: Predicate) -> Self {
        self.filters.push(p);
        self
    }

    pub fn filters(mut self, ps: impl IntoIterator<Item = Predicate>) -> Self {
        self.filters.extend(ps);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn detail(mut self, on: bool) -> Self {
        self.detail = on;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of asking one data source.
#[derive(Debug, Clone)]
pub enum SourceResponse {
    Success(Vec<Record>),
    PartialFailure(String),
    Timeout,
}

/// A response slot tagged with the source that produced it.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source_id: String,
    pub response: SourceResponse,
}

impl SourceBatch {
    pub fn success(source_id: impl Into<String>, records: Vec<Record>) -> Self {
        Self { source_id: source_id.into(), response: SourceResponse::Success(records) }
    }

    pub fn failure(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), response: SourceResponse::PartialFailure(reason.into()) }
    }

    pub fn timeout(source_id: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), response: SourceResponse::Timeout }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.response, SourceResponse::Success(_))
    }

    /// Human-readable reason for a failed slot; `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.response {
            SourceResponse::Success(_) => None,
            SourceResponse::PartialFailure(reason) => Some(reason.clone()),
            SourceResponse::Timeout => Some("timed out".to_string()),
        }
    }
}

/// Best-effort aggregate of one query. Independently stale views are unioned;
/// there is no snapshot-isolation claim across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: ResourceKind,
    /// Sorted by record id.
    pub records: Vec<Record>,
    /// Records matched before the limit was applied.
    pub total: usize,
    pub truncated: bool,
    /// One entry per failed source, then one if truncated.
    pub warnings: Vec<String>,
    /// False when at least one source failed or timed out.
    pub complete: bool,
}

impl Snapshot {
    pub fn is_partial(&self) -> bool {
        !self.complete
    }
}

pub mod prelude {
    pub use super::{
        DetailLevel, FilterOp, Filters, Predicate, Query, Record, ResourceKind, Scope, Snapshot, SourceBatch,
        SourceResponse, StateError, StateResult,
    };
}
