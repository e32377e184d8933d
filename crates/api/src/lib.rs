//! Scry public API facade (in-process).
//!
//! This crate defines the stable trait frontends (CLI, tests) depend on and
//! an implementation that drives the query coordinator, aggregator,
//! summarizer and log streamer directly.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use scry_core::record::ActorState;
use scry_core::{Filters, Query, Record, ResourceKind, Snapshot, StateError, StateResult};
use scry_logs::{
    ActorDirectory, ActorPlacement, LogLine, LogLocator, LogOptions, LogSelector, LogStreamer, LogTarget, StreamHandle,
};
use scry_sources::SourceRegistry;
use scry_store::{default_key, Summary, SummaryAccumulator};
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod coordinator;
pub mod manifest;
pub mod settings;

pub use coordinator::{Found, QueryCoordinator};
pub use manifest::ClusterManifest;
pub use settings::Settings;

/// A single record fetched by id, plus warnings from sources that could not
/// be asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub record: Record,
    pub warnings: Vec<String>,
}

/// Declarative Scry API surface.
#[async_trait::async_trait]
pub trait StateApi: Send + Sync {
    /// Group records of `kind` that pass `filters` and count them by state.
    async fn summarize(&self, kind: ResourceKind, filters: Filters) -> StateResult<Summary>;

    /// Aggregated, filtered and truncated snapshot for `query`.
    async fn list(&self, query: Query) -> StateResult<Snapshot>;

    /// One record at detail level.
    async fn get(&self, kind: ResourceKind, id: &str) -> StateResult<GetResponse>;

    /// Log files matching `selector` across machines.
    async fn list_logs(&self, selector: LogSelector) -> StateResult<Vec<LogTarget>>;

    /// Read or follow exactly one log file.
    async fn stream_logs(&self, selector: LogSelector, opts: LogOptions) -> StateResult<StreamHandle<LogLine>>;
}

/// Actor placements answered by a by-id lookup on the coordinator.
pub struct CoordinatorActors {
    coordinator: Arc<QueryCoordinator>,
    timeout: std::time::Duration,
}

#[async_trait::async_trait]
impl ActorDirectory for CoordinatorActors {
    async fn placement(&self, actor_id: &str) -> StateResult<ActorPlacement> {
        let found = self.coordinator.get(ResourceKind::Actor, actor_id, self.timeout).await?;
        match found.record {
            Record::Actor(a) => {
                let running = !matches!(a.state, ActorState::Dead);
                Ok(ActorPlacement {
                    actor_id: a.actor_id,
                    node_id: a.node_id,
                    worker_id: a.worker_id.filter(|_| running),
                    pid: a.pid.filter(|_| running),
                })
            }
            other => Err(StateError::Internal(format!("lookup for actor {} returned {}", actor_id, other.kind()))),
        }
    }
}

/// In-process implementation that calls internal crates directly.
pub struct InProcApi {
    settings: Settings,
    coordinator: Arc<QueryCoordinator>,
    locator: LogLocator,
    streamer: LogStreamer,
}

impl InProcApi {
    pub fn new(registry: Arc<SourceRegistry>, settings: Settings) -> Self {
        let coordinator = Arc::new(QueryCoordinator::new(Arc::clone(&registry), settings.detail_concurrency));
        let actors = Arc::new(CoordinatorActors { coordinator: Arc::clone(&coordinator), timeout: settings.timeout() });
        let locator = LogLocator::new(Arc::clone(&registry), actors);
        let streamer = LogStreamer::new(registry, settings.stream_settings());
        Self { settings, coordinator, locator, streamer }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
        &self.coordinator
    }

    /// A query for `kind` carrying the configured limit and timeout.
    pub fn query(&self, kind: ResourceKind) -> Query {
        Query::new(kind).limit(self.settings.max_records).timeout(self.settings.timeout())
    }
}

#[async_trait::async_trait]
impl StateApi for InProcApi {
    async fn summarize(&self, kind: ResourceKind, filters: Filters) -> StateResult<Summary> {
        let t0 = Instant::now();
        info!(kind = %kind, filters = filters.len(), "api: summarize start");
        let mut q = self.query(kind);
        q.filters = filters;
        let agg = self.coordinator.query_aggregate(&q).await?;
        let opts = self.settings.summary_options();
        // one accumulator per owning source, merged at the end
        let mut per_owner: Vec<(&str, SummaryAccumulator)> = Vec::new();
        for (rec, owner) in agg.records.iter().zip(agg.owners.iter()) {
            let slot = match per_owner.iter().position(|(o, _)| *o == owner.as_str()) {
                Some(i) => i,
                None => {
                    per_owner.push((owner.as_str(), SummaryAccumulator::new(kind)));
                    per_owner.len() - 1
                }
            };
            per_owner[slot].1.accumulate(rec, default_key(rec, opts));
        }
        let mut acc = SummaryAccumulator::new(kind);
        for (_, a) in per_owner {
            acc.merge(a);
        }
        let mut summary = acc.finalize();
        summary.truncated = agg.truncated;
        summary.warnings = agg.warnings;
        info!(kind = %kind, groups = summary.groups.len(), total = summary.total, took_ms = %t0.elapsed().as_millis(), "api: summarize ok");
        Ok(summary)
    }

    async fn list(&self, query: Query) -> StateResult<Snapshot> {
        let t0 = Instant::now();
        info!(kind = %query.kind, limit = query.limit, detail = query.detail, "api: list start");
        let snap = self.coordinator.query(&query).await?;
        info!(kind = %query.kind, records = snap.records.len(), complete = snap.complete, took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(snap)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> StateResult<GetResponse> {
        let found = self.coordinator.get(kind, id, self.settings.timeout()).await?;
        Ok(GetResponse { record: found.record, warnings: found.warnings })
    }

    async fn list_logs(&self, selector: LogSelector) -> StateResult<Vec<LogTarget>> {
        let t0 = Instant::now();
        info!(selector = %scry_logs::locate::selector_label(&selector), "api: list_logs start");
        let files = self.locator.locate(&selector).await?;
        info!(files = files.len(), took_ms = %t0.elapsed().as_millis(), "api: list_logs ok");
        Ok(files)
    }

    async fn stream_logs(&self, selector: LogSelector, opts: LogOptions) -> StateResult<StreamHandle<LogLine>> {
        let t0 = Instant::now();
        info!(selector = %scry_logs::locate::selector_label(&selector), follow = opts.follow, "api: stream_logs start");
        let target = self.locator.resolve_one(&selector).await?;
        let handle = self.streamer.open(&target, opts).await?;
        info!(node = %target.node_id, file = %target.filename, stream = %handle.id, took_ms = %t0.elapsed().as_millis(), "api: stream_logs ok");
        Ok(handle)
    }
}
