//! Fan-out query coordinator.
//!
//! One tokio task per target source, all bounded by a single deadline.
//! Stragglers are aborted and reported as timeouts. Filters run per batch
//! as results arrive; aggregation, truncation and the optional detail pass
//! follow.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use rustc_hash::FxHashMap;
use scry_core::{Filters, Query, Record, ResourceKind, Snapshot, SourceBatch, SourceFailure, StateError, StateResult};
use scry_sources::{DataSource, Lookup, SourceEntry, SourceError, SourceRegistry, SourceResult};
use scry_store::Aggregate;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default number of in-flight detail calls.
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 64;

/// A by-id lookup that found its record.
#[derive(Debug, Clone)]
pub struct Found {
    pub record: Record,
    pub source_id: String,
    /// One per source that failed while looking.
    pub warnings: Vec<String>,
}

pub struct QueryCoordinator {
    registry: Arc<SourceRegistry>,
    detail_concurrency: usize,
}

/// Run `call` against every target concurrently, each bounded by `deadline`.
/// Results come back in target order.
async fn fan_out<T, F, Fut>(targets: &[SourceEntry], deadline: Instant, call: F) -> Vec<(String, SourceResult<T>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn DataSource>) -> Fut,
    Fut: std::future::Future<Output = SourceResult<T>> + Send + 'static,
{
    let handles: Vec<(String, tokio::task::JoinHandle<SourceResult<T>>)> = targets
        .iter()
        .map(|t| {
            let fut = call(Arc::clone(&t.source));
            let h = tokio::spawn(async move {
                match timeout_at(deadline, fut).await {
                    Ok(r) => r,
                    Err(_) => Err(SourceError::Timeout),
                }
            });
            (t.id.clone(), h)
        })
        .collect();
    let waits = handles.into_iter().map(|(id, mut h)| async move {
        let res = match timeout_at(deadline, &mut h).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => Err(SourceError::Failed(format!("source task failed: {}", e))),
            Err(_) => {
                h.abort();
                Err(SourceError::Timeout)
            }
        };
        (id, res)
    });
    futures::future::join_all(waits).await
}

fn record_outcome<T>(kind: ResourceKind, source_id: &str, res: &SourceResult<T>) {
    metrics::counter!("query_sources_total", 1u64, "kind" => kind.as_str());
    if let Err(e) = res {
        metrics::counter!("query_source_failures_total", 1u64, "reason" => e.reason_label());
        warn!(kind = %kind, source = %source_id, error = %e, "api: source failed");
    }
}

impl QueryCoordinator {
    pub fn new(registry: Arc<SourceRegistry>, detail_concurrency: usize) -> Self {
        Self { registry, detail_concurrency: detail_concurrency.max(1) }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    fn targets(&self, kind: ResourceKind) -> StateResult<Vec<SourceEntry>> {
        let targets = self.registry.targets(kind);
        if targets.is_empty() {
            return Err(StateError::NoSources(kind));
        }
        Ok(targets)
    }

    /// List `kind` on every target and apply `filters` to each batch.
    pub async fn collect(&self, kind: ResourceKind, filters: &Filters, timeout: Duration) -> StateResult<(Vec<SourceEntry>, Vec<SourceBatch>)> {
        let targets = self.targets(kind)?;
        let deadline = Instant::now() + timeout;
        let results = fan_out(&targets, deadline, move |src| async move { src.list(kind).await }).await;
        let batches = results
            .into_iter()
            .map(|(id, res)| {
                record_outcome(kind, &id, &res);
                match res {
                    Ok(mut recs) => {
                        let before = recs.len();
                        let dropped = scry_filter::retain_matching(&mut recs, filters);
                        debug!(source = %id, before, dropped, "api: batch filtered");
                        SourceBatch::success(id, recs)
                    }
                    Err(e) => e.into_batch(id),
                }
            })
            .collect();
        Ok((targets, batches))
    }

    /// Fan out, filter, aggregate and (optionally) enrich. The aggregate keeps
    /// per-record owners for callers that need them.
    pub async fn query_aggregate(&self, q: &Query) -> StateResult<Aggregate> {
        let t0 = std::time::Instant::now();
        let (targets, batches) = self.collect(q.kind, &q.filters, q.timeout).await?;
        info!(kind = %q.kind, targets = targets.len(), filters = q.filters.len(), limit = q.limit, detail = q.detail, "api: query fan-out done");
        let mut agg = scry_store::aggregate(batches, q.limit);
        if agg.all_failed() {
            warn!(kind = %q.kind, failed = agg.failed.len(), "api: all sources failed");
            return Err(StateError::AllSourcesFailed { failures: agg.failed });
        }
        if q.detail && !agg.records.is_empty() {
            self.detail_pass(q.kind, &targets, &mut agg, q.timeout).await;
        }
        metrics::counter!("query_records_total", agg.records.len() as u64, "kind" => q.kind.as_str());
        if agg.truncated {
            metrics::counter!("query_truncated_total", 1u64, "kind" => q.kind.as_str());
        }
        metrics::histogram!("query_eval_ms", t0.elapsed().as_secs_f64() * 1000.0);
        Ok(agg)
    }

    pub async fn query(&self, q: &Query) -> StateResult<Snapshot> {
        let t0 = std::time::Instant::now();
        info!(kind = %q.kind, "api: query start");
        let snap = self.query_aggregate(q).await?.into_snapshot(q.kind);
        info!(kind = %q.kind, records = snap.records.len(), total = snap.total, warnings = snap.warnings.len(), truncated = snap.truncated, took_ms = %t0.elapsed().as_millis(), "api: query ok");
        Ok(snap)
    }

    /// Second round trip per surviving record, under its own deadline of
    /// `timeout`. A failed detail call leaves the record at summary level and
    /// adds a warning.
    async fn detail_pass(&self, kind: ResourceKind, targets: &[SourceEntry], agg: &mut Aggregate, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let by_id: FxHashMap<&str, Arc<dyn DataSource>> =
            targets.iter().map(|t| (t.id.as_str(), Arc::clone(&t.source))).collect();
        let jobs: Vec<(usize, String, String, Option<Arc<dyn DataSource>>)> = agg
            .records
            .iter()
            .zip(agg.owners.iter())
            .enumerate()
            .map(|(i, (r, owner))| (i, r.id().to_string(), owner.clone(), by_id.get(owner.as_str()).cloned()))
            .collect();
        let calls: Vec<BoxFuture<'static, (usize, String, String, SourceResult<Record>)>> = jobs
            .into_iter()
            .map(|(i, id, owner, src)| {
                Box::pin(async move {
                    let res = match src {
                        Some(src) => match timeout_at(deadline, src.detail(kind, &id)).await {
                            Ok(r) => r,
                            Err(_) => Err(SourceError::Timeout),
                        },
                        None => Err(SourceError::Unavailable(format!("source {} left the registry", owner))),
                    };
                    (i, id, owner, res)
                }) as BoxFuture<'static, _>
            })
            .collect();
        let results: Vec<(usize, String, String, SourceResult<Record>)> =
            futures::stream::iter(calls).buffer_unordered(self.detail_concurrency).collect().await;
        let mut failed: Vec<(usize, String)> = Vec::new();
        for (i, id, owner, res) in results {
            match res {
                Ok(rec) if rec.id() == id && rec.kind() == kind => agg.records[i] = rec,
                Ok(_) => failed.push((i, format!("detail for {} {} from source {}: mismatched record", kind, id, owner))),
                Err(e) => {
                    metrics::counter!("query_detail_failures_total", 1u64, "reason" => e.reason_label());
                    failed.push((i, format!("detail for {} {} from source {}: {}", kind, id, owner, e)));
                }
            }
        }
        // keep warnings in record order regardless of completion order
        failed.sort_by_key(|(i, _)| *i);
        if !failed.is_empty() {
            warn!(kind = %kind, failed = failed.len(), "api: detail pass degraded records");
        }
        agg.warnings.extend(failed.into_iter().map(|(_, w)| w));
    }

    /// By-id lookup across the targets for `kind`. The first target in
    /// registry order holding the record wins.
    pub async fn get(&self, kind: ResourceKind, id: &str, timeout: Duration) -> StateResult<Found> {
        let t0 = std::time::Instant::now();
        info!(kind = %kind, id = %id, "api: get start");
        let targets = self.targets(kind)?;
        let deadline = Instant::now() + timeout;
        let owned_id = id.to_string();
        let results = fan_out(&targets, deadline, move |src| {
            let id = owned_id.clone();
            async move { src.lookup(kind, &id).await }
        })
        .await;

        let mut failures: Vec<SourceFailure> = Vec::new();
        let mut found: Option<(Record, String)> = None;
        let mut reclaimed = false;
        for (source_id, res) in results {
            record_outcome(kind, &source_id, &res);
            match res {
                Ok(Lookup::Found(rec)) => {
                    if found.is_none() {
                        found = Some((rec, source_id));
                    }
                }
                Ok(Lookup::Reclaimed) => reclaimed = true,
                Ok(Lookup::Absent) => {}
                Err(e) => failures.push(SourceFailure { source_id, reason: e.to_string() }),
            }
        }
        let what = format!("{} {}", kind, id);
        match found {
            Some((record, source_id)) => {
                info!(kind = %kind, id = %id, source = %source_id, failed = failures.len(), took_ms = %t0.elapsed().as_millis(), "api: get ok");
                Ok(Found { record, source_id, warnings: failures.iter().map(scry_store::source_warning).collect() })
            }
            None if failures.len() == targets.len() => Err(StateError::AllSourcesFailed { failures }),
            None if reclaimed => Err(StateError::stale(what)),
            None => Err(StateError::not_found_with_failures(what, &failures)),
        }
    }
}
