//! In-memory data source backed by a fixed record set.
//!
//! Used for manifest-described clusters and as a test double. Supports
//! injected latency and failures so callers can exercise partial results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use rustc_hash::{FxHashMap, FxHashSet};
use scry_core::record::Details;
use scry_core::{Record, ResourceKind};
use tracing::debug;

use crate::{DataSource, Lookup, SourceError, SourceResult};

pub struct StaticSource {
    id: String,
    records: ArcSwap<Vec<Record>>,
    details: FxHashMap<String, Details>,
    reclaimed: FxHashSet<String>,
    detail_failures: FxHashSet<String>,
    failure: ArcSwapOption<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: ArcSwap::from_pointee(Vec::new()),
            details: FxHashMap::default(),
            reclaimed: FxHashSet::default(),
            detail_failures: FxHashSet::default(),
            failure: ArcSwapOption::empty(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_records(self, records: Vec<Record>) -> Self {
        self.records.store(Arc::new(records));
        self
    }

    /// Fields returned by the detail pass for `id`.
    pub fn with_details(mut self, id: impl Into<String>, details: Details) -> Self {
        self.details.insert(id.into(), details);
        self
    }

    /// Ids this source once owned but has garbage-collected.
    pub fn with_reclaimed<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reclaimed.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call fails as unavailable with `reason`.
    pub fn failing(self, reason: impl Into<String>) -> Self {
        self.set_failure(Some(reason.into()));
        self
    }

    /// Detail calls for `id` fail; list and lookup still work.
    pub fn with_detail_failure(mut self, id: impl Into<String>) -> Self {
        self.detail_failures.insert(id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_failure(&self, reason: Option<String>) {
        self.failure.store(reason.map(Arc::new));
    }

    pub fn set_records(&self, records: Vec<Record>) {
        self.records.store(Arc::new(records));
    }

    /// Number of trait calls served (including failed ones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    async fn enter(&self, op: &str) -> SourceResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(reason) = self.failure.load_full() {
            debug!(source = %self.id, op, reason = %reason, "static source: injected failure");
            return Err(SourceError::Unavailable(reason.as_ref().clone()));
        }
        Ok(())
    }

    fn find(&self, kind: ResourceKind, id: &str) -> Option<Record> {
        self.records.load().iter().find(|r| r.kind() == kind && r.id() == id).cloned()
    }

    fn enrich(&self, mut rec: Record) -> Record {
        let extra = self.details.get(rec.id()).cloned();
        let slot = rec.details_mut();
        let mut merged = slot.take().unwrap_or_default();
        if let Some(extra) = extra {
            merged.extend(extra);
        }
        *slot = Some(merged);
        rec
    }
}

#[async_trait::async_trait]
impl DataSource for StaticSource {
    async fn list(&self, kind: ResourceKind) -> SourceResult<Vec<Record>> {
        self.enter("list").await?;
        let out: Vec<Record> = self
            .records
            .load()
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .map(Record::into_summary)
            .collect();
        Ok(out)
    }

    async fn detail(&self, kind: ResourceKind, id: &str) -> SourceResult<Record> {
        self.enter("detail").await?;
        if self.detail_failures.contains(id) {
            return Err(SourceError::Failed(format!("detail for {} {} failed", kind, id)));
        }
        match self.find(kind, id) {
            Some(r) => Ok(self.enrich(r)),
            None => Err(SourceError::Failed(format!("{} {} no longer present", kind, id))),
        }
    }

    async fn lookup(&self, kind: ResourceKind, id: &str) -> SourceResult<Lookup> {
        self.enter("lookup").await?;
        if let Some(r) = self.find(kind, id) {
            return Ok(Lookup::Found(self.enrich(r)));
        }
        if self.reclaimed.contains(id) {
            return Ok(Lookup::Reclaimed);
        }
        Ok(Lookup::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_core::record::{Job, JobStatus, JobType};
    use scry_core::DetailLevel;

    fn job(id: &str) -> Record {
        Record::Job(Job {
            job_id: id.into(),
            submission_id: None,
            job_type: JobType::Driver,
            entrypoint: None,
            status: JobStatus::Running,
            start_time_ms: Some(1),
            end_time_ms: None,
            details: None,
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_is_summary_and_detail_is_enriched() {
        let mut d = Details::new();
        d.insert("driver_exit_code".into(), "0".into());
        let s = StaticSource::new("gcs").with_records(vec![job("01"), job("02")]).with_details("01", d);
        let listed = s.list(ResourceKind::Job).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.detail_level() == DetailLevel::Summary));
        assert!(s.list(ResourceKind::Actor).await.unwrap().is_empty());

        let r = s.detail(ResourceKind::Job, "01").await.unwrap();
        assert_eq!(r.detail_level(), DetailLevel::Detail);
        assert_eq!(r.field("driver_exit_code").as_deref(), Some("0"));
        let r = s.detail(ResourceKind::Job, "02").await.unwrap();
        assert_eq!(r.detail_level(), DetailLevel::Detail);
        assert_eq!(s.calls(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lookup_distinguishes_reclaimed() {
        let s = StaticSource::new("gcs").with_records(vec![job("01")]).with_reclaimed(["09"]);
        assert!(matches!(s.lookup(ResourceKind::Job, "01").await.unwrap(), Lookup::Found(_)));
        assert_eq!(s.lookup(ResourceKind::Job, "09").await.unwrap(), Lookup::Reclaimed);
        assert_eq!(s.lookup(ResourceKind::Job, "77").await.unwrap(), Lookup::Absent);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures() {
        let s = StaticSource::new("n1").with_records(vec![job("01")]).with_detail_failure("01");
        assert!(matches!(s.detail(ResourceKind::Job, "01").await, Err(SourceError::Failed(_))));
        s.set_failure(Some("connection refused".into()));
        assert_eq!(
            s.list(ResourceKind::Job).await.unwrap_err(),
            SourceError::Unavailable("connection refused".into())
        );
        s.set_failure(None);
        assert_eq!(s.list(ResourceKind::Job).await.unwrap().len(), 1);
    }
}
