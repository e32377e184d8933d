//! Group records by a per-kind key and count them by state.
//!
//! Built as an accumulator (init / accumulate / merge / finalize) so partial
//! summaries computed per source batch can be merged in any order and give
//! the same result.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use scry_core::{Record, ResourceKind, Snapshot};
use serde::Serialize;

/// Bucket used when the grouping dimension was never recorded. Angle
/// brackets keep it apart from a real key such as a function named `disabled`.
pub const DISABLED_KEY: &str = "<disabled>";

/// Callsite value reported by sources that do not record callsites.
const UNRECORDED_CALLSITE: &str = "disabled";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Key(String),
    /// The grouping dimension was never recorded for this record.
    Disabled,
}

impl GroupKey {
    pub fn as_str(&self) -> &str {
        match self {
            GroupKey::Key(k) => k,
            GroupKey::Disabled => DISABLED_KEY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    /// Whether object callsites are recorded cluster-wide. When off, object
    /// summaries collapse into the disabled bucket.
    pub record_callsites: bool,
}

/// Default grouping key for a record.
///
/// TASK: function name; ACTOR: class name; OBJECT: first path segment of the
/// callsite; NODE: head/worker; WORKER: worker type; JOB: job type;
/// PLACEMENT_GROUP: strategy; RUNTIME_ENV: hosting node.
pub fn default_key(rec: &Record, opts: SummaryOptions) -> GroupKey {
    match rec {
        Record::Task(t) => GroupKey::Key(t.func_or_class_name.clone().unwrap_or_else(|| t.name.clone())),
        Record::Actor(a) => GroupKey::Key(a.class_name.clone()),
        Record::Object(o) => {
            if !opts.record_callsites {
                return GroupKey::Disabled;
            }
            match o.call_site.as_deref().and_then(callsite_segment) {
                Some(seg) => GroupKey::Key(seg.to_string()),
                None => GroupKey::Disabled,
            }
        }
        Record::Node(n) => GroupKey::Key(if n.is_head_node { "head" } else { "worker" }.to_string()),
        other => match other.field(group_field(other.kind())) {
            Some(v) => GroupKey::Key(v),
            None => GroupKey::Disabled,
        },
    }
}

fn group_field(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Worker => "worker_type",
        ResourceKind::Job => "job_type",
        ResourceKind::PlacementGroup => "strategy",
        ResourceKind::RuntimeEnv => "node_id",
        ResourceKind::Task => "func_or_class_name",
        ResourceKind::Actor => "class_name",
        ResourceKind::Object => "call_site",
        ResourceKind::Node => "is_head_node",
    }
}

/// First non-empty `/`-separated segment. Sources that do not record
/// callsites report the literal `disabled`.
fn callsite_segment(cs: &str) -> Option<&str> {
    let cs = cs.trim();
    if cs.is_empty() || cs == UNRECORDED_CALLSITE {
        return None;
    }
    cs.split('/').map(str::trim).find(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default)]
struct GroupAcc {
    by_state: FxHashMap<&'static str, usize>,
    total: usize,
    bytes: u64,
}

impl GroupAcc {
    fn merge(&mut self, other: GroupAcc) {
        for (s, c) in other.by_state {
            *self.by_state.entry(s).or_default() += c;
        }
        self.total += other.total;
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupSummary {
    pub key: String,
    pub count_by_state: BTreeMap<String, usize>,
    pub total: usize,
    /// OBJECT only: summed `object_size`, unknown sizes counted as zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub kind: ResourceKind,
    /// Ordered by key.
    pub groups: Vec<GroupSummary>,
    pub count_by_state: BTreeMap<String, usize>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// At least one record landed in the disabled bucket.
    pub grouping_disabled: bool,
    pub truncated: bool,
    pub warnings: Vec<String>,
}

impl Summary {
    pub fn group(&self, key: &str) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.key == key)
    }
}

#[derive(Debug, Clone)]
pub struct SummaryAccumulator {
    kind: ResourceKind,
    groups: FxHashMap<GroupKey, GroupAcc>,
}

impl SummaryAccumulator {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, groups: FxHashMap::default() }
    }

    pub fn accumulate(&mut self, rec: &Record, key: GroupKey) {
        let g = self.groups.entry(key).or_default();
        *g.by_state.entry(rec.state()).or_default() += 1;
        g.total += 1;
        if let Record::Object(o) = rec {
            g.bytes += o.object_size.unwrap_or(0);
        }
    }

    pub fn merge(&mut self, other: SummaryAccumulator) {
        for (k, acc) in other.groups {
            self.groups.entry(k).or_default().merge(acc);
        }
    }

    pub fn finalize(self) -> Summary {
        let with_bytes = self.kind == ResourceKind::Object;
        let grouping_disabled = self.groups.contains_key(&GroupKey::Disabled);
        let mut count_by_state: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;
        let mut total_bytes = 0u64;
        let mut groups: Vec<GroupSummary> = Vec::with_capacity(self.groups.len());
        for (k, acc) in self.groups {
            let mut by_state = BTreeMap::new();
            for (s, c) in acc.by_state {
                by_state.insert(s.to_string(), c);
                *count_by_state.entry(s.to_string()).or_default() += c;
            }
            total += acc.total;
            total_bytes += acc.bytes;
            groups.push(GroupSummary {
                key: k.as_str().to_string(),
                count_by_state: by_state,
                total: acc.total,
                total_bytes: with_bytes.then_some(acc.bytes),
            });
        }
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        metrics::counter!("summary_groups_total", groups.len() as u64, "kind" => self.kind.as_str());
        Summary {
            kind: self.kind,
            groups,
            count_by_state,
            total,
            total_bytes: with_bytes.then_some(total_bytes),
            grouping_disabled,
            truncated: false,
            warnings: Vec::new(),
        }
    }
}

/// Summarize with a caller-supplied key function.
pub fn summarize_by<F>(kind: ResourceKind, records: &[Record], key_fn: F) -> Summary
where
    F: Fn(&Record) -> GroupKey,
{
    let mut acc = SummaryAccumulator::new(kind);
    for r in records {
        acc.accumulate(r, key_fn(r));
    }
    acc.finalize()
}

/// Summarize a snapshot with the default per-kind key, carrying its warnings
/// and truncation flag.
pub fn summarize(snapshot: &Snapshot, opts: SummaryOptions) -> Summary {
    let mut s = summarize_by(snapshot.kind, &snapshot.records, |r| default_key(r, opts));
    s.truncated = snapshot.truncated;
    s.warnings = snapshot.warnings.clone();
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_core::record::{Object, ReferenceType, Task, TaskState, TaskType};

    fn task(id: &str, name: &str, func: Option<&str>, state: TaskState) -> Record {
        Record::Task(Task {
            task_id: id.into(),
            name: name.into(),
            func_or_class_name: func.map(str::to_string),
            task_type: TaskType::NormalTask,
            state,
            job_id: None,
            actor_id: None,
            node_id: None,
            worker_id: None,
            details: None,
        })
    }

    fn object(id: &str, cs: Option<&str>, size: Option<u64>) -> Record {
        Record::Object(Object {
            object_id: id.into(),
            call_site: cs.map(str::to_string),
            object_size: size,
            reference_type: ReferenceType::LocalReference,
            task_status: TaskState::Finished,
            node_id: None,
            ip: None,
            pid: None,
            details: None,
        })
    }

    fn snap(kind: ResourceKind, records: Vec<Record>) -> Snapshot {
        Snapshot { kind, total: records.len(), records, truncated: false, warnings: Vec::new(), complete: true }
    }

    #[test]
    fn two_tasks_two_groups() {
        let s = summarize(
            &snap(
                ResourceKind::Task,
                vec![task("t1", "f", None, TaskState::Running), task("t2", "g", None, TaskState::Finished)],
            ),
            SummaryOptions::default(),
        );
        assert_eq!(s.groups.len(), 2);
        assert_eq!(s.total, 2);
        let f = s.group("f").unwrap();
        assert_eq!(f.total, 1);
        assert_eq!(f.count_by_state.get("RUNNING"), Some(&1));
        let g = s.group("g").unwrap();
        assert_eq!(g.count_by_state.get("FINISHED"), Some(&1));
        assert!(!s.grouping_disabled);
    }

    #[test]
    fn task_key_prefers_qualified_name() {
        let r = task("t1", "f", Some("mod.Class.f"), TaskState::Running);
        assert_eq!(default_key(&r, SummaryOptions::default()), GroupKey::Key("mod.Class.f".into()));
    }

    #[test]
    fn objects_fall_back_to_disabled_bucket() {
        let records = vec![object("o1", Some("/app/train.py:10"), Some(10)), object("o2", None, Some(5))];
        let s = summarize(&snap(ResourceKind::Object, records.clone()), SummaryOptions { record_callsites: true });
        assert!(s.grouping_disabled);
        assert_eq!(s.group("app").map(|g| g.total), Some(1));
        assert_eq!(s.group(DISABLED_KEY).map(|g| g.total_bytes), Some(Some(5)));
        assert_eq!(s.total_bytes, Some(15));

        let s = summarize(&snap(ResourceKind::Object, records), SummaryOptions { record_callsites: false });
        assert_eq!(s.groups.len(), 1);
        assert_eq!(s.groups[0].key, DISABLED_KEY);
        assert_eq!(s.groups[0].total, 2);
        assert!(s.grouping_disabled);
    }

    #[test]
    fn function_named_disabled_is_its_own_group() {
        let mut acc = SummaryAccumulator::new(ResourceKind::Task);
        let named = task("t1", "disabled", None, TaskState::Running);
        let unnamed = task("t2", "g", None, TaskState::Finished);
        acc.accumulate(&named, default_key(&named, SummaryOptions::default()));
        acc.accumulate(&unnamed, GroupKey::Disabled);
        let s = acc.finalize();
        assert_eq!(s.groups.len(), 2);
        assert_eq!(s.group("disabled").map(|g| g.total), Some(1));
        assert_eq!(s.group(DISABLED_KEY).map(|g| g.total), Some(1));
        assert!(s.grouping_disabled);
    }

    #[test]
    fn merge_is_order_independent() {
        let a = vec![task("t1", "f", None, TaskState::Running), task("t2", "f", None, TaskState::Failed)];
        let b = vec![task("t3", "g", None, TaskState::Running)];
        let build = |first: &[Record], second: &[Record]| {
            let mut x = SummaryAccumulator::new(ResourceKind::Task);
            for r in first {
                x.accumulate(r, default_key(r, SummaryOptions::default()));
            }
            let mut y = SummaryAccumulator::new(ResourceKind::Task);
            for r in second {
                y.accumulate(r, default_key(r, SummaryOptions::default()));
            }
            x.merge(y);
            x.finalize()
        };
        assert_eq!(build(&a, &b), build(&b, &a));
        let s = build(&a, &b);
        assert_eq!(s.count_by_state.get("RUNNING"), Some(&2));
        assert_eq!(s.total, 3);
    }

    #[test]
    fn summary_carries_snapshot_warnings() {
        let mut sn = snap(ResourceKind::Task, vec![task("t1", "f", None, TaskState::Running)]);
        sn.truncated = true;
        sn.warnings = vec!["source n2: timed out".into()];
        let s = summarize(&sn, SummaryOptions::default());
        assert!(s.truncated);
        assert_eq!(s.warnings, sn.warnings);
        assert_eq!(s.total_bytes, None);
    }
}
