//! Typed records, one struct per resource kind, behind a closed `Record` enum.
//!
//! Every variant exposes the same envelope: `id`, `kind`, `state`,
//! `detail_level` and `field(name)`. `field` coerces values to their string
//! form so predicates compare state, numeric and enum fields uniformly.
//! Ids are issued by the owning source and never change; everything else is
//! a point-in-time copy that may already be stale when read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DetailLevel, ResourceKind};

/// Extra fields filled by the detail pass.
pub type Details = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorState {
    DependenciesUnready,
    PendingCreation,
    Alive,
    Restarting,
    Dead,
}

impl ActorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorState::DependenciesUnready => "DEPENDENCIES_UNREADY",
            ActorState::PendingCreation => "PENDING_CREATION",
            ActorState::Alive => "ALIVE",
            ActorState::Restarting => "RESTARTING",
            ActorState::Dead => "DEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Nil,
    PendingArgsAvail,
    PendingNodeAssignment,
    SubmittedToWorker,
    Running,
    Finished,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Nil => "NIL",
            TaskState::PendingArgsAvail => "PENDING_ARGS_AVAIL",
            TaskState::PendingNodeAssignment => "PENDING_NODE_ASSIGNMENT",
            TaskState::SubmittedToWorker => "SUBMITTED_TO_WORKER",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Alive,
    Dead,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Alive => "ALIVE",
            NodeState::Dead => "DEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Stopped,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementGroupState {
    Pending,
    Created,
    Removed,
    Rescheduling,
}

impl PlacementGroupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementGroupState::Pending => "PENDING",
            PlacementGroupState::Created => "CREATED",
            PlacementGroupState::Removed => "REMOVED",
            PlacementGroupState::Rescheduling => "RESCHEDULING",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    NormalTask,
    ActorCreationTask,
    ActorTask,
    DriverTask,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerType {
    Worker,
    Driver,
    SpillWorker,
    RestoreWorker,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Submission,
    Driver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStrategy {
    Pack,
    Spread,
    StrictPack,
    StrictSpread,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    LocalReference,
    UsedByPendingTask,
    Captured,
    ActorHandle,
    PinnedInMemory,
}

/// Render any serializable value the way predicates see it: strings as-is,
/// numbers and booleans via their literal form, composites as compact JSON.
/// `null` is treated as absent.
pub fn coerce<T: Serialize>(v: &T) -> Option<String> {
    match serde_json::to_value(v).ok()? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn some(s: &str) -> Option<String> {
    Some(s.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub actor_id: String,
    pub class_name: String,
    pub name: Option<String>,
    pub job_id: Option<String>,
    pub state: ActorState,
    pub node_id: Option<String>,
    pub worker_id: Option<String>,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Actor {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "actor_id" => some(&self.actor_id),
            "class_name" => some(&self.class_name),
            "name" => self.name.clone(),
            "job_id" => self.job_id.clone(),
            "state" => some(self.state.as_str()),
            "node_id" => self.node_id.clone(),
            "worker_id" => self.worker_id.clone(),
            "pid" => self.pid.map(|p| p.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    /// Function name as submitted.
    pub name: String,
    pub func_or_class_name: Option<String>,
    pub task_type: TaskType,
    pub state: TaskState,
    pub job_id: Option<String>,
    pub actor_id: Option<String>,
    pub node_id: Option<String>,
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Task {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "task_id" => some(&self.task_id),
            "name" => some(&self.name),
            "func_or_class_name" => self.func_or_class_name.clone(),
            "task_type" | "type" => coerce(&self.task_type),
            "state" => some(self.state.as_str()),
            "job_id" => self.job_id.clone(),
            "actor_id" => self.actor_id.clone(),
            "node_id" => self.node_id.clone(),
            "worker_id" => self.worker_id.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Object {
    pub object_id: String,
    /// Creation callsite; absent when the owning source does not record them.
    pub call_site: Option<String>,
    pub object_size: Option<u64>,
    pub reference_type: ReferenceType,
    pub task_status: TaskState,
    pub node_id: Option<String>,
    pub ip: Option<String>,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Object {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "object_id" => some(&self.object_id),
            "call_site" => self.call_site.clone(),
            "object_size" => self.object_size.map(|s| s.to_string()),
            "reference_type" => coerce(&self.reference_type),
            "task_status" => some(self.task_status.as_str()),
            "node_id" => self.node_id.clone(),
            "ip" => self.ip.clone(),
            "pid" => self.pid.map(|p| p.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub node_id: String,
    pub node_ip: String,
    pub node_name: Option<String>,
    #[serde(default)]
    pub is_head_node: bool,
    pub state: NodeState,
    #[serde(default)]
    pub resources_total: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Node {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "node_id" => some(&self.node_id),
            "node_ip" => some(&self.node_ip),
            "node_name" => self.node_name.clone(),
            "is_head_node" => Some(self.is_head_node.to_string()),
            "state" => some(self.state.as_str()),
            "resources_total" => coerce(&self.resources_total),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub worker_id: String,
    pub worker_type: WorkerType,
    pub is_alive: bool,
    pub node_id: Option<String>,
    pub ip: Option<String>,
    pub pid: Option<u32>,
    pub exit_type: Option<String>,
    pub exit_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Worker {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "worker_id" => some(&self.worker_id),
            "worker_type" => coerce(&self.worker_type),
            "is_alive" => Some(self.is_alive.to_string()),
            "node_id" => self.node_id.clone(),
            "ip" => self.ip.clone(),
            "pid" => self.pid.map(|p| p.to_string()),
            "exit_type" => self.exit_type.clone(),
            "exit_detail" => self.exit_detail.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub submission_id: Option<String>,
    pub job_type: JobType,
    pub entrypoint: Option<String>,
    pub status: JobStatus,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl Job {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "job_id" => some(&self.job_id),
            "submission_id" => self.submission_id.clone(),
            "job_type" | "type" => coerce(&self.job_type),
            "entrypoint" => self.entrypoint.clone(),
            "status" | "state" => some(self.status.as_str()),
            "start_time_ms" => self.start_time_ms.map(|t| t.to_string()),
            "end_time_ms" => self.end_time_ms.map(|t| t.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementGroup {
    pub placement_group_id: String,
    pub name: Option<String>,
    pub creator_job_id: Option<String>,
    pub strategy: PlacementStrategy,
    pub state: PlacementGroupState,
    #[serde(default)]
    pub bundles: Vec<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl PlacementGroup {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "placement_group_id" => some(&self.placement_group_id),
            "name" => self.name.clone(),
            "creator_job_id" => self.creator_job_id.clone(),
            "strategy" => coerce(&self.strategy),
            "state" => some(self.state.as_str()),
            "bundles" => coerce(&self.bundles),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeEnv {
    pub runtime_env_id: String,
    /// Serialized environment description.
    pub runtime_env: String,
    pub node_id: Option<String>,
    pub success: bool,
    pub creation_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl RuntimeEnv {
    fn field(&self, name: &str) -> Option<String> {
        match name {
            "runtime_env_id" => some(&self.runtime_env_id),
            "runtime_env" => some(&self.runtime_env),
            "node_id" => self.node_id.clone(),
            "success" => Some(self.success.to_string()),
            "creation_time_ms" => self.creation_time_ms.map(|t| t.to_string()),
            _ => None,
        }
    }
}

/// Closed set of resource records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "resource_kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    Actor(Actor),
    Task(Task),
    Object(Object),
    Node(Node),
    Worker(Worker),
    Job(Job),
    PlacementGroup(PlacementGroup),
    RuntimeEnv(RuntimeEnv),
}

impl Record {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Record::Actor(_) => ResourceKind::Actor,
            Record::Task(_) => ResourceKind::Task,
            Record::Object(_) => ResourceKind::Object,
            Record::Node(_) => ResourceKind::Node,
            Record::Worker(_) => ResourceKind::Worker,
            Record::Job(_) => ResourceKind::Job,
            Record::PlacementGroup(_) => ResourceKind::PlacementGroup,
            Record::RuntimeEnv(_) => ResourceKind::RuntimeEnv,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Actor(r) => &r.actor_id,
            Record::Task(r) => &r.task_id,
            Record::Object(r) => &r.object_id,
            Record::Node(r) => &r.node_id,
            Record::Worker(r) => &r.worker_id,
            Record::Job(r) => &r.job_id,
            Record::PlacementGroup(r) => &r.placement_group_id,
            Record::RuntimeEnv(r) => &r.runtime_env_id,
        }
    }

    /// Current lifecycle state as its wire name.
    pub fn state(&self) -> &'static str {
        match self {
            Record::Actor(r) => r.state.as_str(),
            Record::Task(r) => r.state.as_str(),
            Record::Object(r) => r.task_status.as_str(),
            Record::Node(r) => r.state.as_str(),
            Record::Worker(r) => if r.is_alive { "ALIVE" } else { "DEAD" },
            Record::Job(r) => r.status.as_str(),
            Record::PlacementGroup(r) => r.state.as_str(),
            Record::RuntimeEnv(r) => if r.success { "CREATED" } else { "FAILED" },
        }
    }

    /// Machine the record lives on, when the kind carries one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Record::Actor(r) => r.node_id.as_deref(),
            Record::Task(r) => r.node_id.as_deref(),
            Record::Object(r) => r.node_id.as_deref(),
            Record::Node(r) => Some(&r.node_id),
            Record::Worker(r) => r.node_id.as_deref(),
            Record::Job(_) | Record::PlacementGroup(_) => None,
            Record::RuntimeEnv(r) => r.node_id.as_deref(),
        }
    }

    pub fn details(&self) -> Option<&Details> {
        match self {
            Record::Actor(r) => r.details.as_ref(),
            Record::Task(r) => r.details.as_ref(),
            Record::Object(r) => r.details.as_ref(),
            Record::Node(r) => r.details.as_ref(),
            Record::Worker(r) => r.details.as_ref(),
            Record::Job(r) => r.details.as_ref(),
            Record::PlacementGroup(r) => r.details.as_ref(),
            Record::RuntimeEnv(r) => r.details.as_ref(),
        }
    }

    pub fn details_mut(&mut self) -> &mut Option<Details> {
        match self {
            Record::Actor(r) => &mut r.details,
            Record::Task(r) => &mut r.details,
            Record::Object(r) => &mut r.details,
            Record::Node(r) => &mut r.details,
            Record::Worker(r) => &mut r.details,
            Record::Job(r) => &mut r.details,
            Record::PlacementGroup(r) => &mut r.details,
            Record::RuntimeEnv(r) => &mut r.details,
        }
    }

    /// Drop detail fields, back to summary level.
    pub fn into_summary(mut self) -> Self {
        *self.details_mut() = None;
        self
    }

    pub fn detail_level(&self) -> DetailLevel {
        if self.details().is_some() { DetailLevel::Detail } else { DetailLevel::Summary }
    }

    /// Look a field up in the merged metadata + state view, coerced to string.
    /// Unknown names and unset values yield `None`.
    pub fn field(&self, name: &str) -> Option<String> {
        let typed = match self {
            Record::Actor(r) => r.field(name),
            Record::Task(r) => r.field(name),
            Record::Object(r) => r.field(name),
            Record::Node(r) => r.field(name),
            Record::Worker(r) => r.field(name),
            Record::Job(r) => r.field(name),
            Record::PlacementGroup(r) => r.field(name),
            Record::RuntimeEnv(r) => r.field(name),
        };
        if typed.is_some() {
            return typed;
        }
        match name {
            "id" => Some(self.id().to_string()),
            "state" => Some(self.state().to_string()),
            "resource_kind" => Some(self.kind().as_str().to_string()),
            _ => self.details().and_then(|d| d.get(name).cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, name: &str, state: TaskState) -> Record {
        Record::Task(Task {
            task_id: id.into(),
            name: name.into(),
            func_or_class_name: None,
            task_type: TaskType::NormalTask,
            state,
            job_id: Some("01000000".into()),
            actor_id: None,
            node_id: Some("node-1".into()),
            worker_id: None,
            details: None,
        })
    }

    #[test]
    fn fields_coerce_enums_and_numbers() {
        let r = Record::Worker(Worker {
            worker_id: "w1".into(),
            worker_type: WorkerType::SpillWorker,
            is_alive: false,
            node_id: Some("n1".into()),
            ip: None,
            pid: Some(4242),
            exit_type: None,
            exit_detail: None,
            details: None,
        });
        assert_eq!(r.field("worker_type").as_deref(), Some("SPILL_WORKER"));
        assert_eq!(r.field("pid").as_deref(), Some("4242"));
        assert_eq!(r.field("is_alive").as_deref(), Some("false"));
        assert_eq!(r.field("state").as_deref(), Some("DEAD"));
        assert_eq!(r.field("ip"), None);
        assert_eq!(r.field("no_such_field"), None);
    }

    #[test]
    fn details_extend_field_lookup() {
        let mut r = task("t1", "f", TaskState::Running);
        assert_eq!(r.detail_level(), DetailLevel::Summary);
        assert_eq!(r.field("error_message"), None);
        if let Record::Task(t) = &mut r {
            let mut d = Details::new();
            d.insert("error_message".into(), "boom".into());
            t.details = Some(d);
        }
        assert_eq!(r.detail_level(), DetailLevel::Detail);
        assert_eq!(r.field("error_message").as_deref(), Some("boom"));
        // typed fields still win over the details map
        assert_eq!(r.field("state").as_deref(), Some("RUNNING"));
    }

    #[test]
    fn envelope_is_uniform() {
        let r = task("t9", "train", TaskState::Finished);
        assert_eq!(r.id(), "t9");
        assert_eq!(r.kind(), ResourceKind::Task);
        assert_eq!(r.state(), "FINISHED");
        assert_eq!(r.node_id(), Some("node-1"));
        assert_eq!(r.field("id").as_deref(), Some("t9"));
        assert_eq!(r.field("resource_kind").as_deref(), Some("TASK"));
    }

    #[test]
    fn records_deserialize_with_kind_tag() {
        let yaml = r#"
- resource_kind: JOB
  job_id: "02000000"
  job_type: SUBMISSION
  entrypoint: python train.py
  status: RUNNING
- resource_kind: PLACEMENT_GROUP
  placement_group_id: pg-1
  strategy: STRICT_SPREAD
  state: CREATED
  bundles:
    - { CPU: 1.0 }
"#;
        let recs: Vec<Record> = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].kind(), ResourceKind::Job);
        assert_eq!(recs[0].state(), "RUNNING");
        assert_eq!(recs[1].field("strategy").as_deref(), Some("STRICT_SPREAD"));
        assert_eq!(recs[1].field("bundles").as_deref(), Some(r#"[{"CPU":1.0}]"#));
    }
}
