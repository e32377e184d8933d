//! Source registry: which data sources and log agents are currently joined.
//!
//! Read-mostly. Joins and leaves swap the whole entry list atomically; a
//! query loads one immutable snapshot and never sees a half-applied change.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use scry_core::{ResourceKind, Scope};
use tracing::info;

use crate::{DataSource, LogAgent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRole {
    /// Central source for cluster-wide kinds.
    Coordinator,
    Machine { node_id: String, address: String },
}

#[derive(Clone)]
pub struct SourceEntry {
    pub id: String,
    pub role: SourceRole,
    pub source: Arc<dyn DataSource>,
    pub log_agent: Option<Arc<dyn LogAgent>>,
}

impl fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEntry")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("has_log_agent", &self.log_agent.is_some())
            .finish()
    }
}

impl SourceEntry {
    pub fn coordinator(id: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        Self { id: id.into(), role: SourceRole::Coordinator, source, log_agent: None }
    }

    /// A machine source; its id is the node id.
    pub fn machine(node_id: impl Into<String>, address: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        let node_id = node_id.into();
        Self {
            id: node_id.clone(),
            role: SourceRole::Machine { node_id, address: address.into() },
            source,
            log_agent: None,
        }
    }

    pub fn with_log_agent(mut self, agent: Arc<dyn LogAgent>) -> Self {
        self.log_agent = Some(agent);
        self
    }

    pub fn node_id(&self) -> Option<&str> {
        match &self.role {
            SourceRole::Machine { node_id, .. } => Some(node_id),
            SourceRole::Coordinator => None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match &self.role {
            SourceRole::Machine { address, .. } => Some(address),
            SourceRole::Coordinator => None,
        }
    }

    pub fn is_machine(&self) -> bool {
        matches!(self.role, SourceRole::Machine { .. })
    }
}

pub struct SourceRegistry {
    entries: ArcSwap<Vec<SourceEntry>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { entries: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn snapshot(&self) -> Arc<Vec<SourceEntry>> {
        self.entries.load_full()
    }

    /// Add or replace (by id) a source. Registration order is kept for new ids.
    pub fn join(&self, entry: SourceEntry) {
        let id = entry.id.clone();
        self.entries.rcu(|cur| {
            let mut next: Vec<SourceEntry> = cur.as_ref().clone();
            match next.iter().position(|e| e.id == entry.id) {
                Some(i) => next[i] = entry.clone(),
                None => next.push(entry.clone()),
            }
            next
        });
        info!(source = %id, "registry: joined");
    }

    /// Remove a source. Returns whether it was present.
    pub fn leave(&self, id: &str) -> bool {
        let prev = self.entries.rcu(|cur| cur.iter().filter(|e| e.id != id).cloned().collect::<Vec<_>>());
        let was = prev.iter().any(|e| e.id == id);
        if was {
            info!(source = %id, "registry: left");
        }
        was
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sources to ask for `kind`, in registration order, from one snapshot.
    pub fn targets(&self, kind: ResourceKind) -> Vec<SourceEntry> {
        let snap = self.entries.load();
        match kind.scope() {
            Scope::Cluster => snap.iter().filter(|e| e.role == SourceRole::Coordinator).cloned().collect(),
            Scope::PerMachine => snap.iter().filter(|e| e.is_machine()).cloned().collect(),
        }
    }

    pub fn machines(&self) -> Vec<SourceEntry> {
        self.entries.load().iter().filter(|e| e.is_machine()).cloned().collect()
    }

    pub fn machine_by_node_id(&self, node_id: &str) -> Option<SourceEntry> {
        self.entries.load().iter().find(|e| e.node_id() == Some(node_id)).cloned()
    }

    pub fn machine_by_address(&self, address: &str) -> Option<SourceEntry> {
        self.entries.load().iter().find(|e| e.address() == Some(address)).cloned()
    }
}
