//! YAML cluster manifest: describes a coordinator and its machines with the
//! records each owns and where their log files live.
//!
//! ```yaml
//! coordinator:
//!   records:
//!     - { resource_kind: JOB, job_id: "01000000", status: RUNNING, ... }
//! machines:
//!   - node_id: n1
//!     address: 10.0.0.1
//!     log_dir: logs/n1
//!     records: [...]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use scry_core::record::Details;
use scry_core::Record;
use scry_logs::{DirLogAgent, MemoryLogAgent};
use scry_sources::{LogAgent, SourceEntry, SourceRegistry, StaticSource};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_coordinator_id() -> String {
    "coordinator".to_string()
}

/// State held by one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(default)]
    pub records: Vec<Record>,
    /// Ids the source once held but has since garbage-collected.
    #[serde(default)]
    pub reclaimed: Vec<String>,
    /// Extra fields served by the detail pass, keyed by record id.
    #[serde(default)]
    pub details: BTreeMap<String, Details>,
    /// When set, every call to this source fails with this reason.
    #[serde(default)]
    pub unavailable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    #[serde(default = "default_coordinator_id")]
    pub id: String,
    #[serde(flatten)]
    pub state: SourceState,
}

impl Default for CoordinatorSpec {
    fn default() -> Self {
        Self { id: default_coordinator_id(), state: SourceState::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub node_id: String,
    pub address: String,
    #[serde(flatten)]
    pub state: SourceState,
    /// Directory of log files, relative to the manifest.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Inline log files, used when no `log_dir` is given.
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterManifest {
    #[serde(default)]
    pub coordinator: CoordinatorSpec,
    #[serde(default)]
    pub machines: Vec<MachineSpec>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn static_source(id: &str, state: &SourceState) -> StaticSource {
    let mut src = StaticSource::new(id)
        .with_records(state.records.clone())
        .with_reclaimed(state.reclaimed.iter().cloned());
    for (rid, d) in &state.details {
        src = src.with_details(rid.clone(), d.clone());
    }
    if let Some(reason) = &state.unavailable {
        src = src.failing(reason.clone());
    }
    src
}

impl ClusterManifest {
    pub fn from_yaml_str(s: &str) -> anyhow::Result<Self> {
        let m: ClusterManifest = serde_yaml::from_str(s).context("parsing cluster manifest")?;
        m.validate()?;
        Ok(m)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading cluster manifest {}", path.display()))?;
        let mut m = Self::from_yaml_str(&text).with_context(|| format!("in {}", path.display()))?;
        m.base_dir = path.parent().map(Path::to_path_buf);
        Ok(m)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for m in &self.machines {
            anyhow::ensure!(!m.node_id.trim().is_empty(), "machine with empty node_id");
            anyhow::ensure!(seen.insert(m.node_id.as_str()), "duplicate machine node_id {}", m.node_id);
            anyhow::ensure!(m.node_id != self.coordinator.id, "machine node_id {} collides with coordinator id", m.node_id);
        }
        Ok(())
    }

    fn resolve_dir(&self, dir: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir.to_path_buf(),
        }
    }

    /// Build a registry holding one coordinator entry followed by one entry
    /// per machine, in manifest order.
    pub fn build_registry(&self) -> Arc<SourceRegistry> {
        let reg = Arc::new(SourceRegistry::new());
        let coord = &self.coordinator;
        reg.join(SourceEntry::coordinator(coord.id.clone(), Arc::new(static_source(&coord.id, &coord.state))));
        for m in &self.machines {
            let src = Arc::new(static_source(&m.node_id, &m.state));
            let mut entry = SourceEntry::machine(m.node_id.clone(), m.address.clone(), src);
            let agent: Option<Arc<dyn LogAgent>> = match &m.log_dir {
                Some(dir) => Some(Arc::new(DirLogAgent::new(self.resolve_dir(dir)))),
                None if !m.logs.is_empty() => {
                    let mem = m.logs.iter().fold(MemoryLogAgent::new(), |a, (name, body)| a.with_file(name.clone(), body));
                    Some(Arc::new(mem))
                }
                None => None,
            };
            if let Some(agent) = agent {
                entry = entry.with_log_agent(agent);
            }
            reg.join(entry);
        }
        info!(machines = self.machines.len(), "api: registry built from manifest");
        reg
    }
}
