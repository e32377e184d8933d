//! Resolve a log selector to concrete files on concrete machines.
//!
//! Worker output files follow `worker-{worker_id}-{job_id}-{pid}.{out|err}`.
//! Listing may match many files; streaming needs exactly one.

use std::sync::Arc;

use regex::Regex;
use scry_core::{SourceFailure, StateError, StateResult};
use scry_sources::{SourceEntry, SourceRegistry};
use tracing::{debug, warn};

use crate::{LogSelector, LogTarget, NodeRef, OutputStream};

/// Where an actor currently runs, as reported by the state layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorPlacement {
    pub actor_id: String,
    pub node_id: Option<String>,
    pub worker_id: Option<String>,
    pub pid: Option<u32>,
}

#[async_trait::async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn placement(&self, actor_id: &str) -> StateResult<ActorPlacement>;
}

/// Compile a shell-style glob (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(glob: &str) -> StateResult<Regex> {
    let mut pat = String::with_capacity(glob.len() + 8);
    pat.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pat.push_str(".*"),
            '?' => pat.push('.'),
            c => pat.push_str(&regex::escape(&c.to_string())),
        }
    }
    pat.push('$');
    Regex::new(&pat).map_err(|e| StateError::InvalidArgument(format!("bad glob {:?}: {}", glob, e)))
}

pub fn actor_file_glob(worker_id: &str, pid: u32, stream: OutputStream) -> String {
    format!("worker-{}-*-{}.{}", worker_id, pid, stream.extension())
}

pub fn pid_file_glob(pid: u32, stream: OutputStream) -> String {
    format!("worker-*-{}.{}", pid, stream.extension())
}

pub struct LogLocator {
    registry: Arc<SourceRegistry>,
    actors: Arc<dyn ActorDirectory>,
}

impl LogLocator {
    pub fn new(registry: Arc<SourceRegistry>, actors: Arc<dyn ActorDirectory>) -> Self {
        Self { registry, actors }
    }

    fn machine(&self, node: &NodeRef) -> StateResult<SourceEntry> {
        let found = match node {
            NodeRef::Id(id) => self.registry.machine_by_node_id(id),
            NodeRef::Ip(ip) => self.registry.machine_by_address(ip).or_else(|| {
                // addresses may carry a port
                self.registry
                    .machines()
                    .into_iter()
                    .find(|e| e.address().map(|a| a.split(':').next() == Some(ip.as_str())).unwrap_or(false))
            }),
        };
        found.ok_or_else(|| StateError::not_found(format!("machine {}", node_label(node))))
    }

    async fn files_on(entry: &SourceEntry) -> StateResult<Vec<String>> {
        let agent = entry
            .log_agent
            .as_ref()
            .ok_or_else(|| StateError::not_found(format!("log agent on machine {}", entry.id)))?;
        agent
            .list_files()
            .await
            .map_err(|e| StateError::SourceUnavailable { source_id: entry.id.clone(), reason: e.to_string() })
    }

    fn targets(entry: &SourceEntry, files: Vec<String>, re: Option<&Regex>) -> Vec<LogTarget> {
        let node_id = entry.node_id().unwrap_or(&entry.id).to_string();
        let address = entry.address().unwrap_or_default().to_string();
        let mut out: Vec<LogTarget> = files
            .into_iter()
            .filter(|f| re.map(|r| r.is_match(f)).unwrap_or(true))
            .map(|filename| LogTarget { node_id: node_id.clone(), address: address.clone(), filename })
            .collect();
        out.sort();
        out
    }

    /// All files matching the selector, ordered by machine then file name.
    pub async fn locate(&self, sel: &LogSelector) -> StateResult<Vec<LogTarget>> {
        match sel {
            LogSelector::Node { node: Some(node), glob } => {
                let entry = self.machine(node)?;
                let re = glob.as_deref().map(glob_to_regex).transpose()?;
                let files = Self::files_on(&entry).await?;
                Ok(Self::targets(&entry, files, re.as_ref()))
            }
            LogSelector::Node { node: None, glob } => {
                let re = glob.as_deref().map(glob_to_regex).transpose()?;
                let machines = self.registry.machines();
                if machines.is_empty() {
                    return Err(StateError::not_found("any machine with logs"));
                }
                let listed = futures::future::join_all(machines.iter().map(Self::files_on)).await;
                let mut out = Vec::new();
                let mut failures = Vec::new();
                for (entry, res) in machines.iter().zip(listed) {
                    match res {
                        Ok(files) => out.extend(Self::targets(entry, files, re.as_ref())),
                        Err(e) => {
                            warn!(machine = %entry.id, error = %e, "logs: listing failed");
                            failures.push(SourceFailure { source_id: entry.id.clone(), reason: e.to_string() });
                        }
                    }
                }
                if failures.len() == machines.len() {
                    return Err(StateError::AllSourcesFailed { failures });
                }
                Ok(out)
            }
            LogSelector::File { node, filename } => {
                let entry = self.machine(node)?;
                let files = Self::files_on(&entry).await?;
                let hit: Vec<String> = files.into_iter().filter(|f| f == filename).collect();
                Ok(Self::targets(&entry, hit, None))
            }
            LogSelector::Actor { actor_id, stream } => self.locate_actor(actor_id, *stream).await,
            LogSelector::Process { pid, node, stream } => {
                let entry = match node {
                    Some(n) => self.machine(n)?,
                    None => {
                        let machines = self.registry.machines();
                        match machines.len() {
                            0 => return Err(StateError::not_found("any machine with logs")),
                            1 => machines.into_iter().next().ok_or_else(|| StateError::Internal("machine vanished".into()))?,
                            _ => {
                                return Err(StateError::AmbiguousTarget {
                                    selector: format!("pid {}", pid),
                                    matches: machines.into_iter().map(|e| e.id).collect(),
                                })
                            }
                        }
                    }
                };
                let re = glob_to_regex(&pid_file_glob(*pid, *stream))?;
                let files = Self::files_on(&entry).await?;
                Ok(Self::targets(&entry, files, Some(&re)))
            }
        }
    }

    async fn locate_actor(&self, actor_id: &str, stream: OutputStream) -> StateResult<Vec<LogTarget>> {
        let p = self.actors.placement(actor_id).await?;
        debug!(actor = %actor_id, node = ?p.node_id, worker = ?p.worker_id, pid = ?p.pid, "logs: actor placement");
        let what = format!("logs for actor {}", actor_id);
        let (node_id, worker_id, pid) = match (p.node_id, p.worker_id, p.pid) {
            (Some(n), Some(w), Some(pid)) => (n, w, pid),
            _ => return Err(StateError::not_found(format!("{} (actor has no running worker)", what))),
        };
        let entry = self
            .registry
            .machine_by_node_id(&node_id)
            .ok_or_else(|| StateError::not_found(format!("{} (machine {} no longer reachable)", what, node_id)))?;
        let files = Self::files_on(&entry)
            .await
            .map_err(|_| StateError::not_found(format!("{} (machine {} no longer reachable)", what, node_id)))?;
        let re = glob_to_regex(&actor_file_glob(&worker_id, pid, stream))?;
        Ok(Self::targets(&entry, files, Some(&re)))
    }

    /// Exactly one file, for streaming.
    pub async fn resolve_one(&self, sel: &LogSelector) -> StateResult<LogTarget> {
        let mut found = self.locate(sel).await?;
        match found.len() {
            0 => Err(StateError::not_found(format!("log file for {}", selector_label(sel)))),
            1 => Ok(found.remove(0)),
            _ => Err(StateError::AmbiguousTarget {
                selector: selector_label(sel),
                matches: found.into_iter().map(|t| format!("{}:{}", t.node_id, t.filename)).collect(),
            }),
        }
    }
}

fn node_label(n: &NodeRef) -> String {
    match n {
        NodeRef::Id(id) => format!("id={}", id),
        NodeRef::Ip(ip) => format!("ip={}", ip),
    }
}

pub fn selector_label(sel: &LogSelector) -> String {
    match sel {
        LogSelector::Node { node, glob } => format!(
            "node {} glob {}",
            node.as_ref().map(node_label).unwrap_or_else(|| "*".into()),
            glob.as_deref().unwrap_or("*")
        ),
        LogSelector::File { node, filename } => format!("{} on {}", filename, node_label(node)),
        LogSelector::Actor { actor_id, stream } => format!("actor {} ({})", actor_id, stream.extension()),
        LogSelector::Process { pid, node, stream } => format!(
            "pid {} on {} ({})",
            pid,
            node.as_ref().map(node_label).unwrap_or_else(|| "*".into()),
            stream.extension()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_escapes_literals() {
        let re = glob_to_regex("worker-*-42.out").unwrap();
        assert!(re.is_match("worker-abc-01000000-42.out"));
        assert!(!re.is_match("worker-abc-01000000-420.out"));
        assert!(!re.is_match("worker-abc-01000000-42xout"));
        let re = glob_to_regex("raylet.?ut").unwrap();
        assert!(re.is_match("raylet.out"));
        assert!(!re.is_match("raylet.ouut"));
        let re = glob_to_regex("a+b(c)").unwrap();
        assert!(re.is_match("a+b(c)"));
    }

    #[test]
    fn worker_file_globs() {
        assert_eq!(actor_file_glob("ff01", 9, OutputStream::Stderr), "worker-ff01-*-9.err");
        assert_eq!(pid_file_glob(9, OutputStream::Stdout), "worker-*-9.out");
    }
}
