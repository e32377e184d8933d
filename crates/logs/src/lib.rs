//! Scry logs: find text output files on cluster machines and read or follow
//! them. This path bypasses the record model entirely; lines are delivered
//! through a bounded channel owned by a `StreamHandle`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

pub mod agents;
pub mod locate;
pub mod stream;

pub use agents::{DirLogAgent, MemoryLogAgent};
pub use locate::{ActorDirectory, ActorPlacement, LogLocator};
pub use stream::{LogStreamer, StreamSettings};

/// Default number of trailing lines shown before streaming.
pub const DEFAULT_TAIL_LINES: usize = 1000;

/// A single line of log output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Id(String),
    Ip(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "out",
            OutputStream::Stderr => "err",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSelector {
    /// List files on one machine (or every machine), optionally by glob.
    Node { node: Option<NodeRef>, glob: Option<String> },
    /// Exactly one named file on one machine.
    File { node: NodeRef, filename: String },
    /// Output of the worker hosting an actor.
    Actor { actor_id: String, stream: OutputStream },
    /// Output of a worker process by pid.
    Process { pid: u32, node: Option<NodeRef>, stream: OutputStream },
}

/// A resolved file on a specific machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogTarget {
    pub node_id: String,
    pub address: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOptions {
    /// Keep polling for appended content until cancelled.
    pub follow: bool,
    /// Only the last N lines of existing content; `None` reads everything.
    pub tail_lines: Option<usize>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { follow: false, tail_lines: Some(DEFAULT_TAIL_LINES) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPhase {
    Opening,
    Streaming,
    Complete,
    Cancelled,
    Error(String),
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamPhase::Complete | StreamPhase::Cancelled | StreamPhase::Error(_))
    }
}

/// Cancellation handle for an in-flight stream. Dropping it also cancels.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub(crate) fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Result of starting a streaming operation.
pub struct StreamHandle<T> {
    pub id: uuid::Uuid,
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
    pub state: watch::Receiver<StreamPhase>,
}

impl<T> std::fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").field("id", &self.id).field("phase", &*self.state.borrow()).finish_non_exhaustive()
    }
}

impl<T> StreamHandle<T> {
    pub fn phase(&self) -> StreamPhase {
        self.state.borrow().clone()
    }
}

/// Wait until the stream reaches a terminal phase. If the producer is gone
/// without publishing one, the last observed phase is returned.
pub async fn wait_terminal(state: &mut watch::Receiver<StreamPhase>) -> StreamPhase {
    loop {
        let cur = state.borrow_and_update().clone();
        if cur.is_terminal() {
            return cur;
        }
        if state.changed().await.is_err() {
            return state.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_tail_one_thousand() {
        let o = LogOptions::default();
        assert!(!o.follow);
        assert_eq!(o.tail_lines, Some(1000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_terminal_sees_last_phase() {
        let (tx, mut rx) = watch::channel(StreamPhase::Opening);
        let h = tokio::spawn(async move {
            let _ = tx.send(StreamPhase::Streaming);
            let _ = tx.send(StreamPhase::Cancelled);
        });
        assert_eq!(wait_terminal(&mut rx).await, StreamPhase::Cancelled);
        h.await.unwrap();
    }
}
