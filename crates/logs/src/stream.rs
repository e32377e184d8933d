//! Read or follow a single log file through its machine's log agent.
//!
//! Phases: `Opening -> Streaming -> {Complete | Cancelled | Error}`.
//! Existing content is read first; with a tail bound only the last N lines
//! are delivered, preceded by a notice line when lines were skipped. Follow
//! mode then polls from end of file until cancelled or the file or machine
//! goes away. Delivery waits for the reader instead of dropping lines.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use scry_core::{StateError, StateResult};
use scry_sources::{LogAgent, SourceError, SourceRegistry};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{CancelHandle, LogLine, LogOptions, LogTarget, StreamHandle, StreamPhase};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub queue_cap: usize,
    pub chunk_bytes: usize,
    /// Upper bound on a single `read_chunk`; an agent that stays silent
    /// longer ends the stream with a timeout.
    pub read_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            queue_cap: 1024,
            chunk_bytes: 64 * 1024,
            read_timeout: Duration::from_secs(30),
        }
    }
}

pub fn tail_notice(total: usize, shown: usize) -> String {
    format!("[scry] file has {} lines; showing the last {}", total, shown)
}

pub(crate) enum ChunkEvent {
    Data(Bytes),
    /// Reached end of the content that existed when reading started.
    CaughtUp,
}

struct ChunkCursor {
    agent: Arc<dyn LogAgent>,
    registry: Arc<SourceRegistry>,
    node_id: String,
    filename: String,
    offset: u64,
    follow: bool,
    poll: Duration,
    read_timeout: Duration,
    chunk: usize,
    caught_up: bool,
    done: bool,
}

fn machine_gone(node_id: &str) -> SourceError {
    SourceError::Unavailable(format!("machine {} left the cluster", node_id))
}

/// One `read_chunk`, bounded by the read timeout and abandoned early when the
/// machine leaves the registry while the agent is silent.
async fn bounded_read(c: &ChunkCursor) -> Result<Bytes, SourceError> {
    let read = c.agent.read_chunk(&c.filename, c.offset, c.chunk);
    futures::pin_mut!(read);
    let deadline = tokio::time::Instant::now() + c.read_timeout;
    loop {
        tokio::select! {
            res = &mut read => return res,
            _ = tokio::time::sleep_until(deadline) => {
                warn!(node = %c.node_id, file = %c.filename, timeout_ms = %c.read_timeout.as_millis(), "log agent read timed out");
                return Err(SourceError::Timeout);
            }
            _ = tokio::time::sleep(c.poll) => {
                if c.registry.machine_by_node_id(&c.node_id).is_none() {
                    return Err(machine_gone(&c.node_id));
                }
            }
        }
    }
}

/// Chunks of `filename` from offset 0. One-shot ends after `CaughtUp`;
/// follow sleeps `poll` at end of file and keeps reading.
fn chunk_stream(cursor: ChunkCursor) -> impl futures::Stream<Item = Result<ChunkEvent, SourceError>> + Send {
    futures::stream::unfold(cursor, |mut c| async move {
        if c.done {
            return None;
        }
        loop {
            if c.caught_up && c.registry.machine_by_node_id(&c.node_id).is_none() {
                c.done = true;
                let e = machine_gone(&c.node_id);
                return Some((Err(e), c));
            }
            let read = bounded_read(&c).await;
            match read {
                Err(e) => {
                    c.done = true;
                    return Some((Err(e), c));
                }
                Ok(b) if b.is_empty() => {
                    if !c.caught_up {
                        c.caught_up = true;
                        c.done = !c.follow;
                        return Some((Ok(ChunkEvent::CaughtUp), c));
                    }
                    tokio::time::sleep(c.poll).await;
                }
                Ok(b) => {
                    c.offset += b.len() as u64;
                    return Some((Ok(ChunkEvent::Data(b)), c));
                }
            }
        }
    })
}

/// Split complete lines off the front of `buf`. The partial tail stays.
fn drain_lines(buf: &mut BytesMut, out: &mut Vec<String>) {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line = buf.split_to(pos);
        let _ = buf.split_to(1); // drop '\n'
        out.push(String::from_utf8_lossy(&line).into_owned());
    }
}

enum Flow {
    Continue,
    Stop(StreamPhase),
}

async fn deliver(tx: &mpsc::Sender<LogLine>, cancel_rx: &mut oneshot::Receiver<()>, line: String) -> Flow {
    tokio::select! {
        biased;
        _ = cancel_rx => Flow::Stop(StreamPhase::Cancelled),
        sent = tx.send(LogLine { line }) => match sent {
            Ok(()) => {
                metrics::counter!("log_lines_total", 1u64);
                Flow::Continue
            }
            // reader went away
            Err(_) => Flow::Stop(StreamPhase::Cancelled),
        },
    }
}

pub(crate) struct PumpOpts {
    pub follow: bool,
    pub tail: Option<usize>,
}

/// Consume chunk events, split into lines and deliver them. Returns the
/// terminal phase.
pub(crate) async fn pump_lines<S>(
    stream: S,
    tx: mpsc::Sender<LogLine>,
    mut cancel_rx: oneshot::Receiver<()>,
    phase_tx: &watch::Sender<StreamPhase>,
    opts: PumpOpts,
    ctx: &str,
) -> StreamPhase
where
    S: futures::Stream<Item = Result<ChunkEvent, SourceError>>,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    let mut buf = BytesMut::new();
    let mut lines: Vec<String> = Vec::new();
    let mut ring: VecDeque<String> = VecDeque::new();
    let mut seen = 0usize;
    let mut catching_up = true;
    let mut started = false;
    loop {
        let next = tokio::select! {
            _ = &mut cancel_rx => {
                info!(ctx = %ctx, "log stream cancelled");
                return StreamPhase::Cancelled;
            }
            next = stream.next() => next,
        };
        if !started {
            started = true;
            let _ = phase_tx.send(StreamPhase::Streaming);
        }
        let caught_up_now = catching_up && matches!(next, Some(Ok(ChunkEvent::CaughtUp)));
        match next {
            Some(Ok(ChunkEvent::Data(chunk))) => {
                buf.extend_from_slice(&chunk);
                drain_lines(&mut buf, &mut lines);
            }
            Some(Ok(ChunkEvent::CaughtUp)) => {
                if !opts.follow && !buf.is_empty() {
                    lines.push(String::from_utf8_lossy(&buf).into_owned());
                    buf.clear();
                }
            }
            Some(Err(e)) => {
                warn!(ctx = %ctx, error = %e, "log stream error");
                return StreamPhase::Error(e.to_string());
            }
            None => {
                debug!(ctx = %ctx, "log stream reached end");
                return StreamPhase::Complete;
            }
        }

        for line in lines.drain(..) {
            // without a tail bound existing content flows straight through
            if let (true, Some(n)) = (catching_up, opts.tail) {
                seen += 1;
                ring.push_back(line);
                while ring.len() > n {
                    ring.pop_front();
                }
                continue;
            }
            if let Flow::Stop(p) = deliver(&tx, &mut cancel_rx, line).await {
                return p;
            }
        }
        if caught_up_now {
            catching_up = false;
            if seen > ring.len() {
                let notice = tail_notice(seen, ring.len());
                if let Flow::Stop(p) = deliver(&tx, &mut cancel_rx, notice).await {
                    return p;
                }
            }
            while let Some(line) = ring.pop_front() {
                if let Flow::Stop(p) = deliver(&tx, &mut cancel_rx, line).await {
                    return p;
                }
            }
        }
    }
}

pub struct LogStreamer {
    registry: Arc<SourceRegistry>,
    settings: StreamSettings,
}

impl LogStreamer {
    pub fn new(registry: Arc<SourceRegistry>, settings: StreamSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Open `target` and start delivering lines. Fails fast if the machine
    /// or file cannot be found; later failures surface as `StreamPhase::Error`.
    pub async fn open(&self, target: &LogTarget, opts: LogOptions) -> StateResult<StreamHandle<LogLine>> {
        let t0 = Instant::now();
        let entry = self
            .registry
            .machine_by_node_id(&target.node_id)
            .ok_or_else(|| StateError::not_found(format!("machine {}", target.node_id)))?;
        let agent = entry
            .log_agent
            .clone()
            .ok_or_else(|| StateError::not_found(format!("log agent on machine {}", target.node_id)))?;
        let files = agent
            .list_files()
            .await
            .map_err(|e| StateError::SourceUnavailable { source_id: entry.id.clone(), reason: e.to_string() })?;
        if !files.iter().any(|f| f == &target.filename) {
            return Err(StateError::not_found(format!("{} on machine {}", target.filename, target.node_id)));
        }

        let id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel::<LogLine>(self.settings.queue_cap.max(1));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let (phase_tx, phase_rx) = watch::channel(StreamPhase::Opening);
        let cursor = ChunkCursor {
            agent,
            registry: Arc::clone(&self.registry),
            node_id: target.node_id.clone(),
            filename: target.filename.clone(),
            offset: 0,
            follow: opts.follow,
            poll: self.settings.poll_interval,
            read_timeout: self.settings.read_timeout,
            chunk: self.settings.chunk_bytes.max(1),
            caught_up: false,
            done: false,
        };
        let ctx = format!("{}:{}", target.node_id, target.filename);
        let pump = PumpOpts { follow: opts.follow, tail: opts.tail_lines };
        info!(stream = %id, target = %ctx, follow = opts.follow, tail = ?opts.tail_lines, "logs stream starting");
        let mode = if opts.follow { "follow" } else { "oneshot" };
        metrics::counter!("log_streams_total", 1u64, "mode" => mode);
        tokio::spawn(async move {
            let end = pump_lines(chunk_stream(cursor), tx, cancel_rx, &phase_tx, pump, &ctx).await;
            info!(stream = %id, target = %ctx, phase = ?end, took_ms = %t0.elapsed().as_millis(), "logs stream ended");
            let _ = phase_tx.send(end);
        });
        Ok(StreamHandle { id, rx, cancel: CancelHandle::new(cancel_tx), state: phase_rx })
    }
}
