use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use scry_api::{ClusterManifest, InProcApi, Settings, StateApi};
use scry_core::columns::{columns_for, project_row, ColumnSpec};
use scry_core::{Record, ResourceKind, Snapshot};
use scry_logs::{LogLine, LogOptions, LogSelector, LogTarget, NodeRef, OutputStream, StreamHandle, StreamPhase};
use scry_store::Summary;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scryctl", version, about = "Inspect cluster state and logs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Cluster manifest (YAML) describing sources and log locations
    #[arg(long = "cluster", env = "SCRY_CLUSTER", global = true)]
    cluster: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Group records by their natural key and count them by state
    Summary {
        /// Resource kind, e.g. tasks, actors, objects
        kind: String,
        /// Predicate `field=value` or `field!=value`; repeatable, ANDed
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
    },
    /// List records of a kind across every source that owns them
    List {
        kind: String,
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        /// Maximum records returned (default: SCRY_MAX_RECORDS)
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Fetch per-record detail fields
        #[arg(long = "detail", action = ArgAction::SetTrue)]
        detail: bool,
    },
    /// Fetch one record by id at detail level
    Get { kind: String, id: String },
    /// List, read or follow log files
    #[command(subcommand)]
    Logs(LogsCommand),
}

#[derive(Args, Debug, Clone)]
struct NodeArgs {
    /// Machine node id
    #[arg(long = "node-id", conflicts_with = "node_ip")]
    node_id: Option<String>,
    /// Machine address
    #[arg(long = "node-ip")]
    node_ip: Option<String>,
}

impl NodeArgs {
    fn node_ref(&self) -> Option<NodeRef> {
        match (&self.node_id, &self.node_ip) {
            (Some(id), _) => Some(NodeRef::Id(id.clone())),
            (None, Some(ip)) => Some(NodeRef::Ip(ip.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ReadArgs {
    /// Keep streaming appended lines until interrupted
    #[arg(long = "follow", action = ArgAction::SetTrue)]
    follow: bool,
    /// Show only the last N lines first (default: SCRY_LOG_TAIL)
    #[arg(long = "tail", conflicts_with = "all")]
    tail: Option<usize>,
    /// Read the whole file
    #[arg(long = "all", action = ArgAction::SetTrue)]
    all: bool,
}

impl ReadArgs {
    fn options(&self, settings: &Settings) -> LogOptions {
        let tail_lines = if self.all { None } else { Some(self.tail.unwrap_or(settings.log_tail)) };
        LogOptions { follow: self.follow, tail_lines }
    }
}

#[derive(Subcommand, Debug)]
enum LogsCommand {
    /// Log files on one or all machines; a glob matching a single file prints it
    Cluster {
        /// Shell-style file pattern, e.g. `raylet*`
        glob: Option<String>,
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Output of the worker hosting an actor
    Actor {
        #[arg(long = "id")]
        id: String,
        /// Read stderr instead of stdout
        #[arg(long = "err", action = ArgAction::SetTrue)]
        err: bool,
        #[command(flatten)]
        read: ReadArgs,
    },
    /// Output of a worker process by pid
    Worker {
        #[arg(long = "pid")]
        pid: u32,
        #[arg(long = "err", action = ArgAction::SetTrue)]
        err: bool,
        #[command(flatten)]
        node: NodeArgs,
        #[command(flatten)]
        read: ReadArgs,
    },
}

fn init_tracing() {
    let env = std::env::var("SCRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics(settings: &Settings) {
    if let Some(addr) = settings.metrics_addr.as_deref() {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SCRY_METRICS_ADDR; expected host:port");
        }
    }
}

fn stream_of(err: bool) -> OutputStream {
    if err {
        OutputStream::Stderr
    } else {
        OutputStream::Stdout
    }
}

fn print_structured<T: serde::Serialize>(output: Output, v: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(v)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(v)?),
        Output::Human => {}
    }
    Ok(())
}

fn print_warnings(warnings: &[String]) {
    for w in warnings {
        eprintln!("warning: {}", w);
    }
}

/// Millisecond epoch timestamps render as local time.
fn render_ts(ms: &str) -> String {
    ms.parse::<i64>()
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn table_columns(kind: ResourceKind) -> Vec<ColumnSpec> {
    let mut cols = columns_for(kind);
    if kind == ResourceKind::Job {
        cols.push(ColumnSpec { field: "start_time_ms", label: "STARTED", width: 20 });
        cols.push(ColumnSpec { field: "end_time_ms", label: "ENDED", width: 20 });
    }
    cols
}

fn render_row(rec: &Record, cols: &[ColumnSpec]) -> String {
    let cells = project_row(rec, cols);
    let mut line = String::new();
    for (c, cell) in cols.iter().zip(cells) {
        let cell = if c.field.ends_with("_time_ms") { render_ts(&cell) } else { cell };
        line.push_str(&format!("{:<w$} ", cell, w = c.width));
    }
    line.trim_end().to_string()
}

fn print_table(snap: &Snapshot) {
    let cols = table_columns(snap.kind);
    let header: String = cols.iter().map(|c| format!("{:<w$} ", c.label, w = c.width)).collect();
    println!("{}", header.trim_end());
    for rec in &snap.records {
        println!("{}", render_row(rec, &cols));
    }
}

fn print_record(rec: &Record) {
    let cols = table_columns(rec.kind());
    for (c, cell) in cols.iter().zip(project_row(rec, &cols)) {
        let cell = if c.field.ends_with("_time_ms") { render_ts(&cell) } else { cell };
        println!("{:<14} {}", c.label, cell);
    }
    if let Some(details) = rec.details() {
        for (k, v) in details {
            println!("{:<14} {}", k, v);
        }
    }
}

fn print_summary(s: &Summary) {
    let states: Vec<&String> = s.count_by_state.keys().collect();
    let mut header = format!("{:<40} {:>8}", "KEY", "TOTAL");
    for st in &states {
        header.push_str(&format!(" {:>12}", st));
    }
    if s.total_bytes.is_some() {
        header.push_str(&format!(" {:>14}", "BYTES"));
    }
    println!("{}", header);
    for g in &s.groups {
        let mut line = format!("{:<40} {:>8}", g.key, g.total);
        for st in &states {
            line.push_str(&format!(" {:>12}", g.count_by_state.get(*st).copied().unwrap_or(0)));
        }
        if let Some(b) = g.total_bytes {
            line.push_str(&format!(" {:>14}", b));
        }
        println!("{}", line);
    }
    println!("total: {} {} in {} group(s)", s.total, s.kind, s.groups.len());
    if s.grouping_disabled {
        eprintln!("note: callsite grouping is disabled; set SCRY_RECORD_CALLSITES=1 to enable");
    }
}

fn print_targets(targets: &[LogTarget]) {
    let mut current: Option<&str> = None;
    for t in targets {
        if current != Some(t.node_id.as_str()) {
            println!("=== node {} ({}) ===", t.node_id, if t.address.is_empty() { "-" } else { t.address.as_str() });
            current = Some(t.node_id.as_str());
        }
        println!("  {}", t.filename);
    }
}

/// Print lines until the stream ends or Ctrl-C, then report how it ended.
async fn drain(h: StreamHandle<LogLine>, output: Output) -> Result<()> {
    let StreamHandle { id, mut rx, cancel, mut state } = h;
    let mut cancel = Some(cancel);
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(l) => match output {
                    Output::Human => println!("{}", l.line),
                    _ => println!("{}", serde_json::to_string(&l)?),
                },
                None => break,
            },
            _ = signal::ctrl_c(), if cancel.is_some() => {
                info!(stream = %id, "Ctrl-C received; cancelling log stream");
                if let Some(c) = cancel.take() {
                    c.cancel();
                }
            }
        }
    }
    match scry_logs::wait_terminal(&mut state).await {
        StreamPhase::Error(e) => Err(anyhow::anyhow!("log stream failed: {}", e)),
        phase => {
            info!(stream = %id, ?phase, "log stream ended");
            Ok(())
        }
    }
}

fn load_api(cluster: Option<PathBuf>, settings: Settings) -> Result<InProcApi> {
    let path = cluster.context("no cluster manifest; pass --cluster or set SCRY_CLUSTER")?;
    let manifest = ClusterManifest::load(&path)?;
    Ok(InProcApi::new(manifest.build_registry(), settings))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let settings = Settings::from_env();
    init_metrics(&settings);
    let cli = Cli::parse();
    let api = load_api(cli.cluster.clone(), settings)?;

    match cli.command {
        Commands::Summary { kind, filters } => {
            let kind = ResourceKind::from_str(&kind)?;
            let filters = scry_filter::parse_filters(&filters)?;
            info!(kind = %kind, filters = filters.len(), "summary invoked");
            let s = api.summarize(kind, filters).await?;
            match cli.output {
                Output::Human => print_summary(&s),
                o => print_structured(o, &s)?,
            }
            print_warnings(&s.warnings);
        }
        Commands::List { kind, filters, limit, detail } => {
            let kind = ResourceKind::from_str(&kind)?;
            let mut q = api.query(kind).filters(scry_filter::parse_filters(&filters)?).detail(detail);
            if let Some(l) = limit {
                q = q.limit(l);
            }
            info!(kind = %kind, limit = q.limit, detail, "list invoked");
            let snap = api.list(q).await?;
            match cli.output {
                Output::Human => print_table(&snap),
                o => print_structured(o, &snap)?,
            }
            if !snap.complete {
                warn!(kind = %kind, "partial result");
            }
            print_warnings(&snap.warnings);
        }
        Commands::Get { kind, id } => {
            let kind = ResourceKind::from_str(&kind)?;
            info!(kind = %kind, id = %id, "get invoked");
            let got = api.get(kind, &id).await?;
            match cli.output {
                Output::Human => print_record(&got.record),
                o => print_structured(o, &got.record)?,
            }
            print_warnings(&got.warnings);
        }
        Commands::Logs(cmd) => {
            let settings = api.settings().clone();
            match cmd {
                LogsCommand::Cluster { glob, node, read } => {
                    let sel = LogSelector::Node { node: node.node_ref(), glob: glob.clone() };
                    let targets = api.list_logs(sel).await?;
                    match (&glob, targets.as_slice()) {
                        (Some(_), [single]) => {
                            let sel = LogSelector::File {
                                node: NodeRef::Id(single.node_id.clone()),
                                filename: single.filename.clone(),
                            };
                            let h = api.stream_logs(sel, read.options(&settings)).await?;
                            drain(h, cli.output).await?;
                        }
                        _ => match cli.output {
                            Output::Human => print_targets(&targets),
                            o => print_structured(o, &targets)?,
                        },
                    }
                }
                LogsCommand::Actor { id, err, read } => {
                    let sel = LogSelector::Actor { actor_id: id, stream: stream_of(err) };
                    let h = api.stream_logs(sel, read.options(&settings)).await?;
                    drain(h, cli.output).await?;
                }
                LogsCommand::Worker { pid, err, node, read } => {
                    let sel = LogSelector::Process { pid, node: node.node_ref(), stream: stream_of(err) };
                    let h = api.stream_logs(sel, read.options(&settings)).await?;
                    drain(h, cli.output).await?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_with_filters() {
        let cli = Cli::try_parse_from(["scryctl", "-o", "json", "list", "tasks", "-f", "state=RUNNING", "-f", "name!=f", "--limit", "5"])
            .unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::List { kind, filters, limit, detail } => {
                assert_eq!(kind, "tasks");
                assert_eq!(filters, vec!["state=RUNNING", "name!=f"]);
                assert_eq!(limit, Some(5));
                assert!(!detail);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn logs_read_options() {
        let cli = Cli::try_parse_from(["scryctl", "logs", "actor", "--id", "a1", "--err", "--follow", "--tail", "10"]).unwrap();
        match cli.command {
            Commands::Logs(LogsCommand::Actor { id, err, read }) => {
                assert_eq!(id, "a1");
                assert!(err);
                let o = read.options(&Settings::default());
                assert!(o.follow);
                assert_eq!(o.tail_lines, Some(10));
            }
            other => panic!("unexpected {:?}", other),
        }
        let cli = Cli::try_parse_from(["scryctl", "logs", "worker", "--pid", "7", "--node-ip", "10.0.0.1", "--all"]).unwrap();
        match cli.command {
            Commands::Logs(LogsCommand::Worker { pid, node, read, .. }) => {
                assert_eq!(pid, 7);
                assert_eq!(node.node_ref(), Some(NodeRef::Ip("10.0.0.1".into())));
                assert_eq!(read.options(&Settings::default()).tail_lines, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn job_times_render_or_dash() {
        assert_eq!(render_ts("-"), "-");
        assert_ne!(render_ts("1700000000000"), "-");
    }
}
