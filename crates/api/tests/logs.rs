use std::time::Duration;

use scry_api::{ClusterManifest, InProcApi, Settings, StateApi};
use scry_core::StateError;
use scry_logs::{wait_terminal, LogOptions, LogSelector, OutputStream, StreamPhase};

const CLUSTER: &str = r#"
coordinator:
  records:
    - resource_kind: ACTOR
      actor_id: a1
      class_name: Counter
      state: ALIVE
      node_id: n1
      worker_id: w1
      pid: 11
    - resource_kind: ACTOR
      actor_id: a2
      class_name: Counter
      state: DEAD
      node_id: n1
      worker_id: w2
      pid: 12
  reclaimed: [a0]
machines:
  - node_id: n1
    address: 10.0.0.1
    logs:
      raylet.out: "raylet up\n"
      worker-w1-01000000-11.out: "count=1\ncount=2\n"
      worker-w1-01000000-11.err: "warn: slow\n"
  - node_id: n2
    address: 10.0.0.2
    logs:
      raylet.out: "raylet up\n"
"#;

fn api() -> InProcApi {
    let m = ClusterManifest::from_yaml_str(CLUSTER).unwrap();
    InProcApi::new(m.build_registry(), Settings { timeout_secs: 2, log_poll_ms: 20, ..Settings::default() })
}

#[tokio::test(flavor = "multi_thread")]
async fn actor_output_streams_from_its_worker_file() {
    let api = api();
    let sel = LogSelector::Actor { actor_id: "a1".into(), stream: OutputStream::Stdout };
    let mut h = api.stream_logs(sel, LogOptions::default()).await.unwrap();
    let mut lines = Vec::new();
    while let Some(l) = tokio::time::timeout(Duration::from_secs(2), h.rx.recv()).await.unwrap() {
        lines.push(l.line);
    }
    assert_eq!(lines, vec!["count=1", "count=2"]);
    assert_eq!(wait_terminal(&mut h.state).await, StreamPhase::Complete);

    let sel = LogSelector::Actor { actor_id: "a1".into(), stream: OutputStream::Stderr };
    let mut h = api.stream_logs(sel, LogOptions::default()).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), h.rx.recv()).await.unwrap();
    assert_eq!(first.map(|l| l.line).as_deref(), Some("warn: slow"));
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_or_unknown_actor_has_no_logs() {
    let api = api();
    let err = api
        .stream_logs(LogSelector::Actor { actor_id: "a2".into(), stream: OutputStream::Stdout }, LogOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);

    let err = api
        .stream_logs(LogSelector::Actor { actor_id: "a0".into(), stream: OutputStream::Stdout }, LogOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_stale(), "{:?}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_listing_spans_machines() {
    let api = api();
    let files = api.list_logs(LogSelector::Node { node: None, glob: Some("raylet*".into()) }).await.unwrap();
    let nodes: Vec<&str> = files.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["n1", "n2"]);

    let err = api
        .stream_logs(LogSelector::Node { node: None, glob: Some("raylet*".into()) }, LogOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::AmbiguousTarget { .. }));
}
