//! Membership watching and reporting over the in-process coordination store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use harbormaster::config::schema::DiscoverySettings;
use harbormaster::config::Configurable;
use harbormaster::discovery::coordination::CoordinationClient;
use harbormaster::discovery::{ConnectionState, Discovery, MembershipWatcher, MemoryEnsemble};
use harbormaster::topology::{Cluster, Node, Service};
use harbormaster::Plugins;

mod common;

fn settings() -> DiscoverySettings {
    DiscoverySettings {
        hosts: vec!["memory:2181".to_string()],
        path: "/hm".to_string(),
        session_timeout_ms: 10_000,
    }
}

fn watcher(ensemble: &Arc<MemoryEnsemble>) -> Arc<MembershipWatcher> {
    Arc::new(MembershipWatcher::new("memory", Arc::new(ensemble.client()), settings()))
}

fn service(ensemble: &Arc<MemoryEnsemble>) -> Service {
    let plugins = Arc::new(Plugins::builtin(ensemble.clone()));
    Service::from_config(
        "cache",
        &common::raw(json!({
            "discovery": "memory",
            "port": 6379,
            "checks": {
                "interval": 1,
                "tcp": {"query": "PING\n", "response": "PONG", "rise": 1, "fall": 1}
            }
        })),
        &plugins,
    )
    .unwrap()
}

fn start_watch(watcher: &Arc<MembershipWatcher>, cluster: &Arc<Cluster>) -> Arc<Notify> {
    let changed = Arc::new(Notify::new());
    let (w, c, n) = (watcher.clone(), cluster.clone(), changed.clone());
    tokio::spawn(async move { w.start_watching(c, n).await });
    changed
}

#[tokio::test]
async fn test_invalid_child_record_is_skipped() {
    let ensemble = MemoryEnsemble::new();
    let writer = ensemble.client();
    writer.connect(&settings().hosts).await.unwrap();
    writer.create("/hm/web/n1", b"{not json".to_vec(), false, true).await.unwrap();
    let good = Node::new("app2", "10.0.0.2", 8080);
    writer.create("/hm/web/n2", good.serialize().into_bytes(), false, true).await.unwrap();

    let watcher = watcher(&ensemble);
    watcher.connect().await.unwrap();
    let cluster = common::cluster("web", &[]);
    start_watch(&watcher, &cluster);

    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().len() == 1).await);
    let nodes = cluster.nodes();
    assert_eq!(nodes[0].ip, "10.0.0.2");
    assert_eq!(nodes[0].port, 8080);

    watcher.stop().await;
}

#[tokio::test]
async fn test_watch_follows_membership_changes() {
    let ensemble = MemoryEnsemble::new();
    let other = ensemble.client();
    other.connect(&settings().hosts).await.unwrap();
    other.create("/hm/web", Vec::new(), false, true).await.unwrap();

    let watcher = watcher(&ensemble);
    watcher.connect().await.unwrap();
    let cluster = common::cluster("web", &[("stale", "10.9.9.9", 1)]);
    let changed = start_watch(&watcher, &cluster);

    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().is_empty()).await);
    tokio::time::timeout(Duration::from_secs(5), changed.notified()).await.unwrap();

    let node = Node::new("app1", "10.0.0.1", 80);
    other.create(&format!("/hm/web/{}", node.name()), node.serialize().into_bytes(), true, false).await.unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().len() == 1).await);

    other.delete(&format!("/hm/web/{}", node.name())).await.unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().is_empty()).await);

    watcher.stop_watching("web").await;
    assert!(common::wait_until(Duration::from_secs(5), || !watcher.is_watching("web")).await);
    watcher.stop().await;
}

#[tokio::test]
async fn test_watch_rearms_after_session_expiry() {
    let ensemble = MemoryEnsemble::new();
    let client = Arc::new(ensemble.client());
    let watcher = Arc::new(MembershipWatcher::new("memory", client.clone(), settings()));
    watcher.connect().await.unwrap();

    let other = ensemble.client();
    other.connect(&settings().hosts).await.unwrap();
    other.create("/hm/web", Vec::new(), false, true).await.unwrap();

    let cluster = common::cluster("web", &[]);
    start_watch(&watcher, &cluster);
    tokio::time::sleep(Duration::from_millis(100)).await;

    ensemble.expire_session(client.session_id().unwrap());
    assert_eq!(watcher.connection_state(), ConnectionState::Connected);

    let node = Node::new("app1", "10.0.0.1", 80);
    other.create("/hm/web/app1:80", node.serialize().into_bytes(), false, false).await.unwrap();
    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().len() == 1).await);

    watcher.stop().await;
}

#[tokio::test]
async fn test_missing_cluster_path_is_not_an_error() {
    let ensemble = MemoryEnsemble::new();
    let watcher = watcher(&ensemble);
    watcher.connect().await.unwrap();

    let cluster = common::cluster("late", &[("old", "10.0.0.9", 1)]);
    start_watch(&watcher, &cluster);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(watcher.is_watching("late"));
    assert_eq!(cluster.nodes().len(), 1);
    watcher.stop().await;
}

#[tokio::test]
async fn test_report_up_over_stale_session_uses_transaction() {
    let ensemble = MemoryEnsemble::new();
    let service = service(&ensemble);
    let path = format!("/hm/cache/{}", Node::current(6379, &Default::default()).name());

    let previous = watcher(&ensemble);
    previous.connect().await.unwrap();
    previous.report_up(&service, 6379).await.unwrap();
    let (_, old_owner) = ensemble.record(&path).unwrap();
    assert_eq!(ensemble.transactions(), 0);

    // A restarted process with the old session still alive.
    let restarted = watcher(&ensemble);
    restarted.connect().await.unwrap();
    restarted.report_up(&service, 6379).await.unwrap();

    assert_eq!(ensemble.transactions(), 1);
    let (data, owner) = ensemble.record(&path).unwrap();
    assert_ne!(owner, old_owner);
    assert_eq!(Node::deserialize(&data).unwrap().port, 6379);

    // Own record: updated in place.
    restarted.report_up(&service, 6379).await.unwrap();
    assert_eq!(ensemble.transactions(), 1);

    restarted.report_down(&service, 6379).await.unwrap();
    assert!(ensemble.record(&path).is_none());
    restarted.report_down(&service, 6379).await.unwrap();

    previous.stop().await;
    restarted.stop().await;
}

#[tokio::test]
async fn test_report_waits_for_connection() {
    let ensemble = MemoryEnsemble::new();
    let service = Arc::new(service(&ensemble));
    let watcher = watcher(&ensemble);
    assert_eq!(watcher.connection_state(), ConnectionState::Disconnected);

    let (w, s) = (watcher.clone(), service.clone());
    let report = tokio::spawn(async move { w.report_up(&s, 6379).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!report.is_finished());

    watcher.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), report).await.unwrap().unwrap().unwrap();
    watcher.stop().await;
}

#[tokio::test]
async fn test_stop_releases_blocked_reports() {
    let ensemble = MemoryEnsemble::new();
    let service = Arc::new(service(&ensemble));
    let watcher = watcher(&ensemble);

    let (w, s) = (watcher.clone(), service.clone());
    let report = tokio::spawn(async move { w.report_up(&s, 6379).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    watcher.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(5), report).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_base_path_change_rearms_watches() {
    let ensemble = MemoryEnsemble::new();
    let other = ensemble.client();
    other.connect(&settings().hosts).await.unwrap();
    other.create("/hm/web", Vec::new(), false, true).await.unwrap();
    let moved = Node::new("app9", "10.0.0.9", 80);
    other
        .create(&format!("/v2/web/{}", moved.name()), moved.serialize().into_bytes(), false, true)
        .await
        .unwrap();

    let watcher = watcher(&ensemble);
    watcher.connect().await.unwrap();
    let cluster = common::cluster("web", &[("stale", "10.9.9.9", 1)]);
    start_watch(&watcher, &cluster);
    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().is_empty()).await);

    watcher
        .apply_config(&common::raw(json!({"hosts": ["memory:2181"], "path": "/v2"})))
        .unwrap();
    assert_eq!(watcher.base_path(), "/v2");

    assert!(common::wait_until(Duration::from_secs(5), || cluster.nodes().len() == 1).await);
    assert_eq!(cluster.nodes()[0].ip, "10.0.0.9");
    assert!(watcher.is_watching("web"));

    watcher.stop().await;
}
