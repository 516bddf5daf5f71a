//! Writer and reporter running together over one coordination store.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use harbormaster::discovery::MemoryEnsemble;
use harbormaster::{Context, Plugins, Reporter, Shutdown, Writer};

mod common;

async fn pong_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"PONG\n").await;
        }
    });
    port
}

fn write_writer_config(dir: &std::path::Path) {
    common::write_config(
        dir,
        "balancers",
        "haproxy",
        &format!(
            "config_file: {}\nsocket_file: {}\npid_file: {}\nbinary: \"true\"\nrestart_interval_ms: 10\n",
            dir.join("haproxy.cfg").display(),
            dir.join("haproxy.sock").display(),
            dir.join("haproxy.pid").display(),
        ),
    );
    common::write_config(dir, "discovery", "memory", "hosts: [\"memory:2181\"]\npath: /hm\n");
    common::write_config(
        dir,
        "clusters",
        "cache",
        "discovery: memory\nhaproxy:\n  port: 16379\n  backend:\n    - mode tcp\n",
    );
}

fn service_config(port: u16) -> String {
    format!(
        "discovery: memory\nhost: 127.0.0.1\nport: {}\nchecks:\n  interval: 0.2\n  tcp:\n    query: \"PING\\n\"\n    response: PONG\n    rise: 1\n    fall: 1\n",
        port
    )
}

fn generated(dir: &std::path::Path) -> String {
    std::fs::read_to_string(dir.join("haproxy.cfg")).unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reported_node_reaches_balancer_config() {
    let dir = tempfile::tempdir().unwrap();
    let port = pong_server().await;
    write_writer_config(dir.path());
    common::write_config(dir.path(), "services", "cache", &service_config(port));

    let shutdown = Shutdown::new();
    let plugins = Arc::new(Plugins::builtin(MemoryEnsemble::new()));
    let writer = Writer::new(Context::new(dir.path(), plugins.clone(), shutdown.clone()));
    let reporter = Reporter::new(Context::new(dir.path(), plugins, shutdown.clone()));

    writer.start().await.unwrap();
    reporter.start().await.unwrap();

    let server_port = format!(":{} ", port);
    assert!(
        common::wait_until(Duration::from_secs(10), || {
            let content = generated(dir.path());
            content.contains("backend cache") && content.contains(&server_port)
        })
        .await,
        "generated config: {}",
        generated(dir.path())
    );
    assert!(writer.is_watching("cache"));
    assert!(reporter.is_checking("cache"));

    // Removing the service retracts the node.
    std::fs::remove_file(dir.path().join("services/cache.yaml")).unwrap();
    assert!(
        common::wait_until(Duration::from_secs(10), || !generated(dir.path()).contains(&server_port)).await,
        "generated config: {}",
        generated(dir.path())
    );
    assert!(!reporter.is_checking("cache"));

    reporter.stop().await;
    writer.stop().await;
    assert!(!writer.is_watching("cache"));
}

#[tokio::test]
async fn test_cluster_removal_stops_watch() {
    let dir = tempfile::tempdir().unwrap();
    write_writer_config(dir.path());

    let plugins = Arc::new(Plugins::builtin(MemoryEnsemble::new()));
    let writer = Writer::new(Context::new(dir.path(), plugins, Shutdown::new()));
    writer.start().await.unwrap();

    assert!(common::wait_until(Duration::from_secs(10), || writer.is_watching("cache")).await);

    writer.clusters().remove("cache");
    assert!(common::wait_until(Duration::from_secs(10), || !writer.is_watching("cache")).await);
    assert!(common::wait_until(Duration::from_secs(10), || !writer.clusters().registry().contains("cache")).await);

    writer.stop().await;
}

#[tokio::test]
async fn test_invalid_cluster_file_keeps_previous_state() {
    let dir = tempfile::tempdir().unwrap();
    write_writer_config(dir.path());

    let plugins = Arc::new(Plugins::builtin(MemoryEnsemble::new()));
    let writer = Writer::new(Context::new(dir.path(), plugins, Shutdown::new()));
    writer.start().await.unwrap();
    assert!(common::wait_until(Duration::from_secs(10), || writer.clusters().registry().contains("cache")).await);

    let path = common::write_config(dir.path(), "clusters", "cache", "haproxy:\n  port: 1\n");
    writer.clusters().load_file(&path);

    let cluster = writer.clusters().registry().get("cache").unwrap();
    assert_eq!(cluster.settings().haproxy.port, Some(16379));

    writer.stop().await;
}
