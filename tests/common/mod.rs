//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use harbormaster::config::schema::{ClusterSettings, HaproxySettings};
use harbormaster::config::validation::{validate_cluster, validate_haproxy};
use harbormaster::config::RawConfig;
use harbormaster::topology::{Cluster, Node};

pub fn raw(value: Value) -> RawConfig {
    value.as_object().cloned().unwrap()
}

/// Start a programmable mock control socket.
///
/// Every command line received is recorded; `f` produces the reply, after
/// which the connection is closed.
pub fn start_control_socket<F, Fut>(path: &Path, f: F) -> Arc<Mutex<Vec<String>>>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    let listener = UnixListener::bind(path).unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let recorded = commands.clone();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                let mut line = String::new();
                if socket.read_line(&mut line).await.is_err() {
                    return;
                }
                let command = line.trim_end().to_string();
                recorded.lock().unwrap().push(command.clone());

                let reply = f(command).await;
                let _ = socket.get_mut().write_all(reply.as_bytes()).await;
                let _ = socket.get_mut().shutdown().await;
            });
        }
    });

    commands
}

/// `show stat` reply listing `servers` as (backend, server) pairs.
pub fn stat_csv(servers: &[(&str, &str)]) -> String {
    let mut csv = String::from("# pxname,svname,status,weight\n");
    for (backend, server) in servers {
        csv.push_str(&format!("{},{},UP,1\n", backend, server));
    }
    csv.push('\n');
    csv
}

pub fn haproxy_settings(dir: &Path, binary: &str) -> HaproxySettings {
    validate_haproxy(&raw(json!({
        "config_file": dir.join("haproxy.cfg"),
        "socket_file": dir.join("haproxy.sock"),
        "pid_file": dir.join("haproxy.pid"),
        "binary": binary,
        "restart_interval_ms": 10,
    })))
    .unwrap()
}

pub fn cluster_settings(port: u16) -> ClusterSettings {
    validate_cluster(&raw(json!({
        "discovery": "memory",
        "haproxy": {"port": port, "backend": ["mode tcp"]}
    })))
    .unwrap()
}

pub fn cluster(name: &str, nodes: &[(&str, &str, u16)]) -> Arc<Cluster> {
    let cluster = Cluster::new(name, cluster_settings(9000));
    cluster.set_nodes(nodes.iter().map(|(host, ip, port)| Node::new(*host, *ip, *port)).collect());
    Arc::new(cluster)
}

/// Write `<dir>/<kind>/<name>.yaml`.
pub fn write_config(dir: &Path, kind: &str, name: &str, yaml: &str) -> PathBuf {
    let kind_dir = dir.join(kind);
    std::fs::create_dir_all(&kind_dir).unwrap();
    let path = kind_dir.join(format!("{}.yaml", name));
    std::fs::write(&path, yaml).unwrap();
    path
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
