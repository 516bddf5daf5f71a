//! Generated config file content.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::balancer::haproxy::control::Version;
use crate::balancer::haproxy::directives::SectionKind;
use crate::balancer::haproxy::stanza::{self, Section, Stanza};
use crate::config::schema::HaproxySettings;
use crate::config::Configurable;
use crate::topology::Cluster;

/// First version supporting `peers` sections and `-L`.
pub const PEERS_MIN_VERSION: Version = Version(1, 5, 0);

/// Render the full config file for `clusters`.
///
/// Peer sections are only emitted when the running version is known to
/// support them.
pub fn generate(
    settings: &HaproxySettings,
    clusters: &[Arc<Cluster>],
    version: Option<Version>,
    generated_at: DateTime<Utc>,
) -> String {
    let bind_address = settings.bind_address.as_deref();

    let mut global = Stanza::new(SectionKind::Global, "global");
    global.add_lines(settings.global.iter().cloned());
    global.add_lines([
        format!("stats socket {} mode 600 level admin", settings.socket_file.display()),
        "stats timeout 2m".to_string(),
    ]);

    let mut defaults = Stanza::new(SectionKind::Defaults, "defaults");
    defaults.add_lines(settings.defaults.iter().cloned());

    let mut frontends = Vec::new();
    let mut meta_members: BTreeMap<String, Vec<&Cluster>> = BTreeMap::new();
    for cluster in clusters {
        let cluster_settings = cluster.settings();
        if let Some(meta) = &cluster_settings.meta_cluster {
            meta_members.entry(meta.clone()).or_default().push(cluster.as_ref());
        }
        if let Some(port) = cluster_settings.haproxy.port {
            frontends.push(stanza::frontend(cluster, port, bind_address));
        }
    }
    for (name, members) in &meta_members {
        match settings.meta_clusters.get(name) {
            Some(meta) => frontends.push(stanza::meta_frontend(name, meta, members, bind_address)),
            None => tracing::error!(meta_cluster = %name, "Meta-cluster referenced but not configured"),
        }
    }

    let backends = clusters.iter().map(|cluster| stanza::backend(cluster)).collect();

    let mut sections = vec![
        Section::new("Global/Defaults", vec![global, defaults]),
        Section::new("Frontends", frontends),
        Section::new("Backends", backends),
    ];

    if version.is_some_and(|version| version >= PEERS_MIN_VERSION) {
        sections.push(Section::new(
            "Peers",
            clusters.iter().map(|cluster| stanza::peers(cluster)).collect(),
        ));
    }

    sections.push(Section::new(
        "Proxies",
        settings
            .proxies
            .iter()
            .map(|(name, proxy)| stanza::proxy(name, proxy))
            .collect(),
    ));

    if let Some(stats) = &settings.stats {
        sections.push(Section::new("Stats", vec![stanza::stats(stats)]));
    }

    let mut content = format!(
        "# file generated by harbormaster at {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let rendered: Vec<String> = sections.iter().map(ToString::to_string).collect();
    content.push_str(&rendered.join("\n\n"));
    content.push('\n');
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterSettings, HaproxyClusterSettings, MetaClusterSettings};
    use crate::config::{parse, RawConfig};
    use crate::topology::{Node, Peer};
    use chrono::TimeZone;
    use serde_json::json;

    fn settings(extra: serde_json::Value) -> HaproxySettings {
        let mut raw: RawConfig = json!({
            "config_file": "/tmp/haproxy.cfg",
            "socket_file": "/tmp/haproxy.sock",
            "global": ["daemon", "maxconn 4096"],
            "defaults": ["mode http", "bogus directive"]
        })
        .as_object()
        .cloned()
        .unwrap();
        if let Some(extra) = extra.as_object() {
            raw.extend(extra.clone());
        }
        parse(&raw).unwrap()
    }

    fn cluster(name: &str, port: Option<u16>, meta: Option<&str>, acl: Option<&str>) -> Arc<Cluster> {
        let cluster = Cluster::new(
            name,
            ClusterSettings {
                discovery: "memory".into(),
                meta_cluster: meta.map(str::to_string),
                haproxy: HaproxyClusterSettings {
                    port,
                    acl: acl.map(str::to_string),
                    ..Default::default()
                },
            },
        );
        Arc::new(cluster)
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_generate_layout() {
        let web = cluster("web", Some(8000), None, None);
        web.set_nodes(vec![Node::new("app1", "10.0.0.1", 80).with_peer(Some(Peer::new("lb1", "10.0.1.1", None)))]);

        let content = generate(&settings(json!({})), &[web], Some(Version(1, 4, 24)), at());

        assert!(content.starts_with("# file generated by harbormaster at 2024-01-02 03:04:05 UTC\n\n#\n# Global/Defaults\n#"));
        assert!(content.contains(
            "global\n\tdaemon\n\tmaxconn 4096\n\tstats socket /tmp/haproxy.sock mode 600 level admin\n\tstats timeout 2m"
        ));
        assert!(content.contains("defaults\n\tmode http\n\n"));
        assert!(!content.contains("bogus"));
        assert!(content.contains("frontend web\n\tbind :8000\n\tdefault_backend web"));
        assert!(content.contains("backend web\n\tserver app1:80 10.0.0.1:80"));
        assert!(!content.contains("# Peers"));
        assert!(content.contains("#\n# Proxies\n#\n\n# No stanzas defined for this section."));
        assert!(!content.contains("# Stats"));
    }

    #[test]
    fn test_peers_emitted_for_supported_versions() {
        let web = cluster("web", None, None, None);
        web.set_nodes(vec![Node::new("app1", "10.0.0.1", 80).with_peer(Some(Peer::new("lb1", "10.0.1.1", None)))]);

        let content = generate(&settings(json!({})), &[web], Some(Version(1, 5, 3)), at());
        assert!(content.contains("#\n# Peers\n#\n\npeers web\n\tpeer lb1 10.0.1.1:1024"));

        let web = cluster("web", None, None, None);
        let content = generate(&settings(json!({})), &[web], None, at());
        assert!(!content.contains("# Peers"));
    }

    #[test]
    fn test_meta_cluster_frontend() {
        let api = cluster("api", None, Some("front"), Some("path_beg /api"));
        let other = cluster("other", None, Some("unconfigured"), Some("path_beg /x"));

        let settings = settings(json!({
            "meta_clusters": {"front": {"port": 80}},
            "stats": {"port": 9100}
        }));
        assert_eq!(
            settings.meta_clusters["front"],
            MetaClusterSettings {
                port: 80,
                options: Vec::new(),
                bind_address: None
            }
        );

        let content = generate(&settings, &[api, other], None, at());
        assert!(content.contains("frontend front\n\tbind :80\n\tacl is_api path_beg /api\n\tuse_backend api if is_api"));
        assert!(!content.contains("frontend unconfigured"));
        assert!(content.contains("listen stats :9100"));
    }
}
