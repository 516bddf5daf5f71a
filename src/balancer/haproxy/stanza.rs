//! Config file stanzas and the sections grouping them.

use std::fmt;

use crate::balancer::haproxy::directives::{is_valid_line, SectionKind};
use crate::config::schema::{MetaClusterSettings, ProxySettings, StatsSettings};
use crate::config::Configurable;
use crate::topology::{Cluster, Peer};

/// One block of directives:
///
/// ```text
/// header
///     directive
///     directive
/// ```
#[derive(Debug, Clone)]
pub struct Stanza {
    kind: SectionKind,
    header: String,
    lines: Vec<String>,
}

impl Stanza {
    pub fn new(kind: SectionKind, header: impl Into<String>) -> Self {
        Self {
            kind,
            header: header.into(),
            lines: Vec::new(),
        }
    }

    /// Add a directive; lines not allowed in this section are dropped.
    pub fn add_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        if !is_valid_line(self.kind, &line) {
            tracing::warn!(section = %self.kind, line = %line, "Invalid line for section, dropping");
            return;
        }
        self.lines.push(line);
    }

    pub fn add_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.add_line(line);
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return Ok(());
        }
        f.write_str(&self.header)?;
        for line in &self.lines {
            write!(f, "\n\t{}", line)?;
        }
        Ok(())
    }
}

/// A commented group of stanzas.
#[derive(Debug, Clone)]
pub struct Section {
    heading: String,
    stanzas: Vec<Stanza>,
}

impl Section {
    pub fn new(heading: impl Into<String>, stanzas: Vec<Stanza>) -> Self {
        Self {
            heading: heading.into(),
            stanzas,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#\n# {}\n#", self.heading)?;

        let mut stanzas = self.stanzas.iter().filter(|stanza| !stanza.is_empty()).peekable();
        if stanzas.peek().is_none() {
            return f.write_str("\n\n# No stanzas defined for this section.");
        }
        for stanza in stanzas {
            write!(f, "\n\n{}", stanza)?;
        }
        Ok(())
    }
}

fn bind(address: Option<&str>, port: u16) -> String {
    format!("bind {}:{}", address.unwrap_or(""), port)
}

/// Dedicated frontend of a cluster with a port.
pub fn frontend(cluster: &Cluster, port: u16, bind_address: Option<&str>) -> Stanza {
    let settings = cluster.settings();
    let mut stanza = Stanza::new(SectionKind::Frontend, format!("frontend {}", cluster.name()));
    stanza.add_lines(settings.haproxy.frontend.iter().cloned());
    stanza.add_line(bind(bind_address, port));
    stanza.add_line(format!("default_backend {}", cluster.name()));
    stanza
}

/// Backend listing every current node of a cluster.
pub fn backend(cluster: &Cluster) -> Stanza {
    let settings = cluster.settings();
    let nodes = cluster.nodes();
    if nodes.is_empty() {
        tracing::warn!(cluster = %cluster.name(), "Cluster has no nodes, backend may be blank");
    }

    let mut stanza = Stanza::new(SectionKind::Backend, format!("backend {}", cluster.name()));
    stanza.add_lines(settings.haproxy.backend.iter().cloned());

    let http_mode = settings.haproxy.backend.iter().any(|line| line.trim() == "mode http");
    for node in nodes.iter() {
        let name = node.name();
        let mut parts = vec!["server".to_string(), name.clone(), format!("{}:{}", node.ip, node.port)];
        if http_mode {
            parts.push(format!("cookie {}", name));
        }
        if !settings.haproxy.server_options.trim().is_empty() {
            parts.push(settings.haproxy.server_options.trim().to_string());
        }
        stanza.add_line(parts.join(" "));
    }
    stanza
}

/// Shared frontend dispatching to member clusters by ACL.
pub fn meta_frontend(
    name: &str,
    meta: &MetaClusterSettings,
    members: &[&Cluster],
    bind_address: Option<&str>,
) -> Stanza {
    let mut stanza = Stanza::new(SectionKind::Frontend, format!("frontend {}", name));
    stanza.add_line(bind(meta.bind_address.as_deref().or(bind_address), meta.port));
    stanza.add_lines(meta.options.iter().cloned());

    for cluster in members {
        let settings = cluster.settings();
        let Some(acl) = settings.haproxy.acl.as_deref() else {
            tracing::error!(cluster = %cluster.name(), meta_cluster = %name, "Cluster is part of meta-cluster but has no acl rule");
            continue;
        };
        stanza.add_line(format!("acl is_{} {}", cluster.name(), acl));
        stanza.add_line(format!("use_backend {} if is_{}", cluster.name(), cluster.name()));
    }
    stanza
}

/// Peer section of a cluster: one line per distinct peer.
pub fn peers(cluster: &Cluster) -> Stanza {
    let nodes = cluster.nodes();
    let mut distinct: Vec<&Peer> = Vec::new();
    for peer in nodes.iter().filter_map(|node| node.peer.as_ref()) {
        if !distinct.contains(&peer) {
            distinct.push(peer);
        }
    }
    distinct.sort_by(|a, b| (&a.name, &a.ip, a.port).cmp(&(&b.name, &b.ip, b.port)));

    let mut stanza = Stanza::new(SectionKind::Peers, format!("peers {}", cluster.name()));
    stanza.add_lines(
        distinct
            .into_iter()
            .map(|peer| format!("peer {} {}:{}", peer.name, peer.ip, peer.port)),
    );
    stanza
}

/// Static TCP proxy to fixed upstreams.
pub fn proxy(name: &str, proxy: &ProxySettings) -> Stanza {
    let mut stanza = Stanza::new(SectionKind::Listen, format!("listen {}", name));
    stanza.add_line(bind(proxy.bind_address.as_deref(), proxy.port));
    stanza.add_lines(proxy.options.iter().cloned());

    for upstream in &proxy.upstreams {
        let address = format!("{}:{}", upstream.host, upstream.port);
        let mut line = format!("server {} {}", address, address);
        if let Some(max_conn) = upstream.max_conn {
            line.push_str(&format!(" maxconn {}", max_conn));
        }
        stanza.add_line(line);
    }
    stanza
}

/// Stats web listener.
pub fn stats(stats: &StatsSettings) -> Stanza {
    let mut stanza = Stanza::new(SectionKind::Listen, format!("listen stats :{}", stats.port));
    stanza.add_lines(["mode http".to_string(), "stats enable".to_string(), format!("stats uri {}", stats.uri)]);

    let timeouts = [
        ("client", stats.timeouts.client),
        ("connect", stats.timeouts.connect),
        ("server", stats.timeouts.server),
    ];
    for (name, value) in timeouts {
        if let Some(value) = value {
            stanza.add_line(format!("timeout {} {}", name, value));
        }
    }
    stanza
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterSettings, HaproxyClusterSettings, UpstreamSettings};
    use crate::topology::Node;

    fn cluster(name: &str, haproxy: HaproxyClusterSettings) -> Cluster {
        Cluster::new(
            name,
            ClusterSettings {
                discovery: "memory".into(),
                meta_cluster: None,
                haproxy,
            },
        )
    }

    #[test]
    fn test_stanza_drops_invalid_lines() {
        let mut stanza = Stanza::new(SectionKind::Frontend, "frontend web");
        stanza.add_line("bind :80");
        stanza.add_line("server web1 10.0.0.1:80");
        assert_eq!(stanza.to_string(), "frontend web\n\tbind :80");
    }

    #[test]
    fn test_empty_section_placeholder() {
        let section = Section::new("Peers", vec![Stanza::new(SectionKind::Peers, "peers web")]);
        assert_eq!(section.to_string(), "#\n# Peers\n#\n\n# No stanzas defined for this section.");
    }

    #[test]
    fn test_backend_server_lines() {
        let web = cluster(
            "web",
            HaproxyClusterSettings {
                backend: vec!["mode http".into(), "balance roundrobin".into()],
                server_options: "check inter 2000".into(),
                ..Default::default()
            },
        );
        web.set_nodes(vec![Node::new("app1", "10.0.0.1", 8080)]);

        assert_eq!(
            backend(&web).to_string(),
            "backend web\n\tmode http\n\tbalance roundrobin\n\tserver app1:8080 10.0.0.1:8080 cookie app1:8080 check inter 2000"
        );
    }

    #[test]
    fn test_meta_frontend_skips_members_without_acl() {
        let api = cluster(
            "api",
            HaproxyClusterSettings {
                acl: Some("path_beg /api".into()),
                ..Default::default()
            },
        );
        let web = cluster("web", HaproxyClusterSettings::default());
        let meta = MetaClusterSettings {
            port: 80,
            options: vec!["mode http".into()],
            bind_address: None,
        };

        assert_eq!(
            meta_frontend("front", &meta, &[&api, &web], Some("0.0.0.0")).to_string(),
            "frontend front\n\tbind 0.0.0.0:80\n\tmode http\n\tacl is_api path_beg /api\n\tuse_backend api if is_api"
        );
    }

    #[test]
    fn test_peers_deduplicated() {
        let web = cluster("web", HaproxyClusterSettings::default());
        let lb = Peer::new("lb1", "10.0.1.1", None);
        web.set_nodes(vec![
            Node::new("app1", "10.0.0.1", 80).with_peer(Some(lb.clone())),
            Node::new("app1", "10.0.0.1", 81).with_peer(Some(Peer::new("lb1-alias", "10.0.1.1", None))),
            Node::new("app2", "10.0.0.2", 80).with_peer(None),
        ]);

        assert_eq!(peers(&web).to_string(), "peers web\n\tpeer lb1 10.0.1.1:1024");
    }

    #[test]
    fn test_proxy_and_stats() {
        let settings = ProxySettings {
            port: 9000,
            upstreams: vec![UpstreamSettings {
                host: "partner.example.com".into(),
                port: 443,
                max_conn: Some(50),
            }],
            options: vec!["mode tcp".into()],
            bind_address: None,
        };
        assert_eq!(
            proxy("partner", &settings).to_string(),
            "listen partner\n\tbind :9000\n\tmode tcp\n\tserver partner.example.com:443 partner.example.com:443 maxconn 50"
        );

        let stats_settings = StatsSettings {
            port: 9100,
            uri: "/haproxy".into(),
            timeouts: crate::config::schema::StatsTimeouts {
                client: Some(5000),
                connect: None,
                server: Some(5000),
            },
        };
        assert_eq!(
            stats(&stats_settings).to_string(),
            "listen stats :9100\n\tmode http\n\tstats enable\n\tstats uri /haproxy\n\ttimeout client 5000\n\ttimeout server 5000"
        );
    }
}
