//! Directive allow-list per config section.
//!
//! Lines are matched by keyword prefix after trimming and lowercasing, so
//! `option httplog` is accepted wherever `option` is.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Global,
    Defaults,
    Frontend,
    Backend,
    Listen,
    Peers,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Global => "global",
            SectionKind::Defaults => "defaults",
            SectionKind::Frontend => "frontend",
            SectionKind::Backend => "backend",
            SectionKind::Listen => "listen",
            SectionKind::Peers => "peers",
        }
    }

    fn proxy_flag(&self) -> u8 {
        match self {
            SectionKind::Defaults => D,
            SectionKind::Frontend => F,
            SectionKind::Listen => L,
            SectionKind::Backend => B,
            SectionKind::Global | SectionKind::Peers => 0,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const GLOBAL: &[&str] = &[
    "ca-base",
    "chroot",
    "crt-base",
    "daemon",
    "debug",
    "description",
    "gid",
    "group",
    "log",
    "log-send-hostname",
    "log-tag",
    "maxcompcpuusage",
    "maxcomprate",
    "maxconn",
    "maxconnrate",
    "maxpipes",
    "maxsessrate",
    "maxsslconn",
    "maxsslrate",
    "maxzlibmem",
    "nbproc",
    "node",
    "noepoll",
    "nokqueue",
    "nopoll",
    "nosplice",
    "pidfile",
    "quiet",
    "spread-checks",
    "ssl-default-bind-ciphers",
    "ssl-default-bind-options",
    "ssl-default-server-ciphers",
    "ssl-default-server-options",
    "ssl-server-verify",
    "stats",
    "tune.",
    "uid",
    "ulimit-n",
    "unix-bind",
    "user",
];

const PEERS: &[&str] = &["peer"];

const D: u8 = 1;
const F: u8 = 1 << 1;
const L: u8 = 1 << 2;
const B: u8 = 1 << 3;

/// Proxy keywords and the sections accepting them.
const PROXY: &[(&str, u8)] = &[
    ("acl", F | L | B),
    ("appsession", L | B),
    ("backlog", D | F | L),
    ("balance", D | L | B),
    ("bind", F | L),
    ("bind-process", D | F | L | B),
    ("block", F | L | B),
    ("capture", F | L),
    ("compression", D | F | L | B),
    ("cookie", D | L | B),
    ("default-server", D | L | B),
    ("default_backend", D | F | L),
    ("description", F | L | B),
    ("disabled", D | F | L | B),
    ("dispatch", L | B),
    ("email-alert", D | F | L | B),
    ("enabled", D | F | L | B),
    ("errorfile", D | F | L | B),
    ("errorloc", D | F | L | B),
    ("force-persist", F | L | B),
    ("fullconn", D | L | B),
    ("grace", D | F | L | B),
    ("hash-balance-factor", D | L | B),
    ("hash-type", D | L | B),
    ("http-check", D | L | B),
    ("http-request", F | L | B),
    ("http-response", F | L | B),
    ("http-reuse", D | L | B),
    ("http-send-name-header", L | B),
    ("id", F | L | B),
    ("ignore-persist", F | L | B),
    ("log", D | F | L | B),
    ("max-keep-alive-queue", D | L | B),
    ("maxconn", D | F | L),
    ("mode", D | F | L | B),
    ("monitor", D | F | L),
    ("option", D | F | L | B),
    ("persist", D | L | B),
    ("rate-limit", D | F | L),
    ("redirect", F | L | B),
    ("redisp", D | L | B),
    ("req", F | L | B),
    ("retries", D | L | B),
    ("rsp", F | L | B),
    ("server", L | B),
    ("source", D | L | B),
    ("stats", D | L | B),
    ("stick", L | B),
    ("stick-table", F | L | B),
    ("tcp-check", D | L | B),
    ("tcp-request", F | L | B),
    ("tcp-response", L | B),
    ("timeout", D | F | L | B),
    ("transparent", D | L | B),
    ("unique-id-format", D | F | L),
    ("unique-id-header", D | F | L),
    ("use-server", L | B),
    ("use_backend", F | L),
];

/// True if `line` is a directive accepted in `section`.
pub fn is_valid_line(section: SectionKind, line: &str) -> bool {
    let line = line.trim().to_lowercase();
    if line.is_empty() {
        return false;
    }

    match section {
        SectionKind::Global => GLOBAL.iter().any(|keyword| line.starts_with(keyword)),
        SectionKind::Peers => PEERS.iter().any(|keyword| line.starts_with(keyword)),
        _ => {
            let flag = section.proxy_flag();
            PROXY
                .iter()
                .any(|(keyword, sections)| sections & flag != 0 && line.starts_with(keyword))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_specific_keywords() {
        assert!(is_valid_line(SectionKind::Backend, "server web1 10.0.0.1:80 check"));
        assert!(!is_valid_line(SectionKind::Frontend, "server web1 10.0.0.1:80"));

        assert!(is_valid_line(SectionKind::Frontend, "bind :8000"));
        assert!(!is_valid_line(SectionKind::Backend, "bind :8000"));

        assert!(is_valid_line(SectionKind::Global, "stats socket /tmp/h.sock mode 600 level admin"));
        assert!(is_valid_line(SectionKind::Peers, "peer lb1 10.0.0.1:1024"));
        assert!(!is_valid_line(SectionKind::Peers, "server x"));
    }

    #[test]
    fn test_matching_is_case_and_whitespace_insensitive() {
        assert!(is_valid_line(SectionKind::Defaults, "  Option HTTPLOG  "));
        assert!(is_valid_line(SectionKind::Defaults, "timeout connect 5000"));
        assert!(!is_valid_line(SectionKind::Defaults, "use_backend web if is_web"));
        assert!(!is_valid_line(SectionKind::Listen, "   "));
    }
}
