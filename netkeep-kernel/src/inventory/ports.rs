//! Docker port-mapping grammar
//!
//! `[hostIp:]hostPort->containerPort[/protocol]` or `containerPort[/protocol]`,
//! comma-separated. Protocol defaults to `tcp`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host_port) = self.host_port {
            if let Some(ip) = &self.host_ip {
                if ip.contains(':') {
                    write!(f, "[{ip}]:")?;
                } else {
                    write!(f, "{ip}:")?;
                }
            }
            write!(f, "{host_port}->")?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

fn split_protocol(s: &str) -> (&str, String) {
    match s.split_once('/') {
        Some((port, proto)) if !proto.is_empty() => (port, proto.to_ascii_lowercase()),
        Some((port, _)) => (port, "tcp".to_string()),
        None => (s, "tcp".to_string()),
    }
}

/// Parse one mapping entry; `None` when it does not match the grammar.
pub fn parse_port_mapping(entry: &str) -> Option<PortMapping> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    let (published, target) = match entry.split_once("->") {
        Some((left, right)) => (Some(left), right),
        None => (None, entry),
    };

    let (container_port, protocol) = split_protocol(target);
    let container_port: u16 = container_port.trim().parse().ok()?;

    let (host_ip, host_port) = match published {
        None => (None, None),
        Some(left) => {
            let (ip, port) = match left.rsplit_once(':') {
                Some((ip, port)) => {
                    let ip = ip.trim_start_matches('[').trim_end_matches(']');
                    // ":::8080" et "[::]:8080" => "::"
                    let ip = if ip.chars().all(|c| c == ':') { "::" } else { ip };
                    (Some(ip.to_string()), port)
                }
                None => (None, left),
            };
            (ip, Some(port.trim().parse::<u16>().ok()?))
        }
    };

    Some(PortMapping {
        container_port,
        host_port,
        protocol,
        host_ip,
    })
}

/// Parse a comma-separated port column, skipping malformed entries.
pub fn parse_port_list(ports: &str) -> Vec<PortMapping> {
    ports
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .filter_map(|entry| {
            let parsed = parse_port_mapping(entry);
            if parsed.is_none() {
                warn!("skipping malformed port mapping {:?}", entry);
            }
            parsed
        })
        .collect()
}
