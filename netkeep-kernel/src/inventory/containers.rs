//! Docker container inventory
//!
//! One listing pass (`docker ps`), then three inspect calls per container:
//! labels as JSON, network attachments, and network mode / MAC.

use super::ports::{parse_port_list, PortMapping};
use crate::error::{Error, ExecError, Result};
use crate::models::{normalize_mac, Host};
use crate::remote::{quote, Prober};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

pub const WEB_PORTS: [u16; 7] = [80, 443, 8080, 3000, 5000, 8000, 9000];

const LIST_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}|{{.Ports}}|{{.CreatedAt}}";
const LABELS_FORMAT: &str = "{{json .Config.Labels}}";
// Stopped containers lose `IPAddress`; a static address survives in `IPAMConfig`.
const NETWORKS_FORMAT: &str = "{{range $k, $v := .NetworkSettings.Networks}}{{$k}}|{{if $v.IPAddress}}{{$v.IPAddress}}{{else if $v.IPAMConfig}}{{$v.IPAMConfig.IPv4Address}}{{end}}|{{$v.Gateway}}|{{$v.MacAddress}}|{{$v.IPPrefixLen}}{{println}}{{end}}";
const MODE_FORMAT: &str = "{{.HostConfig.NetworkMode}}|{{.NetworkSettings.MacAddress}}";
const LOOKUP_FORMAT: &str = "{{.Id}}|{{.Name}}|{{.State.Status}}|{{range .NetworkSettings.Networks}}{{if .IPAddress}}{{.IPAddress}}{{else if .IPAMConfig}}{{.IPAMConfig.IPv4Address}}{{end}},{{.MacAddress}} {{end}}";

pub fn list_command() -> String {
    format!("docker ps -a --no-trunc --format {}", quote(LIST_FORMAT))
}

pub fn labels_command(container_id: &str) -> String {
    format!("docker inspect --format {} {}", quote(LABELS_FORMAT), quote(container_id))
}

pub fn networks_command(container_id: &str) -> String {
    format!("docker inspect --format {} {}", quote(NETWORKS_FORMAT), quote(container_id))
}

pub fn mode_command(container_id: &str) -> String {
    format!("docker inspect --format {} {}", quote(MODE_FORMAT), quote(container_id))
}

/// All containers, running or stopped, in one inspect call.
pub fn lookup_command() -> String {
    format!("docker ps -aq --no-trunc | xargs -r docker inspect --format {}", quote(LOOKUP_FORMAT))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub ip_address: Option<String>,
    pub gateway: Option<String>,
    pub mac_address: Option<String>,
    pub prefix_len: Option<u8>,
    /// Network address derived from gateway (or IP) and prefix length
    pub subnet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub created: String,
    pub ports: Vec<PortMapping>,
    pub labels: BTreeMap<String, String>,
    pub networks: Vec<NetworkAttachment>,
    pub network_mode: Option<String>,
    pub mac_address: Option<String>,
    pub is_web_service: bool,
    pub service_url: Option<String>,
}

impl DiscoveredContainer {
    pub fn is_running(&self) -> bool {
        self.status.starts_with("Up")
    }

    /// First attachment with an address.
    pub fn primary_ip(&self) -> Option<&str> {
        self.networks.iter().find_map(|n| n.ip_address.as_deref())
    }

    pub fn primary_mac(&self) -> Option<&str> {
        self.mac_address
            .as_deref()
            .or_else(|| self.networks.iter().find_map(|n| n.mac_address.as_deref()))
    }

    pub fn holds_ip(&self, ip: &str) -> bool {
        self.networks.iter().any(|n| n.ip_address.as_deref() == Some(ip))
    }
}

/// Compact record from `find_by_ip`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHit {
    pub id: String,
    pub name: String,
    pub state: String,
    pub mac_address: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || s == "<no value>" {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parse `docker ps` output; short records are skipped.
pub fn parse_listing(output: &str, host_address: &str) -> Vec<DiscoveredContainer> {
    let mut containers = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.splitn(6, '|').collect();
        if fields.len() < 6 {
            warn!("skipping container record with {} fields: {:?}", fields.len(), line);
            continue;
        }
        let ports = parse_port_list(fields[4]);
        let (is_web_service, service_url) = web_service(&ports, host_address);
        containers.push(DiscoveredContainer {
            id: fields[0].trim().to_string(),
            name: fields[1].trim().to_string(),
            image: fields[2].trim().to_string(),
            status: fields[3].trim().to_string(),
            created: fields[5].trim().to_string(),
            ports,
            labels: BTreeMap::new(),
            networks: Vec::new(),
            network_mode: None,
            mac_address: None,
            is_web_service,
            service_url,
        });
    }
    containers
}

fn web_service(ports: &[PortMapping], host_address: &str) -> (bool, Option<String>) {
    let web_port = ports
        .iter()
        .filter_map(|p| p.host_port)
        .find(|port| WEB_PORTS.contains(port));
    match web_port {
        Some(443) => (true, Some(format!("https://{host_address}:443"))),
        Some(port) => (true, Some(format!("http://{host_address}:{port}"))),
        None => (false, None),
    }
}

pub fn parse_labels(output: &str) -> std::result::Result<BTreeMap<String, String>, serde_json::Error> {
    let labels: Option<BTreeMap<String, String>> = serde_json::from_str(output.trim())?;
    Ok(labels.unwrap_or_default())
}

pub fn parse_networks(output: &str) -> Vec<NetworkAttachment> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 5 {
                warn!("skipping network attachment {:?}", line);
                return None;
            }
            let ip_address = non_empty(fields[1]);
            let gateway = non_empty(fields[2]);
            let prefix_len = fields[4].trim().parse::<u8>().ok().filter(|p| *p > 0);
            let subnet = prefix_len.and_then(|prefix| {
                let base = gateway.as_deref().or(ip_address.as_deref())?;
                network_address(base, prefix)
            });
            Some(NetworkAttachment {
                network: fields[0].trim().to_string(),
                ip_address,
                gateway,
                mac_address: normalize_mac(Some(fields[3])),
                prefix_len,
                subnet,
            })
        })
        .collect()
}

fn network_address(ip: &str, prefix: u8) -> Option<String> {
    let ip: Ipv4Addr = ip.parse().ok()?;
    let net = Ipv4Network::new(ip, prefix).ok()?;
    Some(format!("{}/{}", net.network(), prefix))
}

pub fn parse_mode(output: &str) -> (Option<String>, Option<String>) {
    let line = output.lines().next().unwrap_or_default();
    match line.split_once('|') {
        Some((mode, mac)) => (non_empty(mode), normalize_mac(non_empty(mac).as_deref())),
        None => (non_empty(line), None),
    }
}

/// Containers from the combined lookup holding `ip`.
pub fn parse_lookup(output: &str, ip: &str) -> Vec<ContainerHit> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.splitn(4, '|').collect();
            if fields.len() < 4 {
                return None;
            }
            let matching = fields[3]
                .split_whitespace()
                .map(|pair| pair.split_once(',').unwrap_or((pair, "")))
                .find(|(addr, _)| *addr == ip)?;
            Some(ContainerHit {
                id: fields[0].trim().to_string(),
                name: fields[1].trim().trim_start_matches('/').to_string(),
                state: fields[2].trim().to_string(),
                mac_address: normalize_mac(Some(matching.1)),
            })
        })
        .collect()
}

fn docker_error(host: &Host, e: ExecError) -> Error {
    match &e {
        ExecError::Command { exit_code: Some(127), .. } => {
            Error::ServiceUnavailable(format!("docker is not installed on {}", host.id))
        }
        ExecError::Command { stderr, .. } if stderr.contains("Cannot connect to the Docker daemon") => {
            Error::ServiceUnavailable(format!("docker daemon is not running on {}", host.id))
        }
        _ => Error::from(e),
    }
}

#[derive(Clone)]
pub struct ContainerCollector {
    prober: Prober,
}

impl ContainerCollector {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }

    /// Full inventory of the host; a failed inspect only empties that facet.
    pub async fn list(&self, host: &Host) -> Result<Vec<DiscoveredContainer>> {
        let output = self
            .prober
            .run(host, &list_command())
            .await
            .map_err(|e| docker_error(host, e))?;

        let mut containers = parse_listing(&output, &host.address);
        for container in containers.iter_mut() {
            self.inspect(host, container).await?;
        }

        info!("[{}] {} containers discovered", host.id, containers.len());
        Ok(containers)
    }

    async fn inspect(&self, host: &Host, container: &mut DiscoveredContainer) -> Result<()> {
        match self.prober.run(host, &labels_command(&container.id)).await {
            Ok(out) => match parse_labels(&out) {
                Ok(labels) => container.labels = labels,
                Err(e) => warn!("[{}] labels of {} unreadable: {}", host.id, container.name, e),
            },
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => warn!("[{}] label inspect of {} failed: {}", host.id, container.name, e),
        }

        match self.prober.run(host, &networks_command(&container.id)).await {
            Ok(out) => container.networks = parse_networks(&out),
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => warn!("[{}] network inspect of {} failed: {}", host.id, container.name, e),
        }

        match self.prober.run(host, &mode_command(&container.id)).await {
            Ok(out) => {
                let (mode, mac) = parse_mode(&out);
                container.network_mode = mode;
                container.mac_address = mac;
            }
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => warn!("[{}] mode inspect of {} failed: {}", host.id, container.name, e),
        }

        debug!(
            "[{}] {} -> {} networks, mode {:?}",
            host.id,
            container.name,
            container.networks.len(),
            container.network_mode
        );
        Ok(())
    }

    /// Containers on the host holding `ip`, running or stopped.
    pub async fn find_by_ip(&self, host: &Host, ip: &str) -> Result<Vec<ContainerHit>> {
        let output = self
            .prober
            .run(host, &lookup_command())
            .await
            .map_err(|e| docker_error(host, e))?;
        Ok(parse_lookup(&output, ip))
    }
}
