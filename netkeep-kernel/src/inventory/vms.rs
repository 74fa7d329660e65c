//! libvirt guest inventory
//!
//! Guest addresses come from `virsh domifaddr`, asking the guest agent first
//! and falling back to the DHCP lease table.

use crate::error::{Error, ExecError, Result};
use crate::models::{normalize_mac, Host};
use crate::remote::{quote, Prober};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const LIST_ALL: &str = "virsh list --all --name";
pub const LIST_RUNNING: &str = "virsh list --name --state-running";

pub fn domifaddr_candidates(name: &str) -> [String; 2] {
    [
        format!("virsh domifaddr {} --source agent", quote(name)),
        format!("virsh domifaddr {}", quote(name)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestAddress {
    pub interface: String,
    pub mac_address: Option<String>,
    pub ip_address: String,
    pub prefix_len: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmGuest {
    pub name: String,
    pub running: bool,
    pub addresses: Vec<GuestAddress>,
}

impl VmGuest {
    pub fn holds_ip(&self, ip: &str) -> bool {
        self.addresses.iter().any(|a| a.ip_address == ip)
    }
}

pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// IPv4 rows of a `domifaddr` table, loopback excluded.
///
/// The agent source prints `-` for the name and MAC of an interface's
/// additional addresses; those inherit the previous row's values.
pub fn parse_domifaddr(output: &str) -> Vec<GuestAddress> {
    let mut addresses = Vec::new();
    let mut current_iface = String::new();
    let mut current_mac: Option<String> = None;

    for line in output.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] == "Name" || cols[0].starts_with("---") {
            continue;
        }
        if cols[0] != "-" {
            current_iface = cols[0].to_string();
        }
        if cols[1] != "-" {
            current_mac = normalize_mac(Some(cols[1]));
        }
        if cols[2] != "ipv4" {
            continue;
        }
        let (ip, prefix) = match cols[3].split_once('/') {
            Some((ip, prefix)) => (ip, prefix.parse().ok()),
            None => (cols[3], None),
        };
        if ip.starts_with("127.") {
            continue;
        }
        addresses.push(GuestAddress {
            interface: current_iface.clone(),
            mac_address: current_mac.clone(),
            ip_address: ip.to_string(),
            prefix_len: prefix,
        });
    }
    addresses
}

fn virsh_error(host: &Host, e: ExecError) -> Error {
    match e {
        ExecError::Command { exit_code: Some(127), .. } => {
            Error::ServiceUnavailable(format!("virsh is not installed on {}", host.id))
        }
        other => Error::from(other),
    }
}

#[derive(Clone)]
pub struct VmCollector {
    prober: Prober,
}

impl VmCollector {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }

    pub async fn list(&self, host: &Host) -> Result<Vec<VmGuest>> {
        let names = self
            .prober
            .run(host, LIST_ALL)
            .await
            .map(|out| parse_names(&out))
            .map_err(|e| virsh_error(host, e))?;

        let running: HashSet<String> = match self.prober.run(host, LIST_RUNNING).await {
            Ok(out) => parse_names(&out).into_iter().collect(),
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                warn!("[{}] running guest list failed: {}", host.id, e);
                HashSet::new()
            }
        };

        let mut guests = Vec::with_capacity(names.len());
        for name in names {
            let candidates = domifaddr_candidates(&name);
            let refs = [candidates[0].as_str(), candidates[1].as_str()];
            let addresses = match self.prober.probe_strict(host, &refs).await? {
                Some(out) => parse_domifaddr(&out),
                None => {
                    debug!("[{}] no address source for guest {}", host.id, name);
                    Vec::new()
                }
            };
            guests.push(VmGuest {
                running: running.contains(&name),
                name,
                addresses,
            });
        }

        info!("[{}] {} guests discovered", host.id, guests.len());
        Ok(guests)
    }

    pub async fn find_by_ip(&self, host: &Host, ip: &str) -> Result<Vec<VmGuest>> {
        let guests = self.list(host).await?;
        Ok(guests.into_iter().filter(|g| g.holds_ip(ip)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_table_with_continuation_rows() {
        let out = " Name       MAC address          Protocol     Address\n-------------------------------------------------------------------------------\n lo         00:00:00:00:00:00    ipv4         127.0.0.1/8\n -          -                    ipv6         ::1/128\n eth0       52:54:00:AA:BB:CC    ipv4         192.168.122.10/24\n -          -                    ipv4         192.168.122.11/24\n -          -                    ipv6         fe80::5054:ff:feaa:bbcc/64\n";
        let addrs = parse_domifaddr(out);
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].interface, "eth0");
        assert_eq!(addrs[0].ip_address, "192.168.122.10");
        assert_eq!(addrs[0].prefix_len, Some(24));
        assert_eq!(addrs[1].ip_address, "192.168.122.11");
        assert_eq!(addrs[1].mac_address.as_deref(), Some("52:54:00:aa:bb:cc"));
    }

    #[test]
    fn test_lease_table() {
        let out = " Name       MAC address          Protocol     Address\n-------------------------------------------------------------------------------\n vnet3      52:54:00:12:34:56    ipv4         192.168.122.77/24\n";
        let addrs = parse_domifaddr(out);
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].interface, "vnet3");
    }

    #[test]
    fn test_names_skip_blank_lines() {
        assert_eq!(parse_names("web01\n\ndb01\n"), vec!["web01".to_string(), "db01".to_string()]);
    }
}
