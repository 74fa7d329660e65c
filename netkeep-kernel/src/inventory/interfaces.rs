//! Host network interfaces
//!
//! Addresses from `ip -o -4 addr show` (or `ifconfig -a` where iproute2 is
//! missing), hardware addresses from `ip -o link show`.

use crate::error::Result;
use crate::models::{normalize_mac, Host};
use crate::remote::Prober;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub const ADDR_CANDIDATES: &[&str] = &["ip -o -4 addr show", "ifconfig -a"];
pub const LINK_COMMAND: &str = "ip -o link show";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInterface {
    pub name: String,
    pub ip_address: String,
    pub prefix_len: Option<u8>,
    pub mac_address: Option<String>,
}

fn is_loopback(ip: &str) -> bool {
    ip.starts_with("127.")
}

fn netmask_prefix(mask: &str) -> Option<u8> {
    let mask: std::net::Ipv4Addr = mask.parse().ok()?;
    Some(u32::from(mask).count_ones() as u8)
}

/// Parse one-line-per-address iproute2 output.
pub fn parse_ip_addr(output: &str) -> Vec<HostInterface> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let name = cols.get(1)?.trim_end_matches(':');
            let inet = cols.iter().position(|c| *c == "inet")?;
            let cidr = cols.get(inet + 1)?;
            let (ip, prefix) = match cidr.split_once('/') {
                Some((ip, prefix)) => (ip, prefix.parse().ok()),
                None => (*cidr, None),
            };
            if is_loopback(ip) {
                return None;
            }
            Some(HostInterface {
                name: name.to_string(),
                ip_address: ip.to_string(),
                prefix_len: prefix,
                mac_address: None,
            })
        })
        .collect()
}

lazy_static! {
    static ref IFCONFIG_INET: Regex = Regex::new(r"inet (?:addr:)?(\d+\.\d+\.\d+\.\d+)").unwrap();
    static ref IFCONFIG_MASK: Regex = Regex::new(r"(?i)(?:netmask |mask:)(\d+\.\d+\.\d+\.\d+)").unwrap();
    static ref IFCONFIG_MAC: Regex = Regex::new(r"(?:ether |HWaddr )([0-9A-Fa-f:]{17})").unwrap();
}

/// Parse net-tools output (both the modern and the `inet addr:` layout).
pub fn parse_ifconfig(output: &str) -> Vec<HostInterface> {
    let mut interfaces = Vec::new();
    let mut blocks: Vec<(String, String)> = Vec::new();
    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let name = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches(':')
                .to_string();
            blocks.push((name, String::new()));
        }
        if let Some((_, body)) = blocks.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }

    for (name, body) in blocks {
        let Some(ip) = IFCONFIG_INET.captures(&body).and_then(|c| c.get(1)) else {
            continue;
        };
        if is_loopback(ip.as_str()) {
            continue;
        }
        interfaces.push(HostInterface {
            name,
            ip_address: ip.as_str().to_string(),
            prefix_len: IFCONFIG_MASK
                .captures(&body)
                .and_then(|c| c.get(1))
                .and_then(|m| netmask_prefix(m.as_str())),
            mac_address: IFCONFIG_MAC
                .captures(&body)
                .and_then(|c| c.get(1))
                .and_then(|m| normalize_mac(Some(m.as_str()))),
        });
    }
    interfaces
}

/// Interface name -> MAC from `ip -o link show`.
pub fn parse_link_macs(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let name = cols.get(1)?.trim_end_matches(':');
            // veth0@if12
            let name = name.split('@').next().unwrap_or(name);
            let ether = cols.iter().position(|c| *c == "link/ether")?;
            let mac = normalize_mac(cols.get(ether + 1).copied())?;
            Some((name.to_string(), mac))
        })
        .collect()
}

fn is_iproute_output(output: &str) -> bool {
    output
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.split_once(':'))
        .map(|(index, _)| index.trim().chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct InterfaceCollector {
    prober: Prober,
}

impl InterfaceCollector {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }

    pub async fn list(&self, host: &Host) -> Result<Vec<HostInterface>> {
        let Some(output) = self.prober.probe_strict(host, ADDR_CANDIDATES).await? else {
            debug!("[{}] no interface listing available", host.id);
            return Ok(Vec::new());
        };

        let mut interfaces = if is_iproute_output(&output) {
            parse_ip_addr(&output)
        } else {
            parse_ifconfig(&output)
        };

        if interfaces.iter().any(|i| i.mac_address.is_none()) {
            if let Some(links) = self.prober.probe_strict(host, &[LINK_COMMAND]).await? {
                let macs = parse_link_macs(&links);
                for iface in interfaces.iter_mut().filter(|i| i.mac_address.is_none()) {
                    iface.mac_address = macs.get(&iface.name).cloned();
                }
            }
        }

        info!("[{}] {} interface addresses", host.id, interfaces.len());
        Ok(interfaces)
    }

    pub async fn find_by_ip(&self, host: &Host, ip: &str) -> Result<Vec<HostInterface>> {
        let interfaces = self.list(host).await?;
        Ok(interfaces.into_iter().filter(|i| i.ip_address == ip).collect())
    }
}
