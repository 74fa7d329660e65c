//! IP conflict resolution across every source of truth
//!
//! Evidence is gathered from the registry, each host's containers, VM guests
//! and interfaces, plus one ICMP echo. No source short-circuits another; a
//! source that cannot be consulted simply contributes no evidence.

use crate::error::Error;
use crate::hosts::HostRegistry;
use crate::inventory::Inventory;
use crate::models::{ConflictDetail, ConflictResult, ConflictSource, DeviceId, Host};
use crate::probe::ReachabilityProbe;
use crate::registry::DeviceStore;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything able to say whether an IP is free.
#[async_trait]
pub trait ConflictChecker: Send + Sync {
    async fn check(&self, ip: &str, exclude_device_id: Option<DeviceId>) -> ConflictResult;
}

struct HostEvidence {
    details: Vec<ConflictDetail>,
    reachable: bool,
}

pub struct ConflictResolver {
    store: Arc<dyn DeviceStore>,
    hosts: HostRegistry,
    inventory: Inventory,
    probe: Arc<dyn ReachabilityProbe>,
    host_timeout: Duration,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        hosts: HostRegistry,
        inventory: Inventory,
        probe: Arc<dyn ReachabilityProbe>,
        host_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hosts,
            inventory,
            probe,
            host_timeout,
        }
    }

    async fn registry_evidence(&self, ip: &str, exclude: Option<DeviceId>) -> Vec<ConflictDetail> {
        match self.store.find_by_ip(ip, exclude).await {
            Ok(devices) => devices
                .into_iter()
                .map(|d| ConflictDetail {
                    source: ConflictSource::Database,
                    device_name: d.hostname,
                    host: d.host_id,
                    mac_address: d.mac_address,
                    details: format!("Registered {:?} device from {:?}", d.kind, d.source),
                    status: if d.online { "Online" } else { "Offline" }.to_string(),
                })
                .collect(),
            Err(e) => {
                warn!("[conflict] registry lookup for {} failed: {}", ip, e);
                Vec::new()
            }
        }
    }

    /// Sources on one host, consulted in order. A connection failure ends the
    /// host's check; a missing service only skips that source.
    async fn host_evidence(&self, host: &Host, ip: &str) -> HostEvidence {
        let mut details = Vec::new();

        match self.inventory.containers.find_by_ip(host, ip).await {
            Ok(hits) => details.extend(hits.into_iter().map(|c| ConflictDetail {
                source: ConflictSource::Docker,
                details: format!("Container {} ({})", short_id(&c.id), c.state),
                device_name: c.name,
                host: Some(host.id.clone()),
                mac_address: c.mac_address,
                status: c.state,
            })),
            Err(e) => {
                if let Some(evidence) = source_failed(host, "docker", e, &mut details) {
                    return evidence;
                }
            }
        }

        match self.inventory.vms.find_by_ip(host, ip).await {
            Ok(guests) => {
                for guest in guests {
                    for addr in guest.addresses.iter().filter(|a| a.ip_address == ip) {
                        details.push(ConflictDetail {
                            source: ConflictSource::Vm,
                            device_name: guest.name.clone(),
                            host: Some(host.id.clone()),
                            mac_address: addr.mac_address.clone(),
                            details: format!("VM guest interface {}", addr.interface),
                            status: if guest.running { "running" } else { "shut off" }.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                if let Some(evidence) = source_failed(host, "virsh", e, &mut details) {
                    return evidence;
                }
            }
        }

        match self.inventory.interfaces.find_by_ip(host, ip).await {
            Ok(ifaces) => details.extend(ifaces.into_iter().map(|i| ConflictDetail {
                source: ConflictSource::NetworkInterface,
                details: format!("Interface {} on {}", i.name, host.name),
                device_name: i.name,
                host: Some(host.id.clone()),
                mac_address: i.mac_address,
                status: "up".to_string(),
            })),
            Err(e) => {
                if let Some(evidence) = source_failed(host, "interfaces", e, &mut details) {
                    return evidence;
                }
            }
        }

        HostEvidence { details, reachable: true }
    }

    async fn bounded_host_evidence(&self, host: &Host, ip: &str) -> HostEvidence {
        match tokio::time::timeout(self.host_timeout, self.host_evidence(host, ip)).await {
            Ok(evidence) => evidence,
            Err(_) => {
                warn!("[conflict] {} timed out after {:?}", host.id, self.host_timeout);
                HostEvidence {
                    details: Vec::new(),
                    reachable: false,
                }
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Log a failed source; returns the final evidence when the host is gone.
fn source_failed(host: &Host, source: &str, e: Error, details: &mut Vec<ConflictDetail>) -> Option<HostEvidence> {
    match e {
        Error::ConnectionFailed(e) => {
            warn!("[conflict] {} unreachable: {}", host.id, e);
            Some(HostEvidence {
                details: std::mem::take(details),
                reachable: false,
            })
        }
        Error::ServiceUnavailable(msg) => {
            debug!("[conflict] {} skipped on {}: {}", source, host.id, msg);
            None
        }
        other => {
            warn!("[conflict] {} lookup on {} failed: {}", source, host.id, other);
            None
        }
    }
}

#[async_trait]
impl ConflictChecker for ConflictResolver {
    async fn check(&self, ip: &str, exclude_device_id: Option<DeviceId>) -> ConflictResult {
        let hosts = self.hosts.list();
        let per_host = join_all(hosts.iter().map(|h| self.bounded_host_evidence(h, ip)));

        let (registry, host_results, responds) = tokio::join!(
            self.registry_evidence(ip, exclude_device_id),
            per_host,
            self.probe.responds(ip),
        );

        let mut conflicts = registry;
        let mut unreachable = Vec::new();
        for (host, evidence) in hosts.iter().zip(host_results) {
            if !evidence.reachable {
                unreachable.push(host.id.clone());
            }
            conflicts.extend(evidence.details);
        }

        if responds && conflicts.is_empty() {
            conflicts.push(ConflictDetail {
                source: ConflictSource::NetworkScan,
                device_name: "Unknown device".to_string(),
                host: None,
                mac_address: None,
                details: "Responds but not found in system".to_string(),
                status: "Online".to_string(),
            });
        }

        let result = ConflictResult::from_evidence(ip, conflicts, unreachable);
        info!(
            "[conflict] {} -> {} ({} conflicts, {} hosts unreachable)",
            ip,
            if result.is_available { "available" } else { "in use" },
            result.conflicts.len(),
            result.unreachable_hosts.len()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::registry::DeviceRegistry;
    use crate::remote::{Prober, RemoteExecutor};

    struct NoHostCommands;

    #[async_trait]
    impl RemoteExecutor for NoHostCommands {
        async fn execute(&self, _host: &Host, command: &str) -> Result<String, ExecError> {
            Err(ExecError::Command {
                command: command.to_string(),
                exit_code: Some(1),
                stderr: String::new(),
            })
        }
    }

    struct Echo(bool);

    #[async_trait]
    impl ReachabilityProbe for Echo {
        async fn responds(&self, _ip: &str) -> bool {
            self.0
        }
    }

    fn resolver(echo: bool) -> ConflictResolver {
        let prober = Prober::new(Arc::new(NoHostCommands));
        ConflictResolver::new(
            Arc::new(DeviceRegistry::in_memory()),
            HostRegistry::new(vec![]),
            Inventory::new(prober),
            Arc::new(Echo(echo)),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_silent_unknown_ip_is_available() {
        let result = resolver(false).check("192.168.1.99", None).await;
        assert!(result.is_available);
        assert!(!result.has_conflict);
        assert!(result.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_unattributed_reply_is_network_scan_evidence() {
        let result = resolver(true).check("192.168.1.99", None).await;
        assert!(result.has_conflict);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].source, ConflictSource::NetworkScan);
        assert_eq!(result.conflicts[0].details, "Responds but not found in system");
    }

    /// Only the iproute2 commands answer.
    struct InterfacesOnly;

    #[async_trait]
    impl RemoteExecutor for InterfacesOnly {
        async fn execute(&self, _host: &Host, command: &str) -> Result<String, ExecError> {
            match command {
                "ip -o -4 addr show" => Ok("2: vmbr0    inet 192.168.1.10/24 scope global vmbr0\\       valid_lft forever".into()),
                "ip -o link show" => Ok("2: vmbr0: <BROADCAST,UP> mtu 1500 state UP\\    link/ether 52:54:00:00:00:10 brd ff:ff:ff:ff:ff:ff".into()),
                _ => Err(ExecError::Command {
                    command: command.to_string(),
                    exit_code: Some(127),
                    stderr: String::new(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_evidence_names_the_host_by_id() {
        let mut host = Host::new("pve1", "192.168.1.10");
        host.name = "Proxmox main".into();
        let resolver = ConflictResolver::new(
            Arc::new(DeviceRegistry::in_memory()),
            HostRegistry::new(vec![host]),
            Inventory::new(Prober::new(Arc::new(InterfacesOnly))),
            Arc::new(Echo(false)),
            Duration::from_secs(1),
        );

        let result = resolver.check("192.168.1.10", None).await;
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].source, ConflictSource::NetworkInterface);
        assert_eq!(result.conflicts[0].host.as_deref(), Some("pve1"));
        assert_eq!(result.conflicts[0].details, "Interface vmbr0 on Proxmox main");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
