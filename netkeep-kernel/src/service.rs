/**
 * NETKEEP SERVICE - Façade des opérations exposées à la couche web
 *
 * RÔLE : Assemble executor, collecteurs, réconciliateur, résolveur de conflits
 * et planificateur de migration derrière des opérations retournant OpResult<T>.
 *
 * Les erreurs internes ne sortent jamais : success + message lisible.
 */

use crate::config::{DiscoveryConf, KernelConfig};
use crate::conflict::{ConflictChecker, ConflictResolver};
use crate::credentials::DefaultCredentialStore;
use crate::discovery::{SystemDiscoverer, SystemDiscovery, SystemInfoEnricher};
use crate::error::{Error, Result};
use crate::hosts::HostRegistry;
use crate::inventory::{DiscoveredContainer, HostInterface, Inventory, VmGuest};
use crate::migration::{MigrationCandidate, MigrationPlanner};
use crate::models::{
    normalize_mac, ConflictResult, DeviceId, DeviceKind, DeviceSource, Host, HostStatus, IpSuggestion,
    ObservedDevice,
};
use crate::probe::{IcmpProbe, ReachabilityProbe};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::registry::{DeviceRegistry, DeviceStore};
use crate::remote::{Prober, RemoteExecutor, SshExecutor, TerminalCapture, TerminalSessions};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Uniform operation result: callers never see internal error types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult<T> {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<T>,
}

impl<T> OpResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

impl<T> From<Result<T>> for OpResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => OpResult::ok(data),
            Err(e) => OpResult::fail(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySync {
    pub host_id: String,
    pub observed: usize,
    pub reconciled: ReconcileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSyncResult {
    pub host_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub containers: Option<ReconcileSummary>,
    pub interfaces: Option<ReconcileSummary>,
    pub virtual_machines: Option<ReconcileSummary>,
    pub duration_ms: u128,
}

/// "0 of 5 hosts synced" is still a successful report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub total_servers: usize,
    pub successful_servers: usize,
    pub failed_servers: usize,
    pub results: Vec<HostSyncResult>,
}

fn container_observations(containers: &[DiscoveredContainer]) -> Vec<ObservedDevice> {
    containers
        .iter()
        .filter_map(|c| {
            let Some(ip) = c.primary_ip() else {
                debug!("container {} has no address, not reconciled", c.name);
                return None;
            };
            Some(ObservedDevice {
                ip_address: ip.to_string(),
                mac_address: c.primary_mac().map(str::to_string),
                hostname: c.name.clone(),
                kind: DeviceKind::Server,
                online: c.is_running(),
                is_static: false,
                source: DeviceSource::Docker,
                notes: Some(format!("Image: {}", c.image)),
            })
        })
        .collect()
}

/// Registry entries are matched by MAC first, so several addresses behind one
/// MAC (VLAN sub-interfaces, multi-homed guests) become a single observation:
/// the first address is kept and the others are listed in its notes.
fn collapse_shared_macs(observed: Vec<ObservedDevice>) -> Vec<ObservedDevice> {
    let mut kept: Vec<ObservedDevice> = Vec::with_capacity(observed.len());
    for obs in observed {
        let mac = normalize_mac(obs.mac_address.as_deref());
        let first = mac.as_ref().and_then(|mac| {
            kept.iter()
                .position(|k| normalize_mac(k.mac_address.as_deref()).as_ref() == Some(mac))
        });
        match first {
            Some(index) => {
                debug!("{} shares its MAC with {}, folded", obs.ip_address, kept[index].ip_address);
                let notes = kept[index].notes.get_or_insert_with(String::new);
                if !notes.is_empty() {
                    notes.push_str("; ");
                }
                notes.push_str(&format!("also {}", obs.ip_address));
            }
            None => kept.push(obs),
        }
    }
    kept
}

fn interface_observations(host: &Host, interfaces: &[HostInterface]) -> Vec<ObservedDevice> {
    let observed = interfaces
        .iter()
        .map(|i| ObservedDevice {
            ip_address: i.ip_address.clone(),
            mac_address: i.mac_address.clone(),
            hostname: format!("{}-{}", host.name, i.name),
            kind: DeviceKind::NetworkInterface,
            online: true,
            is_static: true,
            source: DeviceSource::Other,
            notes: Some(format!("Interface {} on {}", i.name, host.name)),
        })
        .collect();
    collapse_shared_macs(observed)
}

fn vm_observations(host: &Host, guests: &[VmGuest]) -> Vec<ObservedDevice> {
    let observed = guests
        .iter()
        .flat_map(|g| {
            g.addresses.iter().map(move |a| ObservedDevice {
                ip_address: a.ip_address.clone(),
                mac_address: a.mac_address.clone(),
                hostname: g.name.clone(),
                kind: DeviceKind::VirtualMachine,
                online: g.running,
                is_static: false,
                source: DeviceSource::VirtualMachine,
                notes: Some(format!("libvirt guest on {}", host.name)),
            })
        })
        .collect();
    collapse_shared_macs(observed)
}

pub struct NetKeep {
    hosts: HostRegistry,
    store: Arc<dyn DeviceStore>,
    prober: Prober,
    discoverer: SystemDiscoverer,
    inventory: Inventory,
    reconciler: Reconciler,
    resolver: Arc<ConflictResolver>,
    planner: MigrationPlanner,
    terminals: TerminalSessions,
    settings: DiscoveryConf,
}

impl NetKeep {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn DeviceStore>,
        probe: Arc<dyn ReachabilityProbe>,
        hosts: Vec<Host>,
        config: &KernelConfig,
    ) -> Self {
        let settings = config.discovery.clone();
        let hosts = HostRegistry::new(hosts);
        let prober = Prober::new(executor.clone());
        let inventory = Inventory::new(prober.clone());
        let resolver = Arc::new(ConflictResolver::new(
            store.clone(),
            hosts.clone(),
            inventory.clone(),
            probe,
            settings.host_timeout(),
        ));
        let checker: Arc<dyn ConflictChecker> = resolver.clone();

        Self {
            discoverer: SystemDiscoverer::new(prober.clone(), None),
            reconciler: Reconciler::new(store.clone()),
            planner: MigrationPlanner::new(checker, inventory.containers.clone()),
            terminals: TerminalSessions::new(executor, Duration::from_millis(config.terminal.settle_ms)),
            hosts,
            store,
            prober,
            inventory,
            resolver,
            settings,
        }
    }

    /// SSH executor, ICMP probe and the registry described by the configuration.
    pub async fn from_config(config: &KernelConfig) -> Result<Self> {
        let executor = SshExecutor::new(Arc::new(DefaultCredentialStore))
            .with_timeout(config.discovery.connect_timeout());

        let registry = match &config.registry.data_file {
            Some(path) => DeviceRegistry::with_file(path),
            None => DeviceRegistry::in_memory(),
        };
        registry.load().await?;
        registry.set_subnets(config.build_subnets()).await?;

        let probe = IcmpProbe::new(config.discovery.probe_timeout());
        Ok(Self::new(
            Arc::new(executor),
            Arc::new(registry),
            Arc::new(probe),
            config.build_hosts(),
            config,
        ))
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn SystemInfoEnricher>) -> Self {
        self.discoverer = SystemDiscoverer::new(self.prober.clone(), Some(enricher));
        self
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn settings(&self) -> &DiscoveryConf {
        &self.settings
    }

    pub async fn discover_system(&self, host_id: &str) -> OpResult<SystemDiscovery> {
        let host = match self.hosts.get(host_id) {
            Ok(host) => host,
            Err(e) => return OpResult::fail(e.to_string()),
        };
        let discovery = self.discoverer.discover(&host).await;
        if let Err(e) = self.hosts.record_check(&host.id, discovery.status, discovery.os_name.clone()) {
            warn!("[{}] could not record discovery: {}", host.id, e);
        }
        OpResult {
            success: discovery.success,
            error: discovery.error.clone(),
            data: Some(discovery),
        }
    }

    pub async fn discover_containers(&self, host_id: &str) -> OpResult<Vec<DiscoveredContainer>> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.inventory.containers.list(&host).await
        };
        result.await.into()
    }

    async fn reconcile_host_containers(&self, host: &Host) -> Result<InventorySync> {
        let containers = self.inventory.containers.list(host).await?;
        let observed = container_observations(&containers);
        let count = observed.len();
        let reconciled = self.reconciler.reconcile_all(observed, Some(&host.id)).await;
        info!(
            "[{}] containers reconciled: {} created, {} updated, {} failed",
            host.id, reconciled.created, reconciled.updated, reconciled.failed
        );
        Ok(InventorySync {
            host_id: host.id.clone(),
            observed: count,
            reconciled,
        })
    }

    async fn reconcile_host_interfaces(&self, host: &Host) -> Result<InventorySync> {
        let interfaces = self.inventory.interfaces.list(host).await?;
        let observed = interface_observations(host, &interfaces);
        let count = observed.len();
        let reconciled = self.reconciler.reconcile_all(observed, Some(&host.id)).await;
        Ok(InventorySync {
            host_id: host.id.clone(),
            observed: count,
            reconciled,
        })
    }

    async fn reconcile_host_vms(&self, host: &Host) -> Result<InventorySync> {
        let guests = self.inventory.vms.list(host).await?;
        let observed = vm_observations(host, &guests);
        let count = observed.len();
        let reconciled = self.reconciler.reconcile_all(observed, Some(&host.id)).await;
        Ok(InventorySync {
            host_id: host.id.clone(),
            observed: count,
            reconciled,
        })
    }

    pub async fn reconcile_containers(&self, host_id: &str) -> OpResult<InventorySync> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.reconcile_host_containers(&host).await
        };
        result.await.into()
    }

    pub async fn sync_interfaces(&self, host_id: &str) -> OpResult<InventorySync> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.reconcile_host_interfaces(&host).await
        };
        result.await.into()
    }

    pub async fn sync_virtual_machines(&self, host_id: &str) -> OpResult<InventorySync> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.reconcile_host_vms(&host).await
        };
        result.await.into()
    }

    /// Containers, interfaces and VMs of one host. A missing container runtime
    /// or hypervisor is skipped; a connection failure fails the host.
    async fn sync_host(&self, host: &Host) -> Result<HostSyncResult> {
        let started = Instant::now();

        let containers = optional_source(host, "containers", self.reconcile_host_containers(host).await)?;
        let interfaces = optional_source(host, "interfaces", self.reconcile_host_interfaces(host).await)?;
        let virtual_machines = optional_source(host, "virtual machines", self.reconcile_host_vms(host).await)?;

        Ok(HostSyncResult {
            host_id: host.id.clone(),
            success: true,
            error: None,
            containers: containers.map(|s| s.reconciled),
            interfaces: interfaces.map(|s| s.reconciled),
            virtual_machines: virtual_machines.map(|s| s.reconciled),
            duration_ms: started.elapsed().as_millis(),
        })
    }

    async fn sync_host_bounded(&self, host: Host, permits: Arc<Semaphore>) -> HostSyncResult {
        let started = Instant::now();
        let failed = |error: String| HostSyncResult {
            host_id: host.id.clone(),
            success: false,
            error: Some(error),
            containers: None,
            interfaces: None,
            virtual_machines: None,
            duration_ms: started.elapsed().as_millis(),
        };

        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return failed(format!("sync aborted: {e}")),
        };

        let timeout = self.settings.host_timeout();
        let outcome = tokio::time::timeout(timeout, self.sync_host(&host)).await;
        let status = match &outcome {
            Ok(Ok(_)) => HostStatus::Online,
            _ => HostStatus::Offline,
        };
        if let Err(e) = self.hosts.record_check(&host.id, status, None) {
            debug!("[{}] status not recorded: {}", host.id, e);
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("[{}] sync failed: {}", host.id, e);
                failed(e.to_string())
            }
            Err(_) => {
                warn!("[{}] sync timed out after {:?}", host.id, timeout);
                failed(format!("timed out after {}s", timeout.as_secs()))
            }
        }
    }

    pub async fn sync_all_hosts(&self) -> OpResult<SyncReport> {
        let hosts = self.hosts.list();
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_hosts.max(1)));
        info!("[sync] syncing {} hosts ({} in parallel)", hosts.len(), self.settings.max_parallel_hosts);

        let results = join_all(hosts.into_iter().map(|h| self.sync_host_bounded(h, permits.clone()))).await;

        let successful_servers = results.iter().filter(|r| r.success).count();
        let report = SyncReport {
            total_servers: results.len(),
            successful_servers,
            failed_servers: results.len() - successful_servers,
            results,
        };
        info!(
            "[sync] {} of {} hosts synced",
            report.successful_servers, report.total_servers
        );
        OpResult::ok(report)
    }

    pub async fn check_ip_conflict(&self, ip: &str, exclude_device_id: Option<DeviceId>) -> OpResult<ConflictResult> {
        if ip.trim().parse::<IpAddr>().is_err() {
            return OpResult::fail(
                Error::ParseFailed {
                    what: "IP address".into(),
                    detail: ip.to_string(),
                }
                .to_string(),
            );
        }
        OpResult::ok(self.resolver.check(ip.trim(), exclude_device_id).await)
    }

    pub async fn analyze_migration_candidates(&self, host_id: &str) -> OpResult<Vec<MigrationCandidate>> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.planner.analyze(&host).await
        };
        result.await.into()
    }

    pub async fn suggest_migration_ips(
        &self,
        host_id: &str,
        container_ids: &[String],
        range_start: &str,
        range_end: &str,
    ) -> OpResult<Vec<IpSuggestion>> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            let targets = self.planner.targets_for(&host, container_ids).await?;
            self.planner.suggest(&targets, range_start, range_end).await
        };
        result.await.into()
    }

    pub async fn run_terminal_command(&self, host_id: &str, command: &str) -> OpResult<TerminalCapture> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.terminals.run(&host, command).await
        };
        result.await.into()
    }

    pub async fn close_terminal_session(&self, host_id: &str) -> OpResult<bool> {
        let result = async {
            let host = self.hosts.get(host_id)?;
            self.terminals.close(&host).await
        };
        result.await.into()
    }

    /// Unregister a host that no registry entry references any more.
    pub async fn remove_host(&self, host_id: &str) -> OpResult<Host> {
        self.hosts.remove(host_id, self.store.as_ref()).await.into()
    }
}

fn optional_source<T>(host: &Host, what: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::ServiceUnavailable(msg)) => {
            debug!("[{}] {} skipped: {}", host.id, what, msg);
            Ok(None)
        }
        Err(e @ Error::ConnectionFailed(_)) => Err(e),
        Err(e) => {
            warn!("[{}] {} sync failed: {}", host.id, what, e);
            Ok(None)
        }
    }
}
