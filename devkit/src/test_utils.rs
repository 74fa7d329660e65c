/*!
Test Harness pour le kernel netkeep

Câble un `NetKeep` complet sur:
- un `MockShell` partagé (réponses scriptées, journal des appels)
- un registre en mémoire ou sur fichier JSON
- une sonde ICMP déterministe
*/

use crate::mock_shell::MockShell;
use async_trait::async_trait;
use netkeep_kernel::config::KernelConfig;
use netkeep_kernel::{DeviceRegistry, DeviceStore, Host, NetKeep, ReachabilityProbe, Subnet};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Init du logging pour les tests (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("netkeep_kernel=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Probe answering for a fixed set of addresses; records every query.
#[derive(Default)]
pub struct StaticProbe {
    responding: Mutex<HashSet<String>>,
    queried: Mutex<Vec<String>>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, ip: &str) -> &Self {
        self.responding.lock().insert(ip.to_string());
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn responds(&self, ip: &str) -> bool {
        self.queried.lock().push(ip.to_string());
        self.responding.lock().contains(ip)
    }
}

/// Harness de test complet
pub struct TestHarness {
    pub shell: MockShell,
    pub probe: Arc<StaticProbe>,
    pub registry: Arc<DeviceRegistry>,
    pub config: KernelConfig,
    hosts: Vec<Host>,
    subnets: Vec<Subnet>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_registry(DeviceRegistry::in_memory())
    }

    /// Registre persistant dans `path`
    pub fn with_data_file(path: &Path) -> Self {
        Self::with_registry(DeviceRegistry::with_file(path))
    }

    fn with_registry(registry: DeviceRegistry) -> Self {
        init_tracing();
        let mut config = KernelConfig::default();
        config.terminal.settle_ms = 5;
        config.discovery.host_timeout_secs = 5;
        Self {
            shell: MockShell::new(),
            probe: Arc::new(StaticProbe::new()),
            registry: Arc::new(registry),
            config,
            hosts: Vec::new(),
            subnets: Vec::new(),
        }
    }

    pub fn host(mut self, id: &str, address: &str) -> Self {
        self.hosts.push(Host::new(id, address));
        self
    }

    pub fn subnet(mut self, name: &str, cidr: &str) -> Self {
        self.subnets.push(Subnet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cidr: cidr.to_string(),
            vlan_id: None,
            gateway: None,
        });
        self
    }

    pub fn host_timeout_secs(mut self, secs: u64) -> Self {
        self.config.discovery.host_timeout_secs = secs;
        self
    }

    pub fn max_parallel_hosts(mut self, n: usize) -> Self {
        self.config.discovery.max_parallel_hosts = n;
        self
    }

    /// Construit le service sur les mocks
    pub async fn build(&self) -> anyhow::Result<NetKeep> {
        self.registry.set_subnets(self.subnets.clone()).await?;
        let store: Arc<dyn DeviceStore> = self.registry.clone();
        Ok(NetKeep::new(
            self.shell.executor(),
            store,
            self.probe.clone(),
            self.hosts.clone(),
            &self.config,
        ))
    }

    pub async fn device_count(&self) -> usize {
        self.registry.list().await.map(|d| d.len()).unwrap_or(0)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_wires_hosts_and_reachability() {
        let harness = TestHarness::new().host("pve1", "10.0.0.2").host("nas", "10.0.0.3");
        harness.probe.respond("10.0.0.9");
        let netkeep = harness.build().await.unwrap();

        let ids: Vec<String> = netkeep.hosts().list().into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["nas".to_string(), "pve1".to_string()]);
        assert!(harness.probe.responds("10.0.0.9").await);
        assert!(!harness.probe.responds("10.0.0.10").await);
        assert_eq!(harness.probe.queried().len(), 2);
    }
}
