//! Device reconciliation
//!
//! Merges fresh observations into the registry:
//! - match by non-empty MAC first, then by IP
//! - update in place (`last_seen` never moves backwards), or insert
//! - subnet resolved by first CIDR containment match
//!
//! Writes touching the same MAC or IP are serialized through keyed locks,
//! always acquired in sorted key order. The matched entry's own keys are
//! locked too, so two observations resolving to one device never interleave.

use crate::error::StoreError;
use crate::models::{normalize_mac, DeviceId, NetworkDevice, ObservedDevice, Subnet};
use crate::registry::DeviceStore;
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Named async locks created on demand.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, deduplicated and in sorted order.
    pub async fn acquire(&self, mut keys: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();

        let handles: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock();
            // Entrées que plus personne ne tient ni n'attend
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            keys.iter()
                .map(|k| locks.entry(k.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub device_id: DeviceId,
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub device_ids: Vec<DeviceId>,
}

/// First subnet whose CIDR contains `ip`.
pub fn resolve_subnet(subnets: &[Subnet], ip: &str) -> Option<Uuid> {
    let ip: IpAddr = ip.parse().ok()?;
    subnets.iter().find_map(|subnet| match subnet.cidr.parse::<IpNetwork>() {
        Ok(net) if net.contains(ip) => Some(subnet.id),
        Ok(_) => None,
        Err(e) => {
            warn!("[reconcile] subnet {} has invalid CIDR {}: {}", subnet.name, subnet.cidr, e);
            None
        }
    })
}

fn lock_keys(ip: &str, mac: Option<&str>) -> Vec<String> {
    let mut keys = vec![format!("ip:{ip}")];
    if let Some(mac) = mac {
        keys.push(format!("mac:{mac}"));
    }
    keys
}

pub struct Reconciler {
    store: Arc<dyn DeviceStore>,
    locks: KeyedLocks,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    async fn find_existing(&self, mac: Option<&str>, ip: &str) -> Result<Option<NetworkDevice>, StoreError> {
        if let Some(mac) = mac {
            if let Some(device) = self.store.find_by_mac(mac).await? {
                return Ok(Some(device));
            }
        }
        Ok(self.store.find_by_ip(ip, None).await?.into_iter().next())
    }

    /// Lock the observation's keys plus those of the entry it matches.
    ///
    /// The match is re-read after every widening; it is returned only once
    /// all of its keys are held.
    async fn lock_match(
        &self,
        mac: Option<&str>,
        ip: &str,
    ) -> Result<(Vec<OwnedMutexGuard<()>>, Option<NetworkDevice>), StoreError> {
        let mut keys = lock_keys(ip, mac);
        loop {
            let guards = self.locks.acquire(keys.clone()).await;
            let existing = self.find_existing(mac, ip).await?;
            let missing: Vec<String> = existing
                .as_ref()
                .map(|d| lock_keys(&d.ip_address, d.mac_address.as_deref()))
                .unwrap_or_default()
                .into_iter()
                .filter(|k| !keys.contains(k))
                .collect();
            if missing.is_empty() {
                return Ok((guards, existing));
            }
            drop(guards);
            debug!("[reconcile] widening lock set for {} with {:?}", ip, missing);
            keys.extend(missing);
        }
    }

    pub async fn reconcile(&self, observed: ObservedDevice, host_id: Option<&str>) -> Result<ReconcileOutcome, StoreError> {
        let mac = normalize_mac(observed.mac_address.as_deref());
        let (_guards, existing) = self.lock_match(mac.as_deref(), &observed.ip_address).await?;

        let now = OffsetDateTime::now_utc();
        let subnets = self.store.subnets().await?;
        let subnet_id = resolve_subnet(&subnets, &observed.ip_address);

        match existing {
            Some(mut device) => {
                device.ip_address = observed.ip_address;
                if mac.is_some() {
                    device.mac_address = mac;
                }
                device.hostname = observed.hostname;
                device.kind = observed.kind;
                device.online = observed.online;
                device.is_static = observed.is_static;
                device.last_seen = device.last_seen.max(now);
                device.host_id = host_id.map(str::to_string).or(device.host_id);
                device.source = observed.source;
                if observed.notes.is_some() {
                    device.notes = observed.notes;
                }
                if subnet_id.is_some() {
                    device.subnet_id = subnet_id;
                }

                let device_id = device.id;
                debug!("[reconcile] updated {} ({})", device.hostname, device.ip_address);
                self.store.upsert(device).await?;
                Ok(ReconcileOutcome { device_id, created: false })
            }
            None => {
                let device = NetworkDevice {
                    id: Uuid::new_v4(),
                    ip_address: observed.ip_address,
                    mac_address: mac,
                    hostname: observed.hostname,
                    kind: observed.kind,
                    online: observed.online,
                    first_seen: now,
                    last_seen: now,
                    host_id: host_id.map(str::to_string),
                    is_static: observed.is_static,
                    source: observed.source,
                    notes: observed.notes,
                    open_ports: None,
                    subnet_id,
                };

                let device_id = device.id;
                debug!("[reconcile] created {} ({})", device.hostname, device.ip_address);
                self.store.upsert(device).await?;
                Ok(ReconcileOutcome { device_id, created: true })
            }
        }
    }

    /// Reconcile a batch; per-item failures are logged and counted.
    pub async fn reconcile_all(&self, observed: Vec<ObservedDevice>, host_id: Option<&str>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for device in observed {
            let label = format!("{} ({})", device.hostname, device.ip_address);
            match self.reconcile(device, host_id).await {
                Ok(outcome) => {
                    if outcome.created {
                        summary.created += 1;
                    } else {
                        summary.updated += 1;
                    }
                    summary.device_ids.push(outcome.device_id);
                }
                Err(e) => {
                    warn!("[reconcile] failed to reconcile {}: {}", label, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, DeviceSource};
    use crate::registry::DeviceRegistry;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Registry whose lookups take a while, widening every race window.
    struct SlowLookups {
        inner: DeviceRegistry,
        delay: Duration,
    }

    #[async_trait]
    impl DeviceStore for SlowLookups {
        async fn get(&self, id: DeviceId) -> Result<Option<NetworkDevice>, StoreError> {
            self.inner.get(id).await
        }
        async fn find_by_mac(&self, mac: &str) -> Result<Option<NetworkDevice>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.find_by_mac(mac).await
        }
        async fn find_by_ip(&self, ip: &str, exclude: Option<DeviceId>) -> Result<Vec<NetworkDevice>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.find_by_ip(ip, exclude).await
        }
        async fn list(&self) -> Result<Vec<NetworkDevice>, StoreError> {
            self.inner.list().await
        }
        async fn upsert(&self, device: NetworkDevice) -> Result<(), StoreError> {
            self.inner.upsert(device).await
        }
        async fn subnets(&self) -> Result<Vec<Subnet>, StoreError> {
            self.inner.subnets().await
        }
        async fn count_for_host(&self, host_id: &str) -> Result<usize, StoreError> {
            self.inner.count_for_host(host_id).await
        }
    }

    fn observed(ip: &str, mac: Option<&str>, name: &str) -> ObservedDevice {
        ObservedDevice {
            ip_address: ip.to_string(),
            mac_address: mac.map(str::to_string),
            hostname: name.to_string(),
            kind: DeviceKind::Server,
            online: true,
            is_static: false,
            source: DeviceSource::Docker,
            notes: None,
        }
    }

    fn subnet(cidr: &str) -> Subnet {
        Subnet {
            id: Uuid::new_v4(),
            name: cidr.to_string(),
            cidr: cidr.to_string(),
            vlan_id: None,
            gateway: None,
        }
    }

    #[test]
    fn test_first_containing_subnet_wins() {
        let wide = subnet("10.0.0.0/8");
        let narrow = subnet("10.1.0.0/16");
        let subnets = vec![wide.clone(), narrow];
        assert_eq!(resolve_subnet(&subnets, "10.1.2.3"), Some(wide.id));
        assert_eq!(resolve_subnet(&subnets, "192.168.1.1"), None);
        assert_eq!(resolve_subnet(&subnets, "not-an-ip"), None);
    }

    #[tokio::test]
    async fn test_mac_keeps_existing_when_observation_has_none() {
        let registry = Arc::new(DeviceRegistry::in_memory());
        let reconciler = Reconciler::new(registry.clone());

        let first = reconciler
            .reconcile(observed("10.0.0.5", Some("AA:BB:CC:00:00:01"), "web"), Some("pve1"))
            .await
            .unwrap();
        let second = reconciler
            .reconcile(observed("10.0.0.5", None, "web-renamed"), Some("pve1"))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.device_id, second.device_id);
        let device = registry.get(first.device_id).await.unwrap().unwrap();
        assert_eq!(device.mac_address.as_deref(), Some("aa:bb:cc:00:00:01"));
        assert_eq!(device.hostname, "web-renamed");
        assert!(device.last_seen >= device.first_seen);
    }

    #[tokio::test]
    async fn test_mac_learned_for_entry_first_seen_by_ip() {
        let registry = Arc::new(DeviceRegistry::in_memory());
        let reconciler = Reconciler::new(registry.clone());

        let first = reconciler.reconcile(observed("10.0.0.7", None, "printer"), None).await.unwrap();
        let second = reconciler
            .reconcile(observed("10.0.0.7", Some("AA-BB-CC-00-00-07"), "printer"), None)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.device_id, second.device_id);
        let devices = registry.list().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac_address.as_deref(), Some("aa:bb:cc:00:00:07"));
    }

    #[tokio::test]
    async fn test_observations_of_one_device_are_serialized() {
        let store = Arc::new(SlowLookups {
            inner: DeviceRegistry::in_memory(),
            delay: Duration::from_millis(50),
        });
        let reconciler = Reconciler::new(store.clone());
        let original = reconciler
            .reconcile(observed("10.0.0.5", Some("aa:bb:cc:00:00:05"), "web"), Some("h1"))
            .await
            .unwrap();

        // même device: l'un par MAC (nouvelle IP), l'autre par l'ancienne IP seule
        let moved = observed("10.0.0.6", Some("aa:bb:cc:00:00:05"), "web-moved");
        let mut by_ip = observed("10.0.0.5", None, "web-seen-by-ip");
        by_ip.notes = Some("seen-by-ip".into());
        let (a, b) = tokio::join!(
            reconciler.reconcile(moved, Some("h1")),
            reconciler.reconcile(by_ip, Some("h2"))
        );
        a.unwrap();
        b.unwrap();

        let device = store.get(original.device_id).await.unwrap().unwrap();
        assert_eq!(device.ip_address, "10.0.0.6");
        assert_eq!(device.hostname, "web-moved");

        // Either order is sequential: the IP-only update landed on the device
        // before it moved, or it created a fresh entry at the old address.
        let all = store.list().await.unwrap();
        let by_ip_kept = device.notes.as_deref() == Some("seen-by-ip")
            || all
                .iter()
                .any(|d| d.id != device.id && d.ip_address == "10.0.0.5" && d.notes.as_deref() == Some("seen-by-ip"));
        assert!(by_ip_kept);
        assert!(reconciler.locks.len() <= 3);
    }

    #[tokio::test]
    async fn test_locks_are_pruned_once_released() {
        let locks = KeyedLocks::new();
        {
            let guards = locks.acquire(vec!["ip:b".into(), "ip:a".into(), "ip:a".into()]).await;
            assert_eq!(guards.len(), 2);
        }
        let _guards = locks.acquire(vec!["ip:c".into()]).await;
        assert_eq!(locks.len(), 1);
    }
}
