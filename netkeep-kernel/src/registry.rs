/**
 * DEVICE REGISTRY - Registre durable des équipements réseau observés
 *
 * RÔLE : Stockage des NetworkDevice (clé primaire MAC, repli IP) et des subnets.
 * Persistance JSON optionnelle, rechargée au démarrage.
 *
 * Aucune suppression implicite : un device absent d'un scan reste enregistré.
 */

use crate::error::StoreError;
use crate::models::{DeviceId, NetworkDevice, Subnet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Registry persistence seam used by the reconciler and the conflict resolver.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, id: DeviceId) -> Result<Option<NetworkDevice>, StoreError>;
    /// Lookup by normalized MAC.
    async fn find_by_mac(&self, mac: &str) -> Result<Option<NetworkDevice>, StoreError>;
    /// Every entry holding `ip`, minus `exclude`.
    async fn find_by_ip(&self, ip: &str, exclude: Option<DeviceId>) -> Result<Vec<NetworkDevice>, StoreError>;
    async fn list(&self) -> Result<Vec<NetworkDevice>, StoreError>;
    /// Insert or replace by id.
    async fn upsert(&self, device: NetworkDevice) -> Result<(), StoreError>;
    async fn subnets(&self) -> Result<Vec<Subnet>, StoreError>;
    /// Number of entries naming `host_id` as owner.
    async fn count_for_host(&self, host_id: &str) -> Result<usize, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    devices: Vec<NetworkDevice>,
    subnets: Vec<Subnet>,
}

/// In-memory registry, optionally mirrored to a JSON file after every write.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, NetworkDevice>>,
    subnets: RwLock<Vec<Subnet>>,
    data_file: Option<PathBuf>,
    /// Held from snapshot to rename: files land in snapshot order
    save_lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn in_memory() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            subnets: RwLock::new(Vec::new()),
            data_file: None,
            save_lock: Mutex::new(()),
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            data_file: Some(path.into()),
            ..Self::in_memory()
        }
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    /// Charge le registre depuis le fichier JSON s'il existe
    pub async fn load(&self) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        if !path.exists() {
            info!("[registry] no existing registry file at {}, starting fresh", path.display());
            return Ok(());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        let count = snapshot.devices.len();
        *self.devices.write().await = snapshot.devices.into_iter().map(|d| (d.id, d)).collect();
        *self.subnets.write().await = snapshot.subnets;

        info!("[registry] loaded {} devices from {}", count, path.display());
        Ok(())
    }

    /// Sauvegarde le registre dans le fichier JSON (écriture temporaire puis rename)
    pub async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let _saving = self.save_lock.lock().await;

        let snapshot = {
            let devices = self.devices.read().await;
            let mut devices: Vec<NetworkDevice> = devices.values().cloned().collect();
            devices.sort_by(|a, b| a.ip_address.cmp(&b.ip_address).then(a.id.cmp(&b.id)));
            Snapshot {
                devices,
                subnets: self.subnets.read().await.clone(),
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("[registry] saved {} devices", snapshot.devices.len());
        Ok(())
    }

    /// Replace the subnet table, keeping ids of subnets already known by CIDR.
    pub async fn set_subnets(&self, subnets: Vec<Subnet>) -> Result<(), StoreError> {
        {
            let mut current = self.subnets.write().await;
            let known: HashMap<String, _> = current.iter().map(|s| (s.cidr.clone(), s.id)).collect();
            *current = subnets
                .into_iter()
                .map(|mut s| {
                    if let Some(id) = known.get(&s.cidr) {
                        s.id = *id;
                    }
                    s
                })
                .collect();
        }
        self.save().await
    }

}

/// Sibling file in the same directory, so the rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl DeviceStore for DeviceRegistry {
    async fn get(&self, id: DeviceId) -> Result<Option<NetworkDevice>, StoreError> {
        Ok(self.devices.read().await.get(&id).cloned())
    }

    async fn find_by_mac(&self, mac: &str) -> Result<Option<NetworkDevice>, StoreError> {
        let devices = self.devices.read().await;
        let mut matches: Vec<&NetworkDevice> = devices
            .values()
            .filter(|d| d.mac_address.as_deref() == Some(mac))
            .collect();
        if matches.len() > 1 {
            warn!("[registry] {} entries share MAC {}", matches.len(), mac);
        }
        // Le plus ancien gagne, pour rester déterministe
        matches.sort_by_key(|d| (d.first_seen, d.id));
        Ok(matches.first().map(|d| (*d).clone()))
    }

    async fn find_by_ip(&self, ip: &str, exclude: Option<DeviceId>) -> Result<Vec<NetworkDevice>, StoreError> {
        let devices = self.devices.read().await;
        let mut matches: Vec<NetworkDevice> = devices
            .values()
            .filter(|d| d.ip_address == ip && Some(d.id) != exclude)
            .cloned()
            .collect();
        matches.sort_by_key(|d| (d.first_seen, d.id));
        Ok(matches)
    }

    async fn list(&self) -> Result<Vec<NetworkDevice>, StoreError> {
        let mut devices: Vec<NetworkDevice> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.ip_address.cmp(&b.ip_address).then(a.id.cmp(&b.id)));
        Ok(devices)
    }

    async fn upsert(&self, device: NetworkDevice) -> Result<(), StoreError> {
        self.devices.write().await.insert(device.id, device);
        self.save().await
    }

    async fn subnets(&self) -> Result<Vec<Subnet>, StoreError> {
        Ok(self.subnets.read().await.clone())
    }

    async fn count_for_host(&self, host_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.host_id.as_deref() == Some(host_id))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, DeviceSource};
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn device(ip: &str, mac: Option<&str>) -> NetworkDevice {
        let now = OffsetDateTime::now_utc();
        NetworkDevice {
            id: Uuid::new_v4(),
            ip_address: ip.to_string(),
            mac_address: mac.map(str::to_string),
            hostname: "dev".into(),
            kind: DeviceKind::Unknown,
            online: true,
            first_seen: now,
            last_seen: now,
            host_id: Some("pve1".into()),
            is_static: false,
            source: DeviceSource::ManualEntry,
            notes: None,
            open_ports: None,
            subnet_id: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_ip_honours_exclusion() {
        let registry = DeviceRegistry::in_memory();
        let a = device("10.0.0.5", Some("aa:aa:aa:aa:aa:aa"));
        let b = device("10.0.0.5", None);
        registry.upsert(a.clone()).await.unwrap();
        registry.upsert(b.clone()).await.unwrap();

        assert_eq!(registry.find_by_ip("10.0.0.5", None).await.unwrap().len(), 2);
        let others = registry.find_by_ip("10.0.0.5", Some(a.id)).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, b.id);

        let by_mac = registry.find_by_mac("aa:aa:aa:aa:aa:aa").await.unwrap().unwrap();
        assert_eq!(by_mac.id, a.id);
        assert_eq!(registry.count_for_host("pve1").await.unwrap(), 2);
        assert_eq!(registry.count_for_host("nas").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_leave_a_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let registry = Arc::new(DeviceRegistry::with_file(path.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..40 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.upsert(device(&format!("10.0.1.{i}"), None)).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let reloaded = DeviceRegistry::with_file(path.clone());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.list().await.unwrap().len(), 40);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_subnet_ids_survive_reconfiguration() {
        let registry = DeviceRegistry::in_memory();
        let lan = Subnet {
            id: Uuid::new_v4(),
            name: "lan".into(),
            cidr: "192.168.1.0/24".into(),
            vlan_id: None,
            gateway: None,
        };
        registry.set_subnets(vec![lan.clone()]).await.unwrap();

        let renamed = Subnet { id: Uuid::new_v4(), name: "home".into(), ..lan.clone() };
        registry.set_subnets(vec![renamed]).await.unwrap();

        let subnets = registry.subnets().await.unwrap();
        assert_eq!(subnets[0].id, lan.id);
        assert_eq!(subnets[0].name, "home");
    }
}
