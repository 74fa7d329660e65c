use crate::error::{Error, Result};
use crate::models::{Host, HostId, HostStatus};
use crate::registry::DeviceStore;
use crate::state::{new_state, Shared};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::info;

/// Managed hosts, keyed by id.
#[derive(Clone)]
pub struct HostRegistry {
    hosts: Shared<BTreeMap<HostId, Host>>,
}

impl HostRegistry {
    pub fn new(hosts: Vec<Host>) -> Self {
        let hosts = hosts.into_iter().map(|h| (h.id.clone(), h)).collect();
        Self { hosts: new_state(hosts) }
    }

    /// Snapshot ordered by id.
    pub fn list(&self) -> Vec<Host> {
        self.hosts.lock().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<Host> {
        self.hosts
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("host", id))
    }

    pub fn register(&self, host: Host) {
        info!("[hosts] registered {} ({})", host.id, host.address);
        self.hosts.lock().insert(host.id.clone(), host);
    }

    /// Record the outcome of a discovery or health pass.
    pub fn record_check(&self, id: &str, status: HostStatus, os: Option<String>) -> Result<()> {
        let mut hosts = self.hosts.lock();
        let host = hosts.get_mut(id).ok_or_else(|| Error::not_found("host", id))?;
        host.status = status;
        host.last_check = Some(OffsetDateTime::now_utc());
        if os.is_some() {
            host.os = os;
        }
        Ok(())
    }

    /// Refuse while any registry entry still names the host as owner.
    pub async fn remove(&self, id: &str, store: &dyn DeviceStore) -> Result<Host> {
        self.get(id)?;
        let owned = store.count_for_host(id).await?;
        if owned > 0 {
            return Err(Error::HostInUse(format!("{id} ({owned} devices)")));
        }
        let removed = self
            .hosts
            .lock()
            .remove(id)
            .ok_or_else(|| Error::not_found("host", id))?;
        info!("[hosts] removed {}", id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, DeviceSource, NetworkDevice};
    use crate::registry::DeviceRegistry;
    use uuid::Uuid;

    #[test]
    fn test_record_check_keeps_known_os() {
        let hosts = HostRegistry::new(vec![Host::new("pve1", "10.0.0.2")]);
        hosts.record_check("pve1", HostStatus::Online, Some("Debian 12".into())).unwrap();
        hosts.record_check("pve1", HostStatus::Offline, None).unwrap();

        let host = hosts.get("pve1").unwrap();
        assert_eq!(host.status, HostStatus::Offline);
        assert_eq!(host.os.as_deref(), Some("Debian 12"));
        assert!(host.last_check.is_some());
        assert!(matches!(hosts.get("ghost"), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_remove_refuses_referenced_host() {
        let hosts = HostRegistry::new(vec![Host::new("pve1", "10.0.0.2"), Host::new("nas", "10.0.0.3")]);
        let store = DeviceRegistry::in_memory();
        let now = OffsetDateTime::now_utc();
        store
            .upsert(NetworkDevice {
                id: Uuid::new_v4(),
                ip_address: "10.0.0.50".into(),
                mac_address: None,
                hostname: "web".into(),
                kind: DeviceKind::Server,
                online: true,
                first_seen: now,
                last_seen: now,
                host_id: Some("pve1".into()),
                is_static: false,
                source: DeviceSource::Docker,
                notes: None,
                open_ports: None,
                subnet_id: None,
            })
            .await
            .unwrap();

        assert!(matches!(hosts.remove("pve1", &store).await, Err(Error::HostInUse(_))));
        assert_eq!(hosts.remove("nas", &store).await.unwrap().id, "nas");
        assert_eq!(hosts.list().len(), 1);
    }
}
