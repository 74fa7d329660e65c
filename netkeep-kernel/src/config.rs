use crate::error::Error;
use crate::models::{CredentialRef, Host, Subnet};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KernelConfig {
    #[serde(default)]
    pub hosts: HashMap<String, HostConf>,
    #[serde(default)]
    pub subnets: Vec<SubnetConf>,
    #[serde(default)]
    pub registry: RegistryConf,
    #[serde(default)]
    pub discovery: DiscoveryConf,
    #[serde(default)]
    pub terminal: TerminalConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostConf {
    pub address: String,
    pub name: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub credential: CredentialRef,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubnetConf {
    pub name: String,
    pub cidr: String, // ex: "192.168.1.0/24"
    pub vlan_id: Option<u16>,
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RegistryConf {
    /// Fichier JSON du registre; absent => registre en mémoire
    pub data_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConf {
    pub connect_timeout_secs: u64,
    pub host_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub max_parallel_hosts: usize,
    pub sync_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TerminalConf {
    /// Délai fixe entre send-keys et capture-pane
    pub settle_ms: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".into()
}

impl Default for DiscoveryConf {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            host_timeout_secs: 60,
            probe_timeout_ms: 1000,
            max_parallel_hosts: 4,
            sync_interval_secs: 300,
        }
    }
}

impl Default for TerminalConf {
    fn default() -> Self {
        Self { settle_ms: 1500 }
    }
}

impl DiscoveryConf {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl KernelConfig {
    /// Hosts déclarés, triés par id pour un ordre stable.
    pub fn build_hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self
            .hosts
            .iter()
            .map(|(id, conf)| {
                let mut host = Host::new(id.clone(), conf.address.clone());
                host.name = conf.name.clone().unwrap_or_else(|| id.clone());
                host.port = conf.port;
                host.username = conf.username.clone();
                host.credential = conf.credential.clone();
                host
            })
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    /// Subnets dans l'ordre déclaré (le premier qui contient une IP gagne).
    pub fn build_subnets(&self) -> Vec<Subnet> {
        self.subnets
            .iter()
            .map(|s| Subnet {
                id: uuid::Uuid::new_v4(),
                name: s.name.clone(),
                cidr: s.cidr.clone(),
                vlan_id: s.vlan_id,
                gateway: s.gateway.clone(),
            })
            .collect()
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt).map_err(|e| Error::Config(e.to_string()))
}

pub async fn load_config_from(path: &Path) -> Result<KernelConfig, Error> {
    let txt = fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    parse_config(&txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("NETKEEP_CONFIG").unwrap_or_else(|_| "netkeep.yaml".into());
    if Path::new(&path).exists() {
        load_config_from(Path::new(&path)).await.unwrap_or_else(|e| {
            warn!("invalid config, using defaults: {e}");
            KernelConfig::default()
        })
    } else {
        info!("no {path}, using default config");
        KernelConfig::default()
    }
}
