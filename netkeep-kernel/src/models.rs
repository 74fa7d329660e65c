//! Domain model shared by every collector
//!
//! - `Host`: a managed machine reachable over SSH
//! - `NetworkDevice` / `Subnet`: durable registry entries
//! - `ConflictDetail` / `ConflictResult`: evidence that an IP is in use
//! - `IpSuggestion`: migration planner output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use time::OffsetDateTime;
use uuid::Uuid;

pub type HostId = String;
pub type DeviceId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Warning,
    Critical,
    Offline,
}

/// How the executor authenticates against a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRef {
    /// Private key file on the controller
    KeyFile { path: String },
    /// Password read from an environment variable
    PasswordEnv { var: String },
    /// Password stored in the OS keyring under the `netkeep` service
    Keyring { entry: String },
    /// Default keys from ~/.ssh
    DefaultKeys,
}

impl Default for CredentialRef {
    fn default() -> Self {
        CredentialRef::DefaultKeys
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: CredentialRef,
    pub os: Option<String>,
    pub last_check: Option<OffsetDateTime>,
    pub status: HostStatus,
}

impl Host {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            address: address.into(),
            port: 22,
            username: "root".to_string(),
            credential: CredentialRef::default(),
            os: None,
            last_check: None,
            status: HostStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Server,
    VirtualMachine,
    NetworkInterface,
    IoT,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSource {
    Docker,
    NetworkScan,
    VirtualMachine,
    ManualEntry,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub id: DeviceId,
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub hostname: String,
    pub kind: DeviceKind,
    pub online: bool,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
    pub host_id: Option<HostId>,
    pub is_static: bool,
    pub source: DeviceSource,
    pub notes: Option<String>,
    pub open_ports: Option<Vec<u16>>,
    pub subnet_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: Uuid,
    pub name: String,
    pub cidr: String,
    pub vlan_id: Option<u16>,
    pub gateway: Option<String>,
}

/// A fresh sighting of a device by one collector, before reconciliation.
#[derive(Debug, Clone)]
pub struct ObservedDevice {
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub hostname: String,
    pub kind: DeviceKind,
    pub online: bool,
    pub is_static: bool,
    pub source: DeviceSource,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictSource {
    Database,
    Docker,
    #[serde(rename = "VM")]
    Vm,
    NetworkInterface,
    NetworkScan,
}

impl fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictSource::Database => "Database",
            ConflictSource::Docker => "Docker",
            ConflictSource::Vm => "VM",
            ConflictSource::NetworkInterface => "NetworkInterface",
            ConflictSource::NetworkScan => "NetworkScan",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub source: ConflictSource,
    pub device_name: String,
    /// Owning host id
    pub host: Option<String>,
    pub mac_address: Option<String>,
    pub details: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResult {
    pub ip_address: String,
    pub is_available: bool,
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictDetail>,
    /// Hosts whose inventory could not be consulted (timeouts, SSH failures).
    pub unreachable_hosts: Vec<String>,
}

impl ConflictResult {
    pub fn from_evidence(ip: &str, conflicts: Vec<ConflictDetail>, unreachable_hosts: Vec<String>) -> Self {
        let is_available = conflicts.is_empty();
        Self {
            ip_address: ip.to_string(),
            is_available,
            has_conflict: !is_available,
            conflicts,
            unreachable_hosts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ip", rename_all = "snake_case")]
pub enum SuggestedIp {
    Available(Ipv4Addr),
    NoneAvailable,
}

impl fmt::Display for SuggestedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestedIp::Available(ip) => write!(f, "{ip}"),
            SuggestedIp::NoneAvailable => f.write_str("No available IP found"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSuggestion {
    pub container_id: String,
    pub container_name: String,
    pub current_ip: Option<String>,
    pub suggested_ip: SuggestedIp,
    pub has_conflict: bool,
    pub conflicts: Vec<ConflictDetail>,
}

/// Normalise une MAC : minuscules, séparateur ':'; vide => None.
pub fn normalize_mac(mac: Option<&str>) -> Option<String> {
    let mac = mac?.trim();
    if mac.is_empty() {
        return None;
    }
    Some(mac.replace('-', ":").to_ascii_lowercase())
}
