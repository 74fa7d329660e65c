//! Container IP migration planning
//!
//! `suggest` scans a range inside one /24 in ascending order and hands each
//! container the first address the conflict checker reports as free.
//! `analyze` lists a host's containers with the reasons they may need moving.

use crate::conflict::ConflictChecker;
use crate::error::{Error, Result};
use crate::inventory::{ContainerCollector, DiscoveredContainer};
use crate::models::{ConflictDetail, ConflictSource, Host, IpSuggestion, SuggestedIp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTarget {
    pub container_id: String,
    pub container_name: String,
    pub current_ip: Option<String>,
}

impl From<&DiscoveredContainer> for MigrationTarget {
    fn from(c: &DiscoveredContainer) -> Self {
        Self {
            container_id: c.id.clone(),
            container_name: c.name.clone(),
            current_ip: c.primary_ip().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationCandidate {
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub current_ip: Option<String>,
    pub network_mode: Option<String>,
    pub networks: Vec<String>,
    pub conflicts: Vec<ConflictDetail>,
    pub reasons: Vec<String>,
    pub needs_migration: bool,
}

/// Validated scan bounds: shared /24 prefix plus first and last octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    prefix: [u8; 3],
    first: u8,
    last: u8,
}

impl IpRange {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            s.trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| Error::InvalidRange(format!("{s} is not an IPv4 address")))
        };
        let (start_ip, end_ip) = (parse(start)?, parse(end)?);
        let (a, b) = (start_ip.octets(), end_ip.octets());
        if a[..3] != b[..3] {
            return Err(Error::InvalidRange(format!("{start} and {end} are not in the same /24")));
        }
        if a[3] > b[3] {
            return Err(Error::InvalidRange(format!("{start} is after {end}")));
        }
        Ok(Self {
            prefix: [a[0], a[1], a[2]],
            first: a[3],
            last: b[3],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (self.first..=self.last).map(|octet| Ipv4Addr::new(self.prefix[0], self.prefix[1], self.prefix[2], octet))
    }
}

const DEFAULT_MODES: [&str; 3] = ["default", "bridge", "host"];

pub struct MigrationPlanner {
    checker: Arc<dyn ConflictChecker>,
    containers: ContainerCollector,
}

impl MigrationPlanner {
    pub fn new(checker: Arc<dyn ConflictChecker>, containers: ContainerCollector) -> Self {
        Self { checker, containers }
    }

    /// One suggestion per target, in target order.
    pub async fn suggest(&self, targets: &[MigrationTarget], range_start: &str, range_end: &str) -> Result<Vec<IpSuggestion>> {
        let range = IpRange::parse(range_start, range_end)?;
        let mut taken: HashSet<Ipv4Addr> = HashSet::new();
        let mut suggestions = Vec::with_capacity(targets.len());

        for target in targets {
            let mut last_conflicts = Vec::new();
            let mut chosen = None;

            for ip in range.iter() {
                if taken.contains(&ip) {
                    continue;
                }
                let result = self.checker.check(&ip.to_string(), None).await;
                if result.is_available {
                    chosen = Some(ip);
                    break;
                }
                debug!("[migration] {} rejected for {}: {} conflicts", ip, target.container_name, result.conflicts.len());
                last_conflicts = result.conflicts;
            }

            let suggestion = match chosen {
                Some(ip) => {
                    taken.insert(ip);
                    IpSuggestion {
                        container_id: target.container_id.clone(),
                        container_name: target.container_name.clone(),
                        current_ip: target.current_ip.clone(),
                        suggested_ip: SuggestedIp::Available(ip),
                        has_conflict: false,
                        conflicts: Vec::new(),
                    }
                }
                None => IpSuggestion {
                    container_id: target.container_id.clone(),
                    container_name: target.container_name.clone(),
                    current_ip: target.current_ip.clone(),
                    suggested_ip: SuggestedIp::NoneAvailable,
                    has_conflict: true,
                    conflicts: last_conflicts,
                },
            };
            info!("[migration] {} -> {}", target.container_name, suggestion.suggested_ip);
            suggestions.push(suggestion);
        }

        Ok(suggestions)
    }

    /// Resolve container ids (full or unambiguous prefix) on a host, in request order.
    pub async fn targets_for(&self, host: &Host, container_ids: &[String]) -> Result<Vec<MigrationTarget>> {
        let containers = self.containers.list(host).await?;
        container_ids
            .iter()
            .map(|wanted| {
                let mut matches = containers.iter().filter(|c| c.id == *wanted || c.id.starts_with(wanted.as_str()));
                match (matches.next(), matches.next()) {
                    (Some(c), None) => Ok(MigrationTarget::from(c)),
                    _ => Err(Error::not_found("container", wanted.clone())),
                }
            })
            .collect()
    }

    pub async fn analyze(&self, host: &Host) -> Result<Vec<MigrationCandidate>> {
        let containers = self.containers.list(host).await?;
        let mut candidates = Vec::with_capacity(containers.len());

        for container in &containers {
            let mut reasons = Vec::new();
            match container.network_mode.as_deref() {
                Some("host") => reasons.push("uses host networking".to_string()),
                Some(mode) if DEFAULT_MODES.contains(&mode) => reasons.push("on the default bridge network".to_string()),
                _ => {}
            }

            let current_ip = container.primary_ip().map(str::to_string);
            let conflicts = match &current_ip {
                Some(ip) => {
                    let result = self.checker.check(ip, None).await;
                    result
                        .conflicts
                        .into_iter()
                        .filter(|d| !is_own_record(d, host, container))
                        .collect()
                }
                None => Vec::new(),
            };
            if !conflicts.is_empty() {
                reasons.push(format!("address contested by {} other records", conflicts.len()));
            }

            candidates.push(MigrationCandidate {
                container_id: container.id.clone(),
                container_name: container.name.clone(),
                image: container.image.clone(),
                current_ip,
                network_mode: container.network_mode.clone(),
                networks: container.networks.iter().map(|n| n.network.clone()).collect(),
                needs_migration: !reasons.is_empty(),
                conflicts,
                reasons,
            });
        }

        info!(
            "[migration] {}: {} of {} containers flagged",
            host.id,
            candidates.iter().filter(|c| c.needs_migration).count(),
            candidates.len()
        );
        Ok(candidates)
    }
}

/// The container's own Docker record, or its own registry entry.
fn is_own_record(detail: &ConflictDetail, host: &Host, container: &DiscoveredContainer) -> bool {
    matches!(detail.source, ConflictSource::Docker | ConflictSource::Database)
        && detail.device_name == container.name
        && detail.host.as_deref() == Some(host.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::models::{ConflictResult, DeviceId};
    use crate::remote::{Prober, RemoteExecutor};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Unused;

    #[async_trait]
    impl RemoteExecutor for Unused {
        async fn execute(&self, _host: &Host, command: &str) -> std::result::Result<String, ExecError> {
            Err(ExecError::Command {
                command: command.to_string(),
                exit_code: Some(127),
                stderr: String::new(),
            })
        }
    }

    /// Taken addresses are reported as conflicts; every query is recorded.
    struct TakenSet {
        taken: Vec<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConflictChecker for TakenSet {
        async fn check(&self, ip: &str, _exclude: Option<DeviceId>) -> ConflictResult {
            self.asked.lock().push(ip.to_string());
            let conflicts = if self.taken.iter().any(|t| *t == ip) {
                vec![ConflictDetail {
                    source: ConflictSource::Database,
                    device_name: format!("holder-of-{ip}"),
                    host: None,
                    mac_address: None,
                    details: "registry entry".into(),
                    status: "Online".into(),
                }]
            } else {
                vec![]
            };
            ConflictResult::from_evidence(ip, conflicts, vec![])
        }
    }

    fn planner(taken: Vec<&'static str>) -> (MigrationPlanner, Arc<TakenSet>) {
        let checker = Arc::new(TakenSet { taken, asked: Mutex::new(vec![]) });
        let containers = ContainerCollector::new(Prober::new(Arc::new(Unused)));
        (MigrationPlanner::new(checker.clone(), containers), checker)
    }

    fn target(name: &str) -> MigrationTarget {
        MigrationTarget {
            container_id: format!("{name}-id"),
            container_name: name.to_string(),
            current_ip: None,
        }
    }

    #[tokio::test]
    async fn test_first_free_address_in_ascending_order() {
        let (planner, checker) = planner(vec!["192.168.1.100", "192.168.1.101"]);
        let out = planner.suggest(&[target("web")], "192.168.1.100", "192.168.1.110").await.unwrap();

        assert_eq!(out[0].suggested_ip, SuggestedIp::Available(Ipv4Addr::new(192, 168, 1, 102)));
        assert!(!out[0].has_conflict);
        assert_eq!(*checker.asked.lock(), vec!["192.168.1.100", "192.168.1.101", "192.168.1.102"]);
    }

    #[tokio::test]
    async fn test_batch_never_suggests_the_same_address_twice() {
        let (planner, checker) = planner(vec![]);
        let out = planner
            .suggest(&[target("a"), target("b")], "10.0.0.10", "10.0.0.20")
            .await
            .unwrap();

        assert_eq!(out[0].suggested_ip.to_string(), "10.0.0.10");
        assert_eq!(out[1].suggested_ip.to_string(), "10.0.0.11");
        assert_eq!(*checker.asked.lock(), vec!["10.0.0.10", "10.0.0.11"]);
    }

    #[tokio::test]
    async fn test_exhausted_range_keeps_last_evidence() {
        let (planner, _) = planner(vec!["10.0.0.1", "10.0.0.2"]);
        let out = planner.suggest(&[target("db")], "10.0.0.1", "10.0.0.2").await.unwrap();

        assert_eq!(out[0].suggested_ip, SuggestedIp::NoneAvailable);
        assert_eq!(out[0].suggested_ip.to_string(), "No available IP found");
        assert!(out[0].has_conflict);
        assert_eq!(out[0].conflicts[0].device_name, "holder-of-10.0.0.2");
    }

    #[tokio::test]
    async fn test_range_validation() {
        let (planner, checker) = planner(vec![]);
        for (start, end) in [("10.0.0.1", "10.0.1.5"), ("10.0.0.9", "10.0.0.1"), ("nope", "10.0.0.1")] {
            let err = planner.suggest(&[target("x")], start, end).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRange(_)));
        }
        assert!(checker.asked.lock().is_empty());
    }
}
