use async_trait::async_trait;
use netkeep_devkit::{ContainerFixture, TestHarness};
use netkeep_kernel::discovery::parse::RawFacts;
use netkeep_kernel::discovery::{DiscoveryMethod, EnrichedFacts, SystemInfoEnricher};
use netkeep_kernel::{ConnectFailure, DeviceSource, DeviceStore, HostStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_sync_all_hosts_with_one_timed_out_host() {
    let harness = TestHarness::new()
        .host("pve1", "192.168.1.10")
        .host("pve2", "192.168.1.11")
        .host("slow", "192.168.1.12")
        .host_timeout_secs(1);
    harness
        .shell
        .host("pve1")
        .docker(&[ContainerFixture::running("aaa111", "web", "192.168.1.50", "02:42:c0:a8:01:32")]);
    harness.shell.host("pve2").no_docker();
    harness.shell.slow_host("slow", Duration::from_secs(3));
    let netkeep = harness.build().await.unwrap();

    let result = netkeep.sync_all_hosts().await;
    assert!(result.success);
    let report = result.data.unwrap();

    assert_eq!(report.total_servers, 3);
    assert_eq!(report.successful_servers, 2);
    assert_eq!(report.failed_servers, 1);

    let slow = report.results.iter().find(|r| r.host_id == "slow").unwrap();
    assert!(!slow.success);
    assert!(slow.error.as_deref().unwrap().contains("timed out"));

    let pve1 = report.results.iter().find(|r| r.host_id == "pve1").unwrap();
    assert_eq!(pve1.containers.as_ref().unwrap().created, 1);
    // docker absent: source ignorée, host quand même synchronisé
    let pve2 = report.results.iter().find(|r| r.host_id == "pve2").unwrap();
    assert!(pve2.success);
    assert!(pve2.containers.is_none());

    assert_eq!(netkeep.hosts().get("slow").unwrap().status, HostStatus::Offline);
    assert_eq!(netkeep.hosts().get("pve1").unwrap().status, HostStatus::Online);
}

#[tokio::test]
async fn test_unreachable_host_reports_reason() {
    let harness = TestHarness::new().host("nas", "192.168.1.20");
    harness.shell.host_down("nas", ConnectFailure::Authentication);
    let netkeep = harness.build().await.unwrap();

    let report = netkeep.sync_all_hosts().await.data.unwrap();
    assert_eq!(report.failed_servers, 1);
    assert!(report.results[0].error.as_deref().unwrap().contains("authentication failed"));
}

#[tokio::test]
async fn test_zero_hosts_is_still_a_report() {
    let netkeep = TestHarness::new().build().await.unwrap();
    let result = netkeep.sync_all_hosts().await;
    assert!(result.success);
    assert_eq!(result.data.unwrap().total_servers, 0);
}

#[tokio::test]
async fn test_interfaces_and_guests_are_reconciled() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10").subnet("lan", "192.168.1.0/24");
    let ha_addrs: &[(&str, &str)] = &[("52:54:00:aa:bb:01", "192.168.1.60/24")];
    harness
        .shell
        .host("pve1")
        .no_docker()
        .interfaces(&[("vmbr0", "192.168.1.10/24", "52:54:00:00:00:10")])
        .virsh(&[("homeassistant", true, ha_addrs), ("old-vm", false, &[])]);
    let netkeep = harness.build().await.unwrap();

    let ifaces = netkeep.sync_interfaces("pve1").await;
    assert!(ifaces.success, "{:?}", ifaces.error);
    assert_eq!(ifaces.data.unwrap().reconciled.created, 1);

    let vms = netkeep.sync_virtual_machines("pve1").await.data.unwrap();
    assert_eq!(vms.observed, 1);

    let devices = harness.registry.list().await.unwrap();
    assert_eq!(devices.len(), 2);
    let iface = devices.iter().find(|d| d.ip_address == "192.168.1.10").unwrap();
    assert_eq!(iface.source, DeviceSource::Other);
    assert_eq!(iface.mac_address.as_deref(), Some("52:54:00:00:00:10"));
    assert!(iface.subnet_id.is_some());
    let guest = devices.iter().find(|d| d.ip_address == "192.168.1.60").unwrap();
    assert_eq!(guest.hostname, "homeassistant");
    assert_eq!(guest.source, DeviceSource::VirtualMachine);
}

#[tokio::test]
async fn test_discover_system_updates_host() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").debian_system("pve1");
    let netkeep = harness.build().await.unwrap();

    let result = netkeep.discover_system("pve1").await;
    assert!(result.success);
    let discovery = result.data.unwrap();
    assert_eq!(discovery.os_name.as_deref(), Some("Debian GNU/Linux 12 (bookworm)"));
    assert_eq!(discovery.updates.unwrap().security, Some(1));

    let host = netkeep.hosts().get("pve1").unwrap();
    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.os.as_deref(), Some("Debian GNU/Linux 12 (bookworm)"));

    let missing = netkeep.discover_system("ghost").await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("host not found: ghost"));
}

struct LabelingEnricher;

#[async_trait]
impl SystemInfoEnricher for LabelingEnricher {
    async fn enrich(&self, raw: &RawFacts) -> netkeep_kernel::Result<EnrichedFacts> {
        Ok(EnrichedFacts {
            summary: Some(format!("{} categories collected", raw.len())),
            confidence: 0.81,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_discover_system_with_enricher() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").debian_system("pve1");
    let netkeep = harness.build().await.unwrap().with_enricher(Arc::new(LabelingEnricher));

    let discovery = netkeep.discover_system("pve1").await.data.unwrap();
    assert_eq!(discovery.method, Some(DiscoveryMethod::Enriched));
    assert_eq!(discovery.confidence, 0.81);
    assert!(discovery.summary.unwrap().ends_with("categories collected"));
    // champs absents de l'enrichissement => parsing manuel
    assert_eq!(discovery.hostname.as_deref(), Some("pve1"));
}

#[tokio::test]
async fn test_discovered_containers_carry_ports_and_labels() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").docker(&[
        ContainerFixture::running("aaa111", "proxy", "192.168.1.50", "02:42:c0:a8:01:32")
            .ports("0.0.0.0:443->443/tcp, 0.0.0.0:80->80/tcp")
            .labels(r#"{"traefik.http.routers.app.rule":"Host(`a.lan`,`b.lan`)","com.docker.compose.project":"edge"}"#),
        ContainerFixture::running("bbb222", "cache", "192.168.1.51", "02:42:c0:a8:01:33").ports("6379/tcp"),
    ]);
    let netkeep = harness.build().await.unwrap();

    let containers = netkeep.discover_containers("pve1").await.data.unwrap();
    let proxy = &containers[0];
    assert_eq!(proxy.ports.len(), 2);
    assert!(proxy.is_web_service);
    assert_eq!(proxy.service_url.as_deref(), Some("https://192.168.1.10:443"));
    assert_eq!(proxy.labels["traefik.http.routers.app.rule"], "Host(`a.lan`,`b.lan`)");
    assert_eq!(proxy.labels["com.docker.compose.project"], "edge");

    let cache = &containers[1];
    assert_eq!(cache.ports[0].host_port, None);
    assert!(!cache.is_web_service);
    assert!(cache.labels.is_empty());
}

#[tokio::test]
async fn test_single_slot_sync_runs_hosts_one_after_another() {
    let harness = TestHarness::new()
        .host("pve1", "192.168.1.10")
        .host("pve2", "192.168.1.11")
        .max_parallel_hosts(1);
    for id in ["pve1", "pve2"] {
        harness.shell.host(id).no_docker();
    }
    let netkeep = harness.build().await.unwrap();

    let report = netkeep.sync_all_hosts().await.data.unwrap();
    assert_eq!(report.successful_servers, 2);

    // un seul permis: les commandes d'un host ne s'entrelacent pas avec l'autre
    let order: Vec<String> = harness.shell.calls().into_iter().map(|c| c.host_id).collect();
    let switches = order.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(switches, 1, "{order:?}");
}

#[tokio::test]
async fn test_terminal_session_lifecycle() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").tmux("root@pve1:~# uptime\n 10:00:00 up 3 days");
    let netkeep = harness.build().await.unwrap();

    let capture = netkeep.run_terminal_command("pve1", "uptime").await.data.unwrap();
    assert!(capture.best_effort);
    assert!(capture.output.contains("up 3 days"));

    assert_eq!(netkeep.close_terminal_session("pve1").await.data, Some(true));
    assert_eq!(netkeep.close_terminal_session("pve1").await.data, Some(false));
    let kills = harness
        .shell
        .commands_for("pve1")
        .into_iter()
        .filter(|c| c.starts_with("tmux kill-session"))
        .count();
    assert_eq!(kills, 1);
}
