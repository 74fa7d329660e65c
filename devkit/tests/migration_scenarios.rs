use netkeep_devkit::{ContainerFixture, TestHarness};
use netkeep_kernel::{DeviceStore, SuggestedIp};
use std::net::Ipv4Addr;

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_suggestion_skips_registered_and_responding_addresses() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").docker(&[
        ContainerFixture::running("aaa111", "web", "192.168.1.100", "02:42:c0:a8:01:64"),
        ContainerFixture::running("bbb222", "db", "172.17.0.3", "02:42:ac:11:00:03").on_bridge(),
    ]);
    harness.probe.respond("192.168.1.101");
    let netkeep = harness.build().await.unwrap();
    netkeep.reconcile_containers("pve1").await;

    let out = netkeep
        .suggest_migration_ips("pve1", &ids(&["bbb222"]), "192.168.1.100", "192.168.1.110")
        .await;
    assert!(out.success, "{:?}", out.error);
    let suggestions = out.data.unwrap();

    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].container_name, "db");
    assert_eq!(suggestions[0].current_ip.as_deref(), Some("172.17.0.3"));
    assert_eq!(suggestions[0].suggested_ip, SuggestedIp::Available(Ipv4Addr::new(192, 168, 1, 102)));
    assert_eq!(
        harness.probe.queried(),
        vec!["192.168.1.100".to_string(), "192.168.1.101".to_string(), "192.168.1.102".to_string()]
    );
}

#[tokio::test]
async fn test_exhausted_range_and_unknown_container() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness
        .shell
        .host("pve1")
        .docker(&[ContainerFixture::running("aaa111", "web", "192.168.1.100", "02:42:c0:a8:01:64")]);
    harness.probe.respond("192.168.1.101");
    let netkeep = harness.build().await.unwrap();
    netkeep.reconcile_containers("pve1").await;

    let out = netkeep
        .suggest_migration_ips("pve1", &ids(&["aaa"]), "192.168.1.100", "192.168.1.101")
        .await
        .data
        .unwrap();
    assert_eq!(out[0].suggested_ip, SuggestedIp::NoneAvailable);
    assert!(out[0].has_conflict);
    assert_eq!(out[0].conflicts[0].details, "Responds but not found in system");

    let missing = netkeep
        .suggest_migration_ips("pve1", &ids(&["zzz"]), "192.168.1.100", "192.168.1.101")
        .await;
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("container not found: zzz"));

    let bad_range = netkeep
        .suggest_migration_ips("pve1", &ids(&["aaa111"]), "192.168.1.100", "192.168.2.10")
        .await;
    assert!(!bad_range.success);
    assert!(bad_range.error.unwrap().starts_with("invalid IP range"));
}

#[tokio::test]
async fn test_analyze_flags_bridge_and_contested_containers() {
    let harness = TestHarness::new().host("pve1", "192.168.1.10");
    harness.shell.host("pve1").docker(&[
        ContainerFixture::running("aaa111", "web", "192.168.1.100", "02:42:c0:a8:01:64"),
        ContainerFixture::running("bbb222", "db", "172.17.0.3", "02:42:ac:11:00:03").on_bridge(),
        ContainerFixture::running("ccc333", "dns", "192.168.1.53", "02:42:c0:a8:01:35"),
    ]);
    let netkeep = harness.build().await.unwrap();
    netkeep.reconcile_containers("pve1").await;
    assert_eq!(harness.registry.list().await.unwrap().len(), 3);

    // réponse ICMP du container lui-même: déjà attribuée, donc pas contestée
    harness.probe.respond("192.168.1.53");
    let candidates = netkeep.analyze_migration_candidates("pve1").await.data.unwrap();

    let web = candidates.iter().find(|c| c.container_name == "web").unwrap();
    assert!(!web.needs_migration, "{:?}", web.reasons);
    assert!(web.conflicts.is_empty());

    let db = candidates.iter().find(|c| c.container_name == "db").unwrap();
    assert!(db.needs_migration);
    assert_eq!(db.reasons, vec!["on the default bridge network".to_string()]);

    let dns = candidates.iter().find(|c| c.container_name == "dns").unwrap();
    assert!(!dns.needs_migration);
}
