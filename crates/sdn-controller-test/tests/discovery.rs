//! Pool connection tests
//!
//! Covers overlay discovery from network metadata, legacy metadata
//! migration, tunnel-identifier backfill, CA installation policy and
//! reconfiguration.

use pretty_assertions::assert_eq;
use sdn_controller::consts::SDN_CONTROLLER_CERT;
use sdn_controller::{ControllerOptions, OverlayController};
use sdn_controller_test::{
    api, controller, controller_with, fresh_credentials, opaque, test_credentials, verify_overlays,
    verify_tunnel_active, PoolBuilder,
};
use sdn_types::metadata::{self, legacy};
use sdn_types::{ObjectId, PrivateNetworkId};
use std::sync::Arc;
use std::time::Duration;

fn options(override_certs: bool) -> ControllerOptions {
    ControllerOptions {
        call_timeout: Duration::from_secs(5),
        override_certs,
        ..ControllerOptions::default()
    }
}

#[tokio::test]
async fn test_discovery_migrates_and_rebuilds_overlays() {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-a")
        .managed()
        .host("a1", "10.0.0.1")
        .host("a2", "10.0.0.2")
        .network(
            "legacy",
            &[
                (legacy::PRIVATE_POOL_WIDE, "true"),
                (legacy::CROSS_POOL_NETWORK_UUID, "overlay-1"),
                ("vni", "7"),
                ("encapsulation", "vxlan"),
            ],
        )
        .tunnel("a1", "legacy")
        .tunnel("a2", "legacy")
        .network("fresh", &[(metadata::PRIVATE_NETWORK_UUID, "overlay-2")])
        .network("plain", &[])
        .build();

    controller.on_pool_connected(api(&pool)).await;

    let legacy_net = pool.network(&opaque("legacy")).unwrap();
    assert_eq!(legacy_net.meta(metadata::PRIVATE_NETWORK_UUID), Some("overlay-1"));
    assert_eq!(legacy_net.meta(metadata::VNI), Some("7"));
    assert_eq!(legacy_net.meta(metadata::ENCAPSULATION), Some("vxlan"));
    assert_eq!(legacy_net.meta(metadata::PIF_DEVICE), Some("eth0"));
    assert_eq!(legacy_net.meta(metadata::VLAN), Some("-1"));
    for key in ["vni", "encapsulation", legacy::PRIVATE_POOL_WIDE, legacy::CROSS_POOL_NETWORK_UUID] {
        assert_eq!(legacy_net.meta(key), None, "{key} left behind");
    }

    // Overlays without an identifier get one above every identifier seen.
    let fresh = pool.network(&opaque("fresh")).unwrap();
    assert_eq!(fresh.meta(metadata::VNI), Some("8"));
    assert_eq!(controller.last_vni().as_u32(), 8);

    assert_eq!(
        controller.private_network_ids(),
        vec![PrivateNetworkId::new("overlay-1"), PrivateNetworkId::new("overlay-2")]
    );
    assert_eq!(
        controller.network_owner(&ObjectId::new("legacy")),
        Some(PrivateNetworkId::new("overlay-1"))
    );
    assert_eq!(controller.network_owner(&ObjectId::new("plain")), None);

    let pn = controller
        .private_network(&PrivateNetworkId::new("overlay-1"))
        .await
        .unwrap();
    assert_eq!(pn.center().unwrap().id, ObjectId::new("a1"));
    verify_tunnel_active(&pool, &opaque("a2"), &opaque("legacy"), true).unwrap();

    // Nobody has an interface on the fresh network yet.
    let pn = controller
        .private_network(&PrivateNetworkId::new("overlay-2"))
        .await
        .unwrap();
    assert!(pn.center().is_none());
    verify_overlays(&controller).await.unwrap();

    assert!(controller.is_managed_pool(&pool.id()));
    assert!(controller.switch_client(&ObjectId::new("a2")).is_some());
}

#[tokio::test]
async fn test_second_pool_joins_existing_star() {
    let (controller, switch) = controller();
    let pool_a = PoolBuilder::new("pool-a")
        .managed()
        .host("a1", "10.0.0.1")
        .network(
            "net-a",
            &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1"), (metadata::VNI, "3")],
        )
        .tunnel("a1", "net-a")
        .build();
    let pool_b = PoolBuilder::new("pool-b")
        .managed()
        .host("b1", "10.1.0.1")
        .network(
            "net-b",
            &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1"), (metadata::VNI, "3")],
        )
        .tunnel("b1", "net-b")
        .build();

    controller.on_pool_connected(api(&pool_a)).await;
    controller.on_pool_connected(api(&pool_b)).await;

    let pn = controller
        .private_network(&PrivateNetworkId::new("overlay-1"))
        .await
        .unwrap();
    assert_eq!(pn.networks().len(), 2);
    assert_eq!(pn.center().unwrap().id, ObjectId::new("a1"));
    verify_tunnel_active(&pool_b, &opaque("b1"), &opaque("net-b"), true).unwrap();
    verify_tunnel_active(&pool_a, &opaque("a1"), &opaque("net-a"), true).unwrap();

    let spoke = switch.ports_for(&ObjectId::new("b1"));
    assert_eq!(spoke.len(), 1);
    assert_eq!(spoke[0].request.vni.as_u32(), 3);
    assert_eq!(controller.last_vni().as_u32(), 3);
}

#[tokio::test]
async fn test_assigned_vni_rebuilds_star() {
    let (controller, switch) = controller();
    let pool_a = PoolBuilder::new("pool-a")
        .managed()
        .host("a1", "10.0.0.1")
        .network(
            "net-a",
            &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1"), (metadata::VNI, "3")],
        )
        .tunnel("a1", "net-a")
        .build();
    let pool_b = PoolBuilder::new("pool-b")
        .managed()
        .host("b1", "10.1.0.1")
        .network("net-b", &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1")])
        .tunnel("b1", "net-b")
        .build();

    controller.on_pool_connected(api(&pool_a)).await;
    switch.clear();
    controller.on_pool_connected(api(&pool_b)).await;

    let net_b = pool_b.network(&opaque("net-b")).unwrap();
    assert_eq!(net_b.meta(metadata::VNI), Some("4"));

    let reset_hosts: Vec<_> = switch.resets().into_iter().map(|r| r.host).collect();
    assert!(reset_hosts.contains(&ObjectId::new("a1")));
    assert!(reset_hosts.contains(&ObjectId::new("b1")));

    let pn = controller
        .private_network(&PrivateNetworkId::new("overlay-1"))
        .await
        .unwrap();
    assert_eq!(pn.center().unwrap().id, ObjectId::new("a1"));
    assert_eq!(controller.star_centers(), vec![ObjectId::new("a1")]);
    verify_tunnel_active(&pool_b, &opaque("b1"), &opaque("net-b"), true).unwrap();
    let spoke = switch.ports_for(&ObjectId::new("b1"));
    assert_eq!(spoke.len(), 1);
    assert_eq!(spoke[0].request.vni.as_u32(), 4);
}

#[tokio::test]
async fn test_unmanaged_pool_is_left_alone() {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-u")
        .host("u1", "10.0.0.1")
        .network("net", &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1")])
        .build();

    controller.on_pool_connected(api(&pool)).await;

    assert!(!controller.is_managed_pool(&pool.id()));
    assert!(controller.private_network_ids().is_empty());
    assert!(controller.switch_client(&ObjectId::new("u1")).is_none());
    assert_eq!(pool.call_count("certificate_list"), 0);
    assert_eq!(pool.subscriber_count(), 0);
}

#[tokio::test]
async fn test_connection_failure_is_contained() {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-a").managed().host("a1", "10.0.0.1").build();
    pool.fail("objects_fetched", "connection reset");

    controller.on_pool_connected(api(&pool)).await;

    assert!(!controller.is_managed_pool(&pool.id()));
    assert_eq!(pool.subscriber_count(), 0);
}

#[tokio::test]
async fn test_ca_installed_when_missing() {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-a").managed().build();

    controller.on_pool_connected(api(&pool)).await;

    assert_eq!(
        pool.certificates().get(SDN_CONTROLLER_CERT),
        Some(&test_credentials().ca_cert)
    );
    assert_eq!(pool.call_count("certificate_sync"), 1);
}

#[tokio::test]
async fn test_existing_ca_kept_without_override() {
    let (controller, _switch) = controller_with(options(false));
    let pool = PoolBuilder::new("pool-a")
        .managed()
        .certificate(SDN_CONTROLLER_CERT, "old")
        .build();

    controller.on_pool_connected(api(&pool)).await;

    assert_eq!(pool.certificates().get(SDN_CONTROLLER_CERT).map(String::as_str), Some("old"));
    assert_eq!(pool.call_count("certificate_install"), 0);
    assert_eq!(pool.call_count("certificate_uninstall"), 0);
}

#[tokio::test]
async fn test_existing_ca_replaced_with_override() {
    let (controller, _switch) = controller_with(options(true));
    let pool = PoolBuilder::new("pool-a")
        .managed()
        .certificate(SDN_CONTROLLER_CERT, "old")
        .build();

    controller.on_pool_connected(api(&pool)).await;

    assert_eq!(
        pool.certificates().get(SDN_CONTROLLER_CERT),
        Some(&test_credentials().ca_cert)
    );
    let methods: Vec<_> = pool
        .calls()
        .into_iter()
        .map(|c| c.method)
        .filter(|m| m.starts_with("certificate_"))
        .collect();
    assert_eq!(
        methods,
        vec!["certificate_list", "certificate_uninstall", "certificate_install", "certificate_sync"]
    );
}

#[tokio::test]
async fn test_ca_install_failure_does_not_block_discovery() {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-a")
        .managed()
        .host("a1", "10.0.0.1")
        .network(
            "net",
            &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1"), (metadata::VNI, "1")],
        )
        .tunnel("a1", "net")
        .build();
    pool.fail("certificate_install", "permission denied");

    controller.on_pool_connected(api(&pool)).await;

    assert!(pool.certificates().is_empty());
    assert_eq!(controller.private_network_ids(), vec![PrivateNetworkId::new("overlay-1")]);
    assert_eq!(controller.star_centers(), vec![ObjectId::new("a1")]);
}

async fn connected_overlay() -> (OverlayController, Arc<sdn_controller_test::MemoryPool>) {
    let (controller, _switch) = controller();
    let pool = PoolBuilder::new("pool-a")
        .managed()
        .host("a1", "10.0.0.1")
        .host("a2", "10.0.0.2")
        .network(
            "net",
            &[(metadata::PRIVATE_NETWORK_UUID, "overlay-1"), (metadata::VNI, "1")],
        )
        .tunnel("a1", "net")
        .tunnel("a2", "net")
        .build();
    controller.on_pool_connected(api(&pool)).await;
    (controller, pool)
}

#[tokio::test]
async fn test_reconfigure_swaps_credentials_and_reinstalls_ca() {
    let (controller, pool) = connected_overlay().await;
    let replacement = Arc::new(fresh_credentials());

    controller.reconfigure(replacement.clone(), true).await;

    assert!(controller.override_certs());
    assert!(Arc::ptr_eq(&controller.credentials(), &replacement));
    for host in ["a1", "a2"] {
        let client = controller.switch_client(&ObjectId::new(host)).unwrap();
        assert!(Arc::ptr_eq(&client.credentials(), &replacement));
    }
    assert_eq!(
        pool.certificates().get(SDN_CONTROLLER_CERT),
        Some(&replacement.ca_cert)
    );
    assert_eq!(pool.call_count("certificate_uninstall"), 1);
}

#[tokio::test]
async fn test_reconfigure_without_override_keeps_pool_ca() {
    let (controller, pool) = connected_overlay().await;
    let replacement = Arc::new(fresh_credentials());

    controller.reconfigure(replacement.clone(), false).await;

    let client = controller.switch_client(&ObjectId::new("a1")).unwrap();
    assert!(Arc::ptr_eq(&client.credentials(), &replacement));
    assert_eq!(
        pool.certificates().get(SDN_CONTROLLER_CERT),
        Some(&test_credentials().ca_cert)
    );
    assert_eq!(pool.call_count("certificate_install"), 1);
}
