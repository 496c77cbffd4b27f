//! Legacy network metadata migrations.
//!
//! Older controller versions stored overlay metadata under different keys.
//! Every discovered network goes through [`MIGRATIONS`] in order. Each step
//! is a pure planning function returning the patch to apply (or nothing),
//! and every patch is a single atomic metadata update, so an interrupted
//! run is simply resumed by the next discovery.

use crate::error::InfraError;
use crate::infra::{InfraApi, InfraObject, NetworkRecord, PoolSnapshot};
use sdn_types::metadata::{self, legacy};
use sdn_types::{MetadataPatch, PrivateNetworkId};
use tracing::{debug, info};

/// Inputs available to a migration step.
pub struct MigrationContext<'a> {
    /// The network with every earlier step already applied.
    pub network: &'a NetworkRecord,
    pub snapshot: &'a PoolSnapshot,
    /// Identity to use if a step needs to mint an overlay id.
    pub fresh_id: &'a PrivateNetworkId,
}

/// One named migration step.
pub struct Migration {
    pub name: &'static str,
    pub plan: fn(&MigrationContext<'_>) -> Option<MetadataPatch>,
}

/// Registered migrations, applied in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "namespace-keys",
        plan: namespace_keys,
    },
    Migration {
        name: "private-pool-wide",
        plan: private_pool_wide,
    },
    Migration {
        name: "pif-device",
        plan: backfill_pif_device,
    },
    Migration {
        name: "vlan",
        plan: backfill_vlan,
    },
];

fn non_empty(patch: MetadataPatch) -> Option<MetadataPatch> {
    (!patch.is_empty()).then_some(patch)
}

/// Moves un-namespaced keys to their namespaced form.
fn namespace_keys(ctx: &MigrationContext<'_>) -> Option<MetadataPatch> {
    let mut patch = MetadataPatch::new();
    for &(old, new) in legacy::UNNAMESPACED {
        if ctx.network.meta(new).is_some() {
            continue;
        }
        if let Some(value) = ctx.network.meta(old) {
            patch = patch.delete(old).set(new, value);
        }
    }
    non_empty(patch)
}

/// Turns a single-pool private network into an overlay member.
fn private_pool_wide(ctx: &MigrationContext<'_>) -> Option<MetadataPatch> {
    if ctx.network.meta(legacy::PRIVATE_POOL_WIDE) != Some("true") {
        return None;
    }
    let uuid = ctx
        .network
        .meta(legacy::CROSS_POOL_NETWORK_UUID)
        .unwrap_or(ctx.fresh_id.as_str());
    Some(
        MetadataPatch::new()
            .delete(legacy::PRIVATE_POOL_WIDE)
            .delete(legacy::CROSS_POOL_NETWORK_UUID)
            .set(metadata::PRIVATE_NETWORK_UUID, uuid),
    )
}

/// Transport interface of any tunnel into this network.
fn transport_pif<'a>(ctx: &MigrationContext<'a>) -> Option<&'a crate::infra::PifRecord> {
    ctx.snapshot.tunnels().find_map(|tunnel| {
        let access = ctx.snapshot.pif(&tunnel.access_pif)?;
        if access.network != ctx.network.opaque_ref {
            return None;
        }
        ctx.snapshot.pif(&tunnel.transport_pif)
    })
}

fn backfill_pif_device(ctx: &MigrationContext<'_>) -> Option<MetadataPatch> {
    ctx.network.meta(metadata::PRIVATE_NETWORK_UUID)?;
    if ctx.network.meta(metadata::PIF_DEVICE).is_some() {
        return None;
    }
    let pif = transport_pif(ctx)?;
    Some(MetadataPatch::new().set(metadata::PIF_DEVICE, pif.device.clone()))
}

fn backfill_vlan(ctx: &MigrationContext<'_>) -> Option<MetadataPatch> {
    ctx.network.meta(metadata::PRIVATE_NETWORK_UUID)?;
    if ctx.network.meta(metadata::VLAN).is_some() {
        return None;
    }
    let pif = transport_pif(ctx)?;
    Some(MetadataPatch::new().set(metadata::VLAN, pif.vlan.to_string()))
}

/// Applies every pending migration to `network` and returns the network as
/// it is after the last applied step.
pub async fn run(
    api: &dyn InfraApi,
    snapshot: &PoolSnapshot,
    mut network: NetworkRecord,
) -> Result<NetworkRecord, InfraError> {
    let fresh_id = PrivateNetworkId::new(uuid::Uuid::new_v4().to_string());

    for migration in MIGRATIONS {
        let ctx = MigrationContext {
            network: &network,
            snapshot,
            fresh_id: &fresh_id,
        };
        let Some(patch) = (migration.plan)(&ctx) else {
            continue;
        };

        info!(
            migration = migration.name,
            network = %network.name_label,
            "Migrating network metadata"
        );
        api.update_other_config(&network.opaque_ref, &patch).await?;

        network = match api.barrier(&network.opaque_ref).await? {
            InfraObject::Network(updated) => updated,
            other => {
                debug!(kind = other.kind(), "Barrier returned a non-network object");
                return Err(InfraError::object_not_found(network.opaque_ref.as_str()));
            }
        };
    }

    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{IpConfigurationMode, PifRecord, TunnelRecord, TunnelStatus};
    use pretty_assertions::assert_eq;
    use sdn_types::{Metadata, ObjectId, OpaqueRef, VlanTag};

    fn network(entries: &[(&str, &str)]) -> NetworkRecord {
        NetworkRecord {
            id: ObjectId::new("net-1"),
            opaque_ref: OpaqueRef::new("OpaqueRef:net-1"),
            name_label: "private".to_string(),
            other_config: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Metadata>(),
        }
    }

    fn pif(name: &str, network: &str, device: &str, vlan: i64) -> InfraObject {
        InfraObject::Pif(PifRecord {
            id: ObjectId::new(name),
            opaque_ref: OpaqueRef::new(name),
            device: device.to_string(),
            vlan: VlanTag::new(vlan).unwrap(),
            host: OpaqueRef::new("host"),
            network: OpaqueRef::new(network),
            currently_attached: true,
            ip_configuration_mode: IpConfigurationMode::Static,
        })
    }

    fn tunnelled_snapshot() -> PoolSnapshot {
        PoolSnapshot::new([
            pif("access", "OpaqueRef:net-1", "tunnel0", -1),
            pif("transport", "OpaqueRef:mgmt", "eth1", 42),
            InfraObject::Tunnel(TunnelRecord {
                id: ObjectId::new("tunnel"),
                opaque_ref: OpaqueRef::new("tunnel"),
                access_pif: OpaqueRef::new("access"),
                transport_pif: OpaqueRef::new("transport"),
                status: TunnelStatus::inactive(),
            }),
        ])
    }

    fn plan_all(network: &NetworkRecord, snapshot: &PoolSnapshot) -> Vec<(&'static str, MetadataPatch)> {
        let fresh_id = PrivateNetworkId::new("fresh");
        let mut current = network.clone();
        let mut applied = Vec::new();
        for migration in MIGRATIONS {
            let ctx = MigrationContext {
                network: &current,
                snapshot,
                fresh_id: &fresh_id,
            };
            if let Some(patch) = (migration.plan)(&ctx) {
                patch.apply(&mut current.other_config);
                applied.push((migration.name, patch));
            }
        }
        applied
    }

    #[test]
    fn test_namespace_keys() {
        let net = network(&[("vni", "4"), ("encapsulation", "vxlan"), (metadata::VNI, "5")]);
        let ctx = MigrationContext {
            network: &net,
            snapshot: &PoolSnapshot::default(),
            fresh_id: &PrivateNetworkId::new("fresh"),
        };
        let patch = namespace_keys(&ctx).unwrap();
        let entries: Vec<_> = patch.iter().collect();
        // `vni` is skipped because the namespaced key already exists.
        assert_eq!(
            entries,
            vec![
                ("encapsulation", None),
                (metadata::ENCAPSULATION, Some("vxlan")),
            ]
        );
    }

    #[test]
    fn test_private_pool_wide_reuses_cross_pool_uuid() {
        let net = network(&[
            (legacy::PRIVATE_POOL_WIDE, "true"),
            (legacy::CROSS_POOL_NETWORK_UUID, "overlay-1"),
        ]);
        let mut other_config = net.other_config.clone();
        let ctx = MigrationContext {
            network: &net,
            snapshot: &PoolSnapshot::default(),
            fresh_id: &PrivateNetworkId::new("fresh"),
        };
        private_pool_wide(&ctx).unwrap().apply(&mut other_config);

        assert_eq!(
            other_config,
            Metadata::from([(metadata::PRIVATE_NETWORK_UUID.to_string(), "overlay-1".to_string())])
        );
    }

    #[test]
    fn test_private_pool_wide_mints_uuid() {
        let net = network(&[(legacy::PRIVATE_POOL_WIDE, "true")]);
        let ctx = MigrationContext {
            network: &net,
            snapshot: &PoolSnapshot::default(),
            fresh_id: &PrivateNetworkId::new("fresh"),
        };
        let patch = private_pool_wide(&ctx).unwrap();
        assert!(patch
            .iter()
            .any(|(k, v)| k == metadata::PRIVATE_NETWORK_UUID && v == Some("fresh")));
    }

    #[test]
    fn test_backfill_from_transport_pif() {
        let net = network(&[(metadata::PRIVATE_NETWORK_UUID, "overlay-1")]);
        let applied = plan_all(&net, &tunnelled_snapshot());
        let names: Vec<_> = applied.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["pif-device", "vlan"]);

        let mut other_config = net.other_config.clone();
        for (_, patch) in &applied {
            patch.apply(&mut other_config);
        }
        assert_eq!(other_config.get(metadata::PIF_DEVICE).map(String::as_str), Some("eth1"));
        assert_eq!(other_config.get(metadata::VLAN).map(String::as_str), Some("42"));
    }

    #[test]
    fn test_backfill_skips_non_members_and_untunnelled() {
        let plain = network(&[]);
        assert!(plan_all(&plain, &tunnelled_snapshot()).is_empty());

        let member = network(&[(metadata::PRIVATE_NETWORK_UUID, "overlay-1")]);
        assert!(plan_all(&member, &PoolSnapshot::default()).is_empty());
    }

    #[test]
    fn test_full_chain_is_idempotent() {
        let legacy_net = network(&[
            ("private_pool_wide", "true"),
            ("cross_pool_network_uuid", "overlay-9"),
            ("vni", "12"),
        ]);
        let snapshot = tunnelled_snapshot();
        let applied = plan_all(&legacy_net, &snapshot);
        let names: Vec<_> = applied.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["namespace-keys", "private-pool-wide", "pif-device", "vlan"]);

        let mut migrated = legacy_net.clone();
        for (_, patch) in &applied {
            patch.apply(&mut migrated.other_config);
        }
        assert_eq!(migrated.meta(metadata::PRIVATE_NETWORK_UUID), Some("overlay-9"));
        assert_eq!(migrated.meta(metadata::VNI), Some("12"));
        assert!(plan_all(&migrated, &snapshot).is_empty());
    }
}
