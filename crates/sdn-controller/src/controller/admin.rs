//! Administrative operations: overlay creation and reconfiguration.

use super::{is_managed, OverlayController, SharedOverlay};
use crate::certs::CertificateBundle;
use crate::consts::PROTOCOL;
use crate::error::{ControllerError, ControllerResult, InfraError};
use crate::infra::{HostRecord, InfraApi, InfraObject, NewNetwork, PifRecord};
use crate::private_network::MemberNetwork;
use sdn_orch_common::run_batch;
use sdn_types::{metadata, Encapsulation, Metadata, ObjectId, PoolId, PrivateNetworkId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Request to build a new overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrivateNetwork {
    /// Participating pools, at least one.
    pub pool_ids: Vec<PoolId>,
    /// Transport interfaces; one per pool is used.
    pub pif_ids: Vec<ObjectId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub encapsulation: Encapsulation,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub preferred_center: Option<ObjectId>,
}

/// One pool's part of an overlay being created.
struct Target {
    api: Arc<dyn InfraApi>,
    transport: PifRecord,
}

impl OverlayController {
    /// Creates one network per pool, tunnels every host into it, and elects
    /// a star center. Returns the new overlay's identity.
    pub async fn create_private_network(
        &self,
        request: CreatePrivateNetwork,
    ) -> ControllerResult<PrivateNetworkId> {
        let mut targets = self.resolve_targets(&request)?;

        if let Some(preferred) = &request.preferred_center {
            let index = targets
                .iter()
                .position(|t| t.api.snapshot().host_by_id(preferred).is_some())
                .ok_or_else(|| ControllerError::not_found("host", preferred.as_str()))?;
            targets.swap(0, index);
        }

        let uuid = PrivateNetworkId::new(uuid::Uuid::new_v4().to_string());
        let vni = self.inner.vni.allocate();
        let overlay = self.get_or_create_overlay(&uuid, request.preferred_center.clone());

        let mut other_config = Metadata::from([
            (metadata::AUTOMATIC.to_string(), "false".to_string()),
            (metadata::ENCAPSULATION.to_string(), request.encapsulation.to_string()),
            (metadata::PRIVATE_NETWORK_UUID.to_string(), uuid.to_string()),
            (metadata::VNI.to_string(), vni.to_string()),
        ]);
        if request.encrypted {
            other_config.insert(metadata::ENCRYPTED.to_string(), "true".to_string());
        }
        if let Some(preferred) = &request.preferred_center {
            other_config.insert(metadata::PREFERRED_CENTER.to_string(), preferred.to_string());
        }

        for target in &targets {
            if let Err(e) = self
                .provision_pool(&overlay, &uuid, &request, target, other_config.clone())
                .await
            {
                if overlay.lock().await.is_empty() {
                    self.drop_overlay(&uuid);
                }
                return Err(e);
            }
        }

        self.elect(&overlay).await;
        info!(
            private_network = %uuid,
            name = %request.name,
            vni = vni.as_u32(),
            pools = targets.len(),
            "Private network created"
        );
        Ok(uuid)
    }

    fn resolve_targets(&self, request: &CreatePrivateNetwork) -> ControllerResult<Vec<Target>> {
        if request.pool_ids.is_empty() {
            return Err(ControllerError::invalid_request("at least one pool is required"));
        }
        let unique: HashSet<&PoolId> = request.pool_ids.iter().collect();
        if unique.len() != request.pool_ids.len() {
            return Err(ControllerError::invalid_request("duplicate pool"));
        }

        request
            .pool_ids
            .iter()
            .map(|pool| {
                let api = self
                    .pool_api(pool)
                    .ok_or_else(|| ControllerError::not_found("pool", pool.as_str()))?;
                let snapshot = api.snapshot();
                let transport = request
                    .pif_ids
                    .iter()
                    .find_map(|id| snapshot.pif_by_id(id))
                    .cloned()
                    .ok_or_else(|| {
                        ControllerError::invalid_request(format!("no transport interface given for pool {pool}"))
                    })?;
                Ok(Target { api, transport })
            })
            .collect()
    }

    async fn provision_pool(
        &self,
        overlay: &SharedOverlay,
        uuid: &PrivateNetworkId,
        request: &CreatePrivateNetwork,
        target: &Target,
        mut other_config: Metadata,
    ) -> ControllerResult<()> {
        let api = &target.api;
        let pool = api.pool();
        self.set_pool_controller_if_needed(api).await?;

        other_config.insert(metadata::PIF_DEVICE.to_string(), target.transport.device.clone());
        other_config.insert(metadata::VLAN.to_string(), target.transport.vlan.to_string());

        let network_ref = self
            .deadline(
                "network.create",
                api.create_network(NewNetwork {
                    name_label: request.name.clone(),
                    name_description: request.description.clone(),
                    mtu: request.mtu,
                    other_config,
                }),
            )
            .await?;
        let network = match self.deadline("barrier", api.barrier(&network_ref)).await? {
            InfraObject::Network(network) => network,
            _ => return Err(InfraError::object_not_found(network_ref.as_str()).into()),
        };
        info!(network = %network.name_label, pool = %pool.name_label, "New network created");

        let snapshot = api.snapshot();
        let hosts: Vec<HostRecord> = snapshot.hosts().into_iter().cloned().collect();
        for host in &hosts {
            self.ensure_switch_client(&pool.id, host);
        }
        run_batch(
            "create-tunnels",
            hosts.into_iter().map(|host| (host.name_label.clone(), host)),
            self.batch_options(),
            |host| {
                let snapshot = &snapshot;
                let network = &network;
                async move {
                    self.create_tunnel(api.as_ref(), snapshot, &host, network).await;
                    Ok::<(), ControllerError>(())
                }
            },
        )
        .await;

        overlay.lock().await.add_network(MemberNetwork {
            pool: pool.id.clone(),
            id: network.id.clone(),
            opaque_ref: network.opaque_ref.clone(),
            name_label: network.name_label.clone(),
        });
        self.index_network(network.id.clone(), &pool.id, &network.opaque_ref, uuid);
        Ok(())
    }

    /// Makes this controller the pool's SDN controller and starts managing
    /// it. A foreign marker is forgotten first.
    pub async fn set_pool_controller_if_needed(&self, api: &Arc<dyn InfraApi>) -> ControllerResult<()> {
        let pool = api.pool();
        let marker = api.snapshot().sdn_marker().cloned();
        if !is_managed(marker.as_ref()) {
            if let Some(marker) = marker {
                self.deadline("SDN_controller.forget", api.sdn_controller_forget(&marker.opaque_ref))
                    .await?;
                debug!(pool = %pool.name_label, "Old SDN controller removed");
            }
            self.deadline("SDN_controller.introduce", api.sdn_controller_introduce(PROTOCOL))
                .await?;
            debug!(pool = %pool.name_label, "SDN controller has been set");
        }
        self.manage_pool(api).await;
        Ok(())
    }

    /// Applies new credentials: every switch client switches to them and
    /// the CA is reinstalled on every pool that carries an overlay.
    pub async fn reconfigure(&self, credentials: Arc<CertificateBundle>, override_certs: bool) {
        self.inner.override_certs.store(override_certs, Ordering::SeqCst);
        *self.inner.credentials.write() = credentials.clone();

        let (clients, pools) = {
            let registry = self.inner.registry.lock();
            let clients: Vec<_> = registry.switch_clients.values().cloned().collect();
            let pools: BTreeSet<PoolId> = registry.networks.values().map(|e| e.pool.clone()).collect();
            (clients, pools)
        };

        for client in clients {
            client.update_credentials(credentials.clone());
        }
        for pool in pools {
            if let Some(api) = self.pool_api(&pool) {
                self.install_ca_if_needed(api.as_ref()).await;
            }
        }
        info!(override_certs, "SDN controller reconfigured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_defaults() {
        let request: CreatePrivateNetwork = serde_json::from_str(
            r#"{"pool_ids": ["pool-a"], "pif_ids": ["pif-1"], "name": "backend"}"#,
        )
        .unwrap();

        assert_eq!(request.pool_ids, vec![PoolId::new("pool-a")]);
        assert_eq!(request.encapsulation, Encapsulation::Gre);
        assert!(!request.encrypted);
        assert_eq!(request.mtu, None);
        assert_eq!(request.preferred_center, None);
    }

    #[test]
    fn test_request_rejects_unknown_encapsulation() {
        let result = serde_json::from_str::<CreatePrivateNetwork>(
            r#"{"pool_ids": [], "pif_ids": [], "name": "x", "encapsulation": "ipip"}"#,
        );
        assert!(result.is_err());
    }
}
