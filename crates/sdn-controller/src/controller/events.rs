//! Pool lifecycle and object event handlers.

use super::{is_managed, NetworkEntry, OverlayController, PoolEntry, PoolPump, SharedOverlay};
use crate::consts::SDN_CONTROLLER_CERT;
use crate::error::{ControllerError, ControllerResult, InfraError};
use crate::infra::{
    HostMetricsRecord, HostRecord, InfraApi, InfraObject, IpConfigurationMode, NetworkRecord,
    ObjectEvent, PifRecord, PoolSnapshot, TunnelStatus,
};
use crate::migrations;
use crate::private_network::MemberNetwork;
use sdn_orch_common::run_batch;
use sdn_types::{metadata, MetadataPatch, ObjectId, OpaqueRef, PoolId, PrivateNetworkId, VlanTag, Vni};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl OverlayController {
    /// Handles a freshly connected pool.
    ///
    /// Unmanaged pools are registered so they can be chosen later but are
    /// otherwise left alone. Managed pools get their event stream pumped,
    /// the CA certificate installed and their overlays discovered.
    pub async fn on_pool_connected(&self, api: Arc<dyn InfraApi>) {
        let pool = api.pool();
        debug!(pool = %pool.name_label, "Pool connected");

        if let Err(e) = self.deadline("objects_fetched", api.objects_fetched()).await {
            error!(pool = %pool.name_label, error = %e, "Error while fetching pool objects");
            return;
        }

        {
            let mut registry = self.inner.registry.lock();
            registry
                .pools
                .entry(pool.id.clone())
                .and_modify(|entry| entry.api = api.clone())
                .or_insert_with(|| PoolEntry {
                    api: api.clone(),
                    managed: false,
                    pump: None,
                });
        }

        let snapshot = api.snapshot();
        if !is_managed(snapshot.sdn_marker()) {
            debug!(pool = %pool.name_label, "Pool is not managed by this controller");
            return;
        }

        self.manage_pool(&api).await;
        for host in snapshot.hosts() {
            self.ensure_switch_client(&pool.id, host);
        }
        self.discover_networks(&api).await;
    }

    /// Forgets a pool whose connection is gone.
    pub async fn on_pool_disconnected(&self, pool: &PoolId) {
        let entry = {
            let mut registry = self.inner.registry.lock();
            registry.new_hosts.retain(|_, p| p != pool);
            registry.pools.remove(pool)
        };
        let Some(entry) = entry else {
            return;
        };
        if let Some(pump) = entry.pump {
            pump.cancel.cancel();
        }
        info!(pool = %entry.api.pool().name_label, "Pool disconnected");

        for overlay in self.overlays() {
            let mut pn = overlay.lock().await;
            let before = pn.center().cloned();
            let Some(removed) = pn.remove_pool(pool) else {
                continue;
            };
            self.inner.registry.lock().networks.remove(&removed.member.id);
            self.sync_star_center(pn.uuid(), before.as_ref(), pn.center());
            if removed.center_lost {
                self.elect_locked(&mut pn).await;
            }
            if pn.is_empty() {
                self.drop_overlay(pn.uuid());
            }
        }
    }

    /// Dispatches one batch from a pool's event stream.
    pub async fn handle_event(&self, pool: &PoolId, event: ObjectEvent) {
        match event {
            ObjectEvent::Added(objects) => self.on_objects_added(pool, objects),
            ObjectEvent::Updated(objects) => self.on_objects_updated(pool, objects).await,
            ObjectEvent::Removed(ids) => self.on_objects_removed(pool, ids).await,
        }
    }

    /// Queues new hosts for reconciliation and creates their switch clients.
    pub fn on_objects_added(&self, pool: &PoolId, objects: Vec<InfraObject>) {
        for object in objects {
            match object {
                InfraObject::Host(host) => {
                    debug!(host = %host.name_label, pool = %pool, "New host");
                    self.inner
                        .registry
                        .lock()
                        .new_hosts
                        .insert(host.id.clone(), pool.clone());
                    self.ensure_switch_client(pool, &host);
                }
                InfraObject::Pif(_)
                | InfraObject::HostMetrics(_)
                | InfraObject::Network(_)
                | InfraObject::Tunnel(_)
                | InfraObject::SdnController(_) => {}
            }
        }
    }

    pub async fn on_objects_updated(&self, pool: &PoolId, objects: Vec<InfraObject>) {
        run_batch(
            "objects-updated",
            objects
                .into_iter()
                .map(|object| (format!("{} {}", object.kind(), object.id()), object)),
            self.batch_options(),
            |object| self.object_updated(pool, object),
        )
        .await;
    }

    pub async fn on_objects_removed(&self, pool: &PoolId, ids: Vec<ObjectId>) {
        run_batch(
            "objects-removed",
            ids.into_iter().map(|id| (id.to_string(), id)),
            self.batch_options(),
            |id| self.object_removed(pool, id),
        )
        .await;
    }

    async fn object_updated(&self, pool: &PoolId, object: InfraObject) -> ControllerResult<()> {
        match object {
            InfraObject::Pif(pif) => self.pif_updated(pool, pif).await,
            InfraObject::Host(host) => self.host_updated(pool, host).await,
            InfraObject::HostMetrics(metrics) => self.host_metrics_updated(pool, metrics).await,
            InfraObject::Network(_) | InfraObject::Tunnel(_) | InfraObject::SdnController(_) => Ok(()),
        }
    }

    async fn object_removed(&self, pool: &PoolId, id: ObjectId) -> ControllerResult<()> {
        let (had_client, centered, network) = {
            let mut registry = self.inner.registry.lock();
            registry.new_hosts.remove(&id);
            let had_client = registry.switch_clients.remove(&id).is_some();
            let centered = registry.star_centers.remove(&id);
            let network = if centered.is_empty() {
                registry.networks.remove(&id)
            } else {
                None
            };
            (had_client, centered, network)
        };

        if had_client {
            debug!(host = %id, pool = %pool, "Switch client discarded");
        }

        if !centered.is_empty() {
            for owner in centered {
                let Some(overlay) = self.overlay(&owner) else {
                    continue;
                };
                let mut pn = overlay.lock().await;
                if !pn.center().is_some_and(|c| c.id == id) {
                    continue;
                }
                debug!(private_network = %owner, host = %id, "Star-center removed, electing a new one");
                self.elect_locked(&mut pn).await;
            }
            return Ok(());
        }

        let Some(NetworkEntry { private_network, .. }) = network else {
            return Ok(());
        };
        let Some(overlay) = self.overlay(&private_network) else {
            return Ok(());
        };
        let mut pn = overlay.lock().await;
        let before = pn.center().cloned();
        if let Some(removed) = pn.remove_network(&id) {
            info!(
                private_network = %private_network,
                network = %removed.member.name_label,
                pool = %pool,
                "Network removed from private network"
            );
            self.sync_star_center(&private_network, before.as_ref(), pn.center());
            if removed.center_lost {
                self.elect_locked(&mut pn).await;
            }
        }
        if pn.is_empty() {
            self.drop_overlay(&private_network);
        }
        Ok(())
    }

    fn require_pool(&self, pool: &PoolId) -> ControllerResult<Arc<dyn InfraApi>> {
        self.pool_api(pool)
            .ok_or_else(|| ControllerError::not_found("pool", pool.as_str()))
    }

    async fn pif_updated(&self, pool: &PoolId, pif: PifRecord) -> ControllerResult<()> {
        let Some(overlay) = self.overlay_for_network(pool, &pif.network) else {
            return Ok(());
        };
        let api = self.require_pool(pool)?;
        let snapshot = api.snapshot();
        let Some(host) = snapshot.host(&pif.host).cloned() else {
            debug!(pif = %pif.device, pool = %pool, "PIF host not found");
            return Ok(());
        };

        let mut pn = overlay.lock().await;

        if pif.currently_attached {
            if pn.center().is_none() {
                debug!(
                    private_network = %pn.uuid(),
                    host = %host.name_label,
                    "First available host becomes star-center"
                );
                pn.set_center(pool, &host);
                self.sync_star_center(pn.uuid(), None, pn.center());
            }
            debug!(host = %host.name_label, pif = %pif.device, "PIF plugged");
            pn.attach_host(self.ctx(), pool, &host).await;
        } else {
            debug!(host = %host.name_label, pif = %pif.device, "PIF unplugged");
            if let Some(tunnel) = snapshot.tunnel_for(&host, &pif.network) {
                if let Err(e) = self
                    .deadline(
                        "tunnel.set_status",
                        api.set_tunnel_status(&tunnel.opaque_ref, TunnelStatus::inactive()),
                    )
                    .await
                {
                    error!(host = %host.name_label, error = %e, "Error while setting tunnel status");
                }
            }
            if pn.center().is_some_and(|c| c.id == host.id) {
                debug!(
                    private_network = %pn.uuid(),
                    host = %host.name_label,
                    "PIF of star-center host has been unplugged, electing a new star-center"
                );
                self.elect_locked(&mut pn).await;
            }
        }
        Ok(())
    }

    async fn host_updated(&self, pool: &PoolId, host: HostRecord) -> ControllerResult<()> {
        if !host.enabled || host.pifs.is_empty() {
            return Ok(());
        }
        let pending = self.inner.registry.lock().new_hosts.remove(&host.id).is_some();
        if !pending {
            return Ok(());
        }
        let api = self.require_pool(pool)?;

        debug!(host = %host.name_label, pool = %pool, "Sync pool certificates");
        if let Err(e) = self.deadline("pool.certificate_sync", api.certificate_sync()).await {
            error!(pool = %pool, error = %e, "Error while syncing SDN controller CA certificate");
        }

        for overlay in self.overlays_in_pool(pool) {
            let member = overlay.lock().await.network_for(pool).cloned();
            let Some(member) = member else {
                continue;
            };
            let snapshot = api.snapshot();
            if snapshot.tunnel_for(&host, &member.opaque_ref).is_some() {
                continue;
            }
            let Some(network) = snapshot.network(&member.opaque_ref).cloned() else {
                continue;
            };
            self.create_tunnel(api.as_ref(), &snapshot, &host, &network).await;
        }

        self.add_host_to_private_networks(pool, &host).await
    }

    async fn host_metrics_updated(&self, pool: &PoolId, metrics: HostMetricsRecord) -> ControllerResult<()> {
        let api = self.require_pool(pool)?;
        let snapshot = api.snapshot();
        let Some(host) = snapshot
            .hosts()
            .into_iter()
            .find(|h| h.metrics == metrics.opaque_ref)
            .cloned()
        else {
            return Ok(());
        };

        if metrics.live {
            self.add_host_to_private_networks(pool, &host).await
        } else {
            self.host_unreachable(pool, &host).await;
            Ok(())
        }
    }

    /// Re-elects every overlay centered on `host` and deactivates its tunnels.
    async fn host_unreachable(&self, pool: &PoolId, host: &HostRecord) {
        for overlay in self.overlays() {
            let mut pn = overlay.lock().await;
            if !pn.center().is_some_and(|c| c.id == host.id) {
                continue;
            }
            debug!(
                private_network = %pn.uuid(),
                host = %host.name_label,
                "Unreachable star-center, electing a new one"
            );
            self.elect_locked(&mut pn).await;
        }

        let Some(api) = self.pool_api(pool) else {
            return;
        };
        for overlay in self.overlays_in_pool(pool) {
            let member = overlay.lock().await.network_for(pool).cloned();
            let Some(member) = member else {
                continue;
            };
            let tunnel = api
                .snapshot()
                .tunnel_for(host, &member.opaque_ref)
                .map(|t| t.opaque_ref.clone());
            let Some(tunnel) = tunnel else {
                continue;
            };
            if let Err(e) = self
                .deadline(
                    "tunnel.set_status",
                    api.set_tunnel_status(&tunnel, TunnelStatus::inactive()),
                )
                .await
            {
                error!(host = %host.name_label, error = %e, "Error while setting tunnel status");
            }
        }
    }

    /// Plugs the host's tunnel interfaces and joins it to every overlay it
    /// has a tunnel into.
    async fn add_host_to_private_networks(&self, pool: &PoolId, host: &HostRecord) -> ControllerResult<()> {
        let api = self.require_pool(pool)?;
        let snapshot = api.snapshot();
        let access_pifs: Vec<PifRecord> = snapshot
            .tunnels()
            .filter_map(|t| snapshot.pif(&t.access_pif))
            .filter(|pif| pif.host == host.opaque_ref)
            .cloned()
            .collect();

        for access in access_pifs {
            if !access.currently_attached {
                if let Err(e) = self.deadline("PIF.plug", api.plug_pif(&access.opaque_ref)).await {
                    error!(
                        host = %host.name_label,
                        pif = %access.device,
                        error = %e,
                        "Error while plugging PIF"
                    );
                    continue;
                }
                debug!(host = %host.name_label, pif = %access.device, "PIF plugged");
            }
            self.add_host_to_private_network(pool, host, &access.network).await;
        }
        Ok(())
    }

    async fn add_host_to_private_network(&self, pool: &PoolId, host: &HostRecord, network: &OpaqueRef) {
        let Some(overlay) = self.overlay_for_network(pool, network) else {
            return;
        };
        let mut pn = overlay.lock().await;
        if pn.center().is_none() {
            self.elect_locked(&mut pn).await;
        } else {
            pn.attach_host(self.ctx(), pool, host).await;
        }
    }

    /// Creates the tunnel joining `host` to `network` and waits for its
    /// access interface to come up. Returns false if nothing was created.
    pub(super) async fn create_tunnel(
        &self,
        api: &dyn InfraApi,
        snapshot: &PoolSnapshot,
        host: &HostRecord,
        network: &NetworkRecord,
    ) -> bool {
        let device = network.meta(metadata::PIF_DEVICE);
        let vlan = network
            .meta(metadata::VLAN)
            .and_then(|v| v.parse::<VlanTag>().ok());

        let transport = snapshot.host_pifs(host).find(|pif| {
            Some(pif.device.as_str()) == device
                && Some(pif.vlan) == vlan
                && pif.ip_configuration_mode != IpConfigurationMode::None
        });
        let Some(transport) = transport else {
            info!(
                host = %host.name_label,
                network = %network.name_label,
                "Can't create tunnel: no available PIF"
            );
            return false;
        };

        let result: Result<(), InfraError> = async {
            let tunnel = self
                .deadline("tunnel.create", api.create_tunnel(&transport.opaque_ref, &network.opaque_ref))
                .await?;
            let access = match self.deadline("barrier", api.barrier(&tunnel)).await? {
                InfraObject::Tunnel(tunnel) => tunnel.access_pif,
                _ => return Err(InfraError::object_not_found(tunnel.as_str())),
            };
            self.deadline("PIF.wait_attached", api.wait_pif_attached(&access))
                .await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(
                    host = %host.name_label,
                    network = %network.name_label,
                    pif = %transport.device,
                    "New tunnel added"
                );
                true
            }
            Err(e) => {
                error!(
                    host = %host.name_label,
                    network = %network.name_label,
                    error = %e,
                    "Error while creating tunnel"
                );
                false
            }
        }
    }

    /// Starts the event pump and installs the CA on a managed pool.
    pub(super) async fn manage_pool(&self, api: &Arc<dyn InfraApi>) {
        let pool = api.pool();
        {
            let mut registry = self.inner.registry.lock();
            let entry = registry
                .pools
                .entry(pool.id.clone())
                .or_insert_with(|| PoolEntry {
                    api: api.clone(),
                    managed: false,
                    pump: None,
                });
            entry.managed = true;
            let running = entry
                .pump
                .as_ref()
                .is_some_and(|pump| !pump.handle.is_finished());
            if !running {
                entry.pump = Some(self.spawn_pump(api.clone()));
            }
        }
        self.install_ca_if_needed(api.as_ref()).await;
    }

    fn spawn_pump(&self, api: Arc<dyn InfraApi>) -> PoolPump {
        let mut events = api.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = Arc::downgrade(&self.inner);
        let pool = api.pool();

        let handle = tokio::spawn(async move {
            debug!(pool = %pool.name_label, "Event pump started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => {
                        let Some(inner) = controller.upgrade() else {
                            break;
                        };
                        let controller = OverlayController { inner };
                        match event {
                            Some(event) => controller.handle_event(&pool.id, event).await,
                            None => {
                                controller.on_pool_disconnected(&pool.id).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!(pool = %pool.name_label, "Event pump stopped");
        });

        PoolPump { cancel, handle }
    }

    /// Installs the controller CA on a pool unless it is already present.
    /// With `override_certs` set, an existing CA is replaced.
    pub async fn install_ca_if_needed(&self, api: &dyn InfraApi) {
        let pool = api.pool();
        let override_certs = self.override_certs();

        let need_install = match self.deadline("pool.certificate_list", api.certificate_list()).await {
            Ok(installed) if !installed.iter().any(|name| name == SDN_CONTROLLER_CERT) => true,
            Ok(_) if override_certs => {
                match self
                    .deadline("pool.certificate_uninstall", api.certificate_uninstall(SDN_CONTROLLER_CERT))
                    .await
                {
                    Ok(()) => {
                        debug!(pool = %pool.name_label, "Old SDN controller CA certificate uninstalled");
                        true
                    }
                    Err(e) => {
                        error!(pool = %pool.name_label, error = %e, "Error while uninstalling CA certificate");
                        false
                    }
                }
            }
            Ok(_) => false,
            Err(e) => {
                error!(pool = %pool.name_label, error = %e, "Error while retrieving certificate list");
                false
            }
        };
        if !need_install {
            return;
        }

        let ca = self.credentials().ca_cert.clone();
        let result: Result<(), InfraError> = async {
            self.deadline("pool.certificate_install", api.certificate_install(SDN_CONTROLLER_CERT, &ca))
                .await?;
            self.deadline("pool.certificate_sync", api.certificate_sync()).await
        }
        .await;

        match result {
            Ok(()) => debug!(pool = %pool.name_label, "SDN controller CA certificate installed"),
            Err(e) => error!(pool = %pool.name_label, error = %e, "Error while installing CA certificate"),
        }
    }

    /// Rebuilds overlays from the metadata of a managed pool's networks.
    async fn discover_networks(&self, api: &Arc<dyn InfraApi>) {
        let pool = api.pool();
        let snapshot = api.snapshot();
        let networks: Vec<NetworkRecord> = snapshot.networks().into_iter().cloned().collect();
        let missing_vni = parking_lot::Mutex::new(Vec::new());
        let touched = parking_lot::Mutex::new(BTreeSet::new());

        run_batch(
            "discover-networks",
            networks
                .into_iter()
                .map(|network| (network.name_label.clone(), network)),
            self.batch_options(),
            |network| self.discover_network(api, &snapshot, network, &missing_vni, &touched),
        )
        .await;

        let mut assigned = BTreeSet::new();
        for (owner, network) in missing_vni.into_inner() {
            let vni = self.inner.vni.allocate();
            let patch = MetadataPatch::new().set(metadata::VNI, vni.to_string());
            if let Err(e) = self
                .deadline("network.update_other_config", api.update_other_config(&network.opaque_ref, &patch))
                .await
            {
                error!(network = %network.name_label, error = %e, "Error while assigning VNI");
                continue;
            }
            info!(
                private_network = %owner,
                network = %network.name_label,
                vni = vni.as_u32(),
                "VNI assigned"
            );
            assigned.insert(owner);
        }

        for owner in touched.into_inner() {
            let Some(overlay) = self.overlay(&owner) else {
                continue;
            };
            if assigned.contains(&owner) {
                // Ports carry the identifier; rebuild the star to apply it.
                self.elect(&overlay).await;
            } else {
                self.reconcile_member(&overlay, &pool.id).await;
            }
        }
    }

    async fn discover_network(
        &self,
        api: &Arc<dyn InfraApi>,
        snapshot: &PoolSnapshot,
        network: NetworkRecord,
        missing_vni: &parking_lot::Mutex<Vec<(PrivateNetworkId, NetworkRecord)>>,
        touched: &parking_lot::Mutex<BTreeSet<PrivateNetworkId>>,
    ) -> ControllerResult<()> {
        let pool = api.pool();
        let network = migrations::run(api.as_ref(), snapshot, network).await?;
        let Some(owner) = network.meta(metadata::PRIVATE_NETWORK_UUID) else {
            return Ok(());
        };
        let owner = PrivateNetworkId::new(owner);
        let preferred = network.meta(metadata::PREFERRED_CENTER).map(ObjectId::new);
        let overlay = self.get_or_create_overlay(&owner, preferred);

        match network.meta(metadata::VNI).map(str::parse::<Vni>) {
            Some(Ok(vni)) => self.inner.vni.observe(vni),
            Some(Err(e)) => {
                warn!(network = %network.name_label, error = %e, "Ignoring invalid VNI");
                missing_vni.lock().push((owner.clone(), network.clone()));
            }
            None => missing_vni.lock().push((owner.clone(), network.clone())),
        }

        overlay.lock().await.add_network(MemberNetwork {
            pool: pool.id.clone(),
            id: network.id.clone(),
            opaque_ref: network.opaque_ref.clone(),
            name_label: network.name_label.clone(),
        });
        self.index_network(network.id.clone(), &pool.id, &network.opaque_ref, &owner);
        touched.lock().insert(owner);
        debug!(network = %network.name_label, pool = %pool.name_label, "Network discovered");
        Ok(())
    }

    /// Completes an overlay after one of its pools joined: elect if it has
    /// no center, otherwise attach the pool's hosts to the existing star.
    async fn reconcile_member(&self, overlay: &SharedOverlay, pool: &PoolId) {
        if overlay.lock().await.center().is_none() {
            self.elect(overlay).await;
            return;
        }
        let Some(api) = self.pool_api(pool) else {
            return;
        };
        let hosts: Vec<HostRecord> = api.snapshot().hosts().into_iter().cloned().collect();
        let pn = overlay.lock().await;
        for host in &hosts {
            pn.attach_host(self.ctx(), pool, host).await;
        }
    }
}
