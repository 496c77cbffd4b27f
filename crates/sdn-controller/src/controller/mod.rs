//! Overlay controller.
//!
//! [`OverlayController`] owns every connected pool, the private networks
//! built across them and one switch client per known host. Pool event
//! streams are pumped by one task per managed pool; handlers reconcile the
//! overlays and never propagate errors back to the stream.
//!
//! # Locking
//!
//! The registry lock is a plain mutex and is never held across an await.
//! Each private network sits behind its own async mutex, held for the whole
//! of one election or attach so concurrent reconciliations of the same
//! overlay are serialised.

mod admin;
mod events;

pub use admin::CreatePrivateNetwork;

use crate::certs::CertificateBundle;
use crate::config::ControllerConfig;
use crate::consts::{DEFAULT_SWITCH_PORT, PROTOCOL};
use crate::error::InfraError;
use crate::infra::{HostRecord, InfraApi, SdnControllerRecord};
use crate::private_network::{CenterHost, OverlayContext, PrivateNetwork};
use crate::switch::{HostIdentity, SwitchControlClient, SwitchProtocol, UnconfiguredSwitch};
use crate::vni::VniAllocator;
use parking_lot::{Mutex, RwLock};
use sdn_orch_common::{BatchOptions, RefIndex};
use sdn_types::{ObjectId, OpaqueRef, PoolId, PrivateNetworkId, Vni};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared handle on one overlay.
pub(crate) type SharedOverlay = Arc<AsyncMutex<PrivateNetwork>>;

/// Tunables of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Deadline around each reconciliation item and infrastructure call.
    pub call_timeout: Duration,
    /// Virtual-switch control-channel port.
    pub switch_port: u16,
    /// Reinstall the CA certificate even when the pool already has one.
    pub override_certs: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            switch_port: DEFAULT_SWITCH_PORT,
            override_certs: false,
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            switch_port: config.controller.switch_port,
            override_certs: config.certificates.override_certs,
        }
    }
}

/// Returns true if the marker was introduced by this controller.
pub fn is_managed(marker: Option<&SdnControllerRecord>) -> bool {
    marker.is_some_and(|m| m.protocol == PROTOCOL && m.address.is_empty() && m.port == 0)
}

struct PoolPump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolEntry {
    api: Arc<dyn InfraApi>,
    managed: bool,
    pump: Option<PoolPump>,
}

/// Network index entry: which overlay a pool-local network belongs to.
#[derive(Debug, Clone)]
struct NetworkEntry {
    pool: PoolId,
    opaque_ref: OpaqueRef,
    private_network: PrivateNetworkId,
}

#[derive(Default)]
struct Registry {
    pools: HashMap<PoolId, PoolEntry>,
    private_networks: HashMap<PrivateNetworkId, SharedOverlay>,
    networks: HashMap<ObjectId, NetworkEntry>,
    /// Center host -> overlays it is the center of.
    star_centers: RefIndex<ObjectId, OpaqueRef, PrivateNetworkId>,
    /// Hosts seen being added and not yet reconciled.
    new_hosts: HashMap<ObjectId, PoolId>,
    switch_clients: HashMap<ObjectId, Arc<SwitchControlClient>>,
}

struct Inner {
    registry: Mutex<Registry>,
    credentials: RwLock<Arc<CertificateBundle>>,
    override_certs: AtomicBool,
    call_timeout: Duration,
    switch_port: u16,
    protocol: Arc<dyn SwitchProtocol>,
    vni: VniAllocator,
}

impl OverlayContext for Inner {
    fn pool_api(&self, pool: &PoolId) -> Option<Arc<dyn InfraApi>> {
        self.registry.lock().pools.get(pool).map(|e| e.api.clone())
    }

    fn switch_client(&self, host: &ObjectId) -> Option<Arc<SwitchControlClient>> {
        self.registry.lock().switch_clients.get(host).cloned()
    }
}

/// The SDN overlay controller.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct OverlayController {
    inner: Arc<Inner>,
}

impl OverlayController {
    /// Creates a controller that has no switch protocol wired in.
    pub fn new(credentials: Arc<CertificateBundle>, options: ControllerOptions) -> Self {
        Self::with_switch_protocol(credentials, options, Arc::new(UnconfiguredSwitch))
    }

    pub fn with_switch_protocol(
        credentials: Arc<CertificateBundle>,
        options: ControllerOptions,
        protocol: Arc<dyn SwitchProtocol>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                credentials: RwLock::new(credentials),
                override_certs: AtomicBool::new(options.override_certs),
                call_timeout: options.call_timeout,
                switch_port: options.switch_port,
                protocol,
                vni: VniAllocator::new(),
            }),
        }
    }

    /// Current certificate bundle.
    pub fn credentials(&self) -> Arc<CertificateBundle> {
        self.inner.credentials.read().clone()
    }

    pub fn override_certs(&self) -> bool {
        self.inner.override_certs.load(Ordering::SeqCst)
    }

    /// Stops every event pump and forgets all state.
    pub async fn shutdown(&self) {
        let pumps: Vec<PoolPump> = {
            let mut registry = self.inner.registry.lock();
            registry
                .pools
                .values_mut()
                .filter_map(|entry| entry.pump.take())
                .collect()
        };

        for pump in pumps {
            pump.cancel.cancel();
            if let Err(e) = pump.handle.await {
                warn!(error = %e, "Event pump did not stop cleanly");
            }
        }

        *self.inner.registry.lock() = Registry::default();
        info!("SDN controller stopped");
    }

    // Introspection.

    /// Copy of an overlay's current state.
    pub async fn private_network(&self, id: &PrivateNetworkId) -> Option<PrivateNetwork> {
        let overlay = self.overlay(id)?;
        let snapshot = overlay.lock().await.clone();
        Some(snapshot)
    }

    /// Identities of every known overlay, sorted.
    pub fn private_network_ids(&self) -> Vec<PrivateNetworkId> {
        let mut ids: Vec<_> = self.inner.registry.lock().private_networks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hosts currently acting as star center, sorted.
    pub fn star_centers(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.inner.registry.lock().star_centers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Overlays `host` is the center of.
    pub fn star_center_of(&self, host: &ObjectId) -> Vec<PrivateNetworkId> {
        self.inner.registry.lock().star_centers.holders(host)
    }

    /// Overlay a pool-local network belongs to.
    pub fn network_owner(&self, network: &ObjectId) -> Option<PrivateNetworkId> {
        self.inner
            .registry
            .lock()
            .networks
            .get(network)
            .map(|e| e.private_network.clone())
    }

    pub fn switch_client(&self, host: &ObjectId) -> Option<Arc<SwitchControlClient>> {
        self.inner.switch_client(host)
    }

    /// Hosts added but not yet reconciled, sorted.
    pub fn pending_new_hosts(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.inner.registry.lock().new_hosts.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns true if the pool is connected and managed by this controller.
    pub fn is_managed_pool(&self, pool: &PoolId) -> bool {
        self.inner
            .registry
            .lock()
            .pools
            .get(pool)
            .is_some_and(|e| e.managed)
    }

    /// Largest tunnel identifier seen or allocated.
    pub fn last_vni(&self) -> Vni {
        self.inner.vni.last()
    }

    // Internal helpers shared by the event and admin paths.

    fn ctx(&self) -> &dyn OverlayContext {
        self.inner.as_ref()
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions::with_timeout(self.inner.call_timeout)
    }

    /// Runs an infrastructure call under the controller deadline.
    async fn deadline<T, F>(&self, method: &str, call: F) -> Result<T, InfraError>
    where
        F: Future<Output = Result<T, InfraError>>,
    {
        tokio::time::timeout(self.inner.call_timeout, call)
            .await
            .map_err(|_| InfraError::Timeout {
                method: method.to_string(),
            })?
    }

    fn pool_api(&self, pool: &PoolId) -> Option<Arc<dyn InfraApi>> {
        self.inner.pool_api(pool)
    }

    fn overlay(&self, id: &PrivateNetworkId) -> Option<SharedOverlay> {
        self.inner.registry.lock().private_networks.get(id).cloned()
    }

    fn overlays(&self) -> Vec<SharedOverlay> {
        self.inner
            .registry
            .lock()
            .private_networks
            .values()
            .cloned()
            .collect()
    }

    /// Overlays with a member network in `pool`.
    fn overlays_in_pool(&self, pool: &PoolId) -> Vec<SharedOverlay> {
        let registry = self.inner.registry.lock();
        let mut ids: Vec<&PrivateNetworkId> = registry
            .networks
            .values()
            .filter(|e| &e.pool == pool)
            .map(|e| &e.private_network)
            .collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| registry.private_networks.get(id).cloned())
            .collect()
    }

    /// Overlay owning the pool-local network `network`.
    fn overlay_for_network(&self, pool: &PoolId, network: &OpaqueRef) -> Option<SharedOverlay> {
        let registry = self.inner.registry.lock();
        let entry = registry
            .networks
            .values()
            .find(|e| &e.pool == pool && &e.opaque_ref == network)?;
        registry.private_networks.get(&entry.private_network).cloned()
    }

    fn get_or_create_overlay(
        &self,
        id: &PrivateNetworkId,
        preferred_center: Option<ObjectId>,
    ) -> SharedOverlay {
        let mut registry = self.inner.registry.lock();
        registry
            .private_networks
            .entry(id.clone())
            .or_insert_with(|| {
                info!(private_network = %id, "Private network registered");
                Arc::new(AsyncMutex::new(PrivateNetwork::new(id.clone(), preferred_center)))
            })
            .clone()
    }

    fn index_network(&self, network: ObjectId, pool: &PoolId, opaque_ref: &OpaqueRef, owner: &PrivateNetworkId) {
        self.inner.registry.lock().networks.insert(
            network,
            NetworkEntry {
                pool: pool.clone(),
                opaque_ref: opaque_ref.clone(),
                private_network: owner.clone(),
            },
        );
    }

    /// Forgets an overlay with no member left.
    fn drop_overlay(&self, id: &PrivateNetworkId) {
        let mut registry = self.inner.registry.lock();
        if registry.private_networks.remove(id).is_none() {
            return;
        }
        registry.star_centers.release_holder(id);
        registry.networks.retain(|_, e| &e.private_network != id);
        info!(private_network = %id, "Private network destroyed");
    }

    /// Brings the star-center index in line with a center change.
    fn sync_star_center(&self, overlay: &PrivateNetworkId, before: Option<&CenterHost>, after: Option<&CenterHost>) {
        if before.map(|c| &c.id) == after.map(|c| &c.id) {
            return;
        }
        let mut registry = self.inner.registry.lock();
        if let Some(old) = before {
            registry.star_centers.release(&old.id, overlay);
        }
        if let Some(new) = after {
            registry
                .star_centers
                .assign(new.id.clone(), new.opaque_ref.clone(), overlay.clone());
        }
    }

    /// Runs election on `overlay` and updates the star-center index.
    async fn elect(&self, overlay: &SharedOverlay) {
        let mut pn = overlay.lock().await;
        self.elect_locked(&mut pn).await;
    }

    /// Election on an already locked overlay.
    ///
    /// The star-center index follows the new center before any host is
    /// touched, so a rebuild cut short by its deadline leaves the index and
    /// the overlay in agreement.
    async fn elect_locked(&self, pn: &mut PrivateNetwork) {
        let before = pn.center().cloned();
        let candidates = pn.elect_new_center(self.ctx());
        self.sync_star_center(pn.uuid(), before.as_ref(), pn.center());
        pn.rebuild_star(self.ctx(), &candidates).await;
    }

    /// Creates a switch client for `host` unless one exists.
    fn ensure_switch_client(&self, pool: &PoolId, host: &HostRecord) {
        let mut registry = self.inner.registry.lock();
        if registry.switch_clients.contains_key(&host.id) {
            return;
        }
        let client = SwitchControlClient::new(
            HostIdentity {
                id: host.id.clone(),
                pool: pool.clone(),
                name_label: host.name_label.clone(),
                address: host.address.clone(),
            },
            self.credentials(),
            self.inner.protocol.clone(),
            self.inner.switch_port,
        );
        registry.switch_clients.insert(host.id.clone(), Arc::new(client));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(protocol: &str, address: &str, port: u16) -> SdnControllerRecord {
        SdnControllerRecord {
            id: ObjectId::new("marker"),
            opaque_ref: OpaqueRef::new("OpaqueRef:marker"),
            protocol: protocol.to_string(),
            address: address.to_string(),
            port,
        }
    }

    #[test]
    fn test_is_managed() {
        assert!(is_managed(Some(&marker("pssl", "", 0))));
        assert!(!is_managed(Some(&marker("ssl", "", 0))));
        assert!(!is_managed(Some(&marker("pssl", "10.0.0.9", 0))));
        assert!(!is_managed(Some(&marker("pssl", "", 6653))));
        assert!(!is_managed(None));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ControllerConfig::default();
        config.controller.call_timeout_secs = 5;
        config.certificates.override_certs = true;

        let options = ControllerOptions::from_config(&config);
        assert_eq!(options.call_timeout, Duration::from_secs(5));
        assert_eq!(options.switch_port, DEFAULT_SWITCH_PORT);
        assert!(options.override_certs);
    }
}
