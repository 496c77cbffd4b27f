//! Infrastructure API contract.
//!
//! The controller never talks to the hypervisor management plane directly.
//! Each connected pool is represented by an [`InfraApi`] implementation that
//! exposes the pool's object cache, an add/update/remove event stream and
//! the remote calls the controller needs.

use crate::error::InfraError;
use async_trait::async_trait;
use sdn_types::{Metadata, MetadataPatch, ObjectId, OpaqueRef, PoolId, VlanTag};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Pool object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub id: PoolId,
    pub opaque_ref: OpaqueRef,
    pub name_label: String,
}

/// Host object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub name_label: String,
    /// Management address, used as the remote endpoint of tunnels.
    pub address: String,
    pub enabled: bool,
    pub pifs: Vec<OpaqueRef>,
    pub metrics: OpaqueRef,
}

/// IP configuration of a physical interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpConfigurationMode {
    None,
    Dhcp,
    Static,
}

/// Physical (or VLAN, bond, tunnel access) interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PifRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub device: String,
    pub vlan: VlanTag,
    pub host: OpaqueRef,
    pub network: OpaqueRef,
    pub currently_attached: bool,
    pub ip_configuration_mode: IpConfigurationMode,
}

/// Network object with its key/value metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub name_label: String,
    pub other_config: Metadata,
}

impl NetworkRecord {
    /// Returns a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.other_config.get(key).map(String::as_str)
    }
}

/// Host liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetricsRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub live: bool,
}

/// Status record carried by a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub active: bool,
    /// Virtual-switch bridge name, set only when active.
    pub key: Option<String>,
}

impl TunnelStatus {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(bridge: impl Into<String>) -> Self {
        Self {
            active: true,
            key: Some(bridge.into()),
        }
    }
}

/// Tunnel pairing an access interface with a transport interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub access_pif: OpaqueRef,
    pub transport_pif: OpaqueRef,
    pub status: TunnelStatus,
}

/// Pool-level SDN controller marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdnControllerRecord {
    pub id: ObjectId,
    pub opaque_ref: OpaqueRef,
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

/// Every object kind the controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InfraObject {
    Host(HostRecord),
    Pif(PifRecord),
    HostMetrics(HostMetricsRecord),
    Network(NetworkRecord),
    Tunnel(TunnelRecord),
    SdnController(SdnControllerRecord),
}

impl InfraObject {
    /// Global identity.
    pub fn id(&self) -> &ObjectId {
        match self {
            InfraObject::Host(o) => &o.id,
            InfraObject::Pif(o) => &o.id,
            InfraObject::HostMetrics(o) => &o.id,
            InfraObject::Network(o) => &o.id,
            InfraObject::Tunnel(o) => &o.id,
            InfraObject::SdnController(o) => &o.id,
        }
    }

    /// Pool-local reference.
    pub fn opaque_ref(&self) -> &OpaqueRef {
        match self {
            InfraObject::Host(o) => &o.opaque_ref,
            InfraObject::Pif(o) => &o.opaque_ref,
            InfraObject::HostMetrics(o) => &o.opaque_ref,
            InfraObject::Network(o) => &o.opaque_ref,
            InfraObject::Tunnel(o) => &o.opaque_ref,
            InfraObject::SdnController(o) => &o.opaque_ref,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InfraObject::Host(_) => "host",
            InfraObject::Pif(_) => "PIF",
            InfraObject::HostMetrics(_) => "host_metrics",
            InfraObject::Network(_) => "network",
            InfraObject::Tunnel(_) => "tunnel",
            InfraObject::SdnController(_) => "SDN_controller",
        }
    }
}

/// One batch of changes delivered by a pool's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    Added(Vec<InfraObject>),
    Updated(Vec<InfraObject>),
    /// Removal batches only carry identities.
    Removed(Vec<ObjectId>),
}

/// Parameters of `network.create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNetwork {
    pub name_label: String,
    pub name_description: String,
    /// `None` keeps the pool default.
    pub mtu: Option<u32>,
    pub other_config: Metadata,
}

/// Read-only view of a pool's object cache.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    objects: HashMap<OpaqueRef, InfraObject>,
}

impl PoolSnapshot {
    pub fn new(objects: impl IntoIterator<Item = InfraObject>) -> Self {
        Self {
            objects: objects
                .into_iter()
                .map(|o| (o.opaque_ref().clone(), o))
                .collect(),
        }
    }

    pub fn get(&self, opaque_ref: &OpaqueRef) -> Option<&InfraObject> {
        self.objects.get(opaque_ref)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Hosts sorted by identity.
    pub fn hosts(&self) -> Vec<&HostRecord> {
        let mut hosts: Vec<_> = self
            .objects
            .values()
            .filter_map(|o| match o {
                InfraObject::Host(h) => Some(h),
                _ => None,
            })
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    pub fn host(&self, opaque_ref: &OpaqueRef) -> Option<&HostRecord> {
        match self.objects.get(opaque_ref) {
            Some(InfraObject::Host(h)) => Some(h),
            _ => None,
        }
    }

    pub fn host_by_id(&self, id: &ObjectId) -> Option<&HostRecord> {
        self.objects.values().find_map(|o| match o {
            InfraObject::Host(h) if &h.id == id => Some(h),
            _ => None,
        })
    }

    pub fn pif(&self, opaque_ref: &OpaqueRef) -> Option<&PifRecord> {
        match self.objects.get(opaque_ref) {
            Some(InfraObject::Pif(p)) => Some(p),
            _ => None,
        }
    }

    pub fn pif_by_id(&self, id: &ObjectId) -> Option<&PifRecord> {
        self.objects.values().find_map(|o| match o {
            InfraObject::Pif(p) if &p.id == id => Some(p),
            _ => None,
        })
    }

    pub fn network(&self, opaque_ref: &OpaqueRef) -> Option<&NetworkRecord> {
        match self.objects.get(opaque_ref) {
            Some(InfraObject::Network(n)) => Some(n),
            _ => None,
        }
    }

    /// Networks sorted by identity.
    pub fn networks(&self) -> Vec<&NetworkRecord> {
        let mut networks: Vec<_> = self
            .objects
            .values()
            .filter_map(|o| match o {
                InfraObject::Network(n) => Some(n),
                _ => None,
            })
            .collect();
        networks.sort_by(|a, b| a.id.cmp(&b.id));
        networks
    }

    pub fn tunnels(&self) -> impl Iterator<Item = &TunnelRecord> {
        self.objects.values().filter_map(|o| match o {
            InfraObject::Tunnel(t) => Some(t),
            _ => None,
        })
    }

    pub fn host_metrics(&self, opaque_ref: &OpaqueRef) -> Option<&HostMetricsRecord> {
        match self.objects.get(opaque_ref) {
            Some(InfraObject::HostMetrics(m)) => Some(m),
            _ => None,
        }
    }

    /// The pool's SDN controller marker, if any.
    pub fn sdn_marker(&self) -> Option<&SdnControllerRecord> {
        self.objects.values().find_map(|o| match o {
            InfraObject::SdnController(c) => Some(c),
            _ => None,
        })
    }

    /// Interfaces of a host.
    pub fn host_pifs<'a>(&'a self, host: &'a HostRecord) -> impl Iterator<Item = &'a PifRecord> {
        host.pifs.iter().filter_map(|r| self.pif(r))
    }

    /// Host interface attached to `network`.
    pub fn host_pif_on(&self, host: &HostRecord, network: &OpaqueRef) -> Option<&PifRecord> {
        host.pifs
            .iter()
            .filter_map(|r| self.pif(r))
            .find(|p| &p.network == network)
    }

    /// Tunnel whose access interface connects `host` to `network`.
    pub fn tunnel_for(&self, host: &HostRecord, network: &OpaqueRef) -> Option<&TunnelRecord> {
        let pif = self.host_pif_on(host, network)?;
        self.tunnels().find(|t| t.access_pif == pif.opaque_ref)
    }

    /// Returns true if the host is reported live.
    pub fn is_live(&self, host: &HostRecord) -> bool {
        self.host_metrics(&host.metrics).is_some_and(|m| m.live)
    }
}

/// Connection to one pool's infrastructure API.
///
/// Implementations own the object cache and the event subscription. The
/// controller imposes its own deadline around every call.
///
/// Object ids must be unique across every connected pool; the controller
/// indexes member networks and hosts by id alone.
#[async_trait]
pub trait InfraApi: Send + Sync {
    /// The pool this connection manages.
    fn pool(&self) -> PoolRecord;

    /// Waits until the object cache is populated.
    async fn objects_fetched(&self) -> Result<(), InfraError>;

    /// Current content of the object cache.
    fn snapshot(&self) -> PoolSnapshot;

    /// Subscribes to add/update/remove batches. The stream ends when the pool
    /// disconnects.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ObjectEvent>;

    /// Waits until every pending change to `object` is visible and returns it.
    async fn barrier(&self, object: &OpaqueRef) -> Result<InfraObject, InfraError>;

    async fn create_network(&self, network: NewNetwork) -> Result<OpaqueRef, InfraError>;

    /// Creates a tunnel on `transport_pif` into `network`; returns the tunnel.
    async fn create_tunnel(
        &self,
        transport_pif: &OpaqueRef,
        network: &OpaqueRef,
    ) -> Result<OpaqueRef, InfraError>;

    /// Waits until the interface reports `currently_attached`.
    async fn wait_pif_attached(&self, pif: &OpaqueRef) -> Result<(), InfraError>;

    async fn set_tunnel_status(
        &self,
        tunnel: &OpaqueRef,
        status: TunnelStatus,
    ) -> Result<(), InfraError>;

    async fn plug_pif(&self, pif: &OpaqueRef) -> Result<(), InfraError>;

    async fn certificate_list(&self) -> Result<Vec<String>, InfraError>;

    async fn certificate_install(&self, name: &str, certificate: &str) -> Result<(), InfraError>;

    async fn certificate_uninstall(&self, name: &str) -> Result<(), InfraError>;

    async fn certificate_sync(&self) -> Result<(), InfraError>;

    /// Introduces a marker with the given protocol and empty address/port.
    async fn sdn_controller_introduce(&self, protocol: &str) -> Result<OpaqueRef, InfraError>;

    async fn sdn_controller_forget(&self, marker: &OpaqueRef) -> Result<(), InfraError>;

    /// Atomically applies a metadata patch to a network object.
    async fn update_other_config(
        &self,
        network: &OpaqueRef,
        patch: &MetadataPatch,
    ) -> Result<(), InfraError>;
}
