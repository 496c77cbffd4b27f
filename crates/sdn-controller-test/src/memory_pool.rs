//! In-memory pool implementing the infrastructure API.
//!
//! Mutations made through the test helpers only change state; events are
//! delivered to subscribers when the test calls [`MemoryPool::publish`].

use async_trait::async_trait;
use parking_lot::Mutex;
use sdn_controller::infra::{
    HostRecord, InfraApi, InfraObject, IpConfigurationMode, NetworkRecord, NewNetwork, ObjectEvent,
    PifRecord, PoolRecord, PoolSnapshot, SdnControllerRecord, TunnelRecord, TunnelStatus,
};
use sdn_controller::InfraError;
use sdn_types::{MetadataPatch, ObjectId, OpaqueRef, PoolId, VlanTag};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: &'static str,
    pub target: String,
}

#[derive(Default)]
struct State {
    objects: HashMap<OpaqueRef, InfraObject>,
    certificates: BTreeMap<String, String>,
    calls: Vec<Call>,
    failures: HashMap<&'static str, String>,
    subscribers: Vec<mpsc::UnboundedSender<ObjectEvent>>,
    /// Pool id prefixed to minted ids; object ids are unique across pools.
    prefix: String,
    next_id: u64,
}

impl State {
    fn record(&mut self, method: &'static str, target: impl Into<String>) -> Result<(), InfraError> {
        self.calls.push(Call {
            method,
            target: target.into(),
        });
        match self.failures.get(method) {
            Some(message) => Err(InfraError::call(method, message.clone())),
            None => Ok(()),
        }
    }

    fn fresh(&mut self, kind: &str) -> (ObjectId, OpaqueRef) {
        self.next_id += 1;
        let id = format!("{}-{kind}-{}", self.prefix, self.next_id);
        (ObjectId::new(id.clone()), OpaqueRef::new(format!("OpaqueRef:{id}")))
    }

    fn pif_mut(&mut self, pif: &OpaqueRef) -> Result<&mut PifRecord, InfraError> {
        match self.objects.get_mut(pif) {
            Some(InfraObject::Pif(record)) => Ok(record),
            _ => Err(InfraError::object_not_found(pif.as_str())),
        }
    }
}

/// A pool held entirely in memory.
pub struct MemoryPool {
    record: PoolRecord,
    state: Mutex<State>,
}

impl MemoryPool {
    pub fn new(id: &str, name: &str, objects: impl IntoIterator<Item = InfraObject>) -> Self {
        let state = State {
            objects: objects
                .into_iter()
                .map(|o| (o.opaque_ref().clone(), o))
                .collect(),
            prefix: id.to_string(),
            ..State::default()
        };
        Self {
            record: PoolRecord {
                id: PoolId::new(id),
                opaque_ref: OpaqueRef::new(format!("OpaqueRef:{id}")),
                name_label: name.to_string(),
            },
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> PoolId {
        self.record.id.clone()
    }

    // Test-side mutations.

    pub fn insert(&self, object: InfraObject) {
        self.state
            .lock()
            .objects
            .insert(object.opaque_ref().clone(), object);
    }

    pub fn remove(&self, opaque_ref: &OpaqueRef) -> Option<InfraObject> {
        self.state.lock().objects.remove(opaque_ref)
    }

    /// Pre-installs a certificate.
    pub fn install_certificate(&self, name: &str, content: &str) {
        self.state
            .lock()
            .certificates
            .insert(name.to_string(), content.to_string());
    }

    /// Changes an interface's attachment; returns the updated object.
    pub fn set_pif_attached(&self, pif: &OpaqueRef, attached: bool) -> Option<InfraObject> {
        let mut state = self.state.lock();
        let record = state.pif_mut(pif).ok()?;
        record.currently_attached = attached;
        Some(InfraObject::Pif(record.clone()))
    }

    /// Changes a host's liveness; returns the updated metrics object.
    pub fn set_host_live(&self, host: &OpaqueRef, live: bool) -> Option<InfraObject> {
        let mut state = self.state.lock();
        let metrics = match state.objects.get(host) {
            Some(InfraObject::Host(h)) => h.metrics.clone(),
            _ => return None,
        };
        match state.objects.get_mut(&metrics) {
            Some(InfraObject::HostMetrics(record)) => {
                record.live = live;
                Some(InfraObject::HostMetrics(record.clone()))
            }
            _ => None,
        }
    }

    /// Delivers an event to every subscriber.
    pub fn publish(&self, event: ObjectEvent) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Ends every event stream.
    pub fn disconnect(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Makes every later call to `method` fail.
    pub fn fail(&self, method: &'static str, message: &str) {
        self.state.lock().failures.insert(method, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    // Inspection.

    pub fn object(&self, opaque_ref: &OpaqueRef) -> Option<InfraObject> {
        self.state.lock().objects.get(opaque_ref).cloned()
    }

    pub fn host(&self, opaque_ref: &OpaqueRef) -> Option<HostRecord> {
        match self.object(opaque_ref) {
            Some(InfraObject::Host(h)) => Some(h),
            _ => None,
        }
    }

    pub fn network_by_name(&self, name: &str) -> Option<NetworkRecord> {
        self.state.lock().objects.values().find_map(|o| match o {
            InfraObject::Network(n) if n.name_label == name => Some(n.clone()),
            _ => None,
        })
    }

    pub fn network(&self, opaque_ref: &OpaqueRef) -> Option<NetworkRecord> {
        match self.object(opaque_ref) {
            Some(InfraObject::Network(n)) => Some(n),
            _ => None,
        }
    }

    /// Tunnel joining `host` to `network`.
    pub fn tunnel(&self, host: &OpaqueRef, network: &OpaqueRef) -> Option<TunnelRecord> {
        let snapshot = self.snapshot();
        let host = snapshot.host(host)?;
        snapshot.tunnel_for(host, network).cloned()
    }

    pub fn tunnel_status(&self, host: &OpaqueRef, network: &OpaqueRef) -> Option<TunnelStatus> {
        self.tunnel(host, network).map(|t| t.status)
    }

    pub fn certificates(&self) -> BTreeMap<String, String> {
        self.state.lock().certificates.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

#[async_trait]
impl InfraApi for MemoryPool {
    fn pool(&self) -> PoolRecord {
        self.record.clone()
    }

    async fn objects_fetched(&self) -> Result<(), InfraError> {
        self.state.lock().record("objects_fetched", self.record.id.as_str())
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::new(self.state.lock().objects.values().cloned())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ObjectEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }

    async fn barrier(&self, object: &OpaqueRef) -> Result<InfraObject, InfraError> {
        let mut state = self.state.lock();
        state.record("barrier", object.as_str())?;
        state
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| InfraError::object_not_found(object.as_str()))
    }

    async fn create_network(&self, network: NewNetwork) -> Result<OpaqueRef, InfraError> {
        let mut state = self.state.lock();
        state.record("create_network", network.name_label.clone())?;
        let (id, opaque_ref) = state.fresh("network");
        state.objects.insert(
            opaque_ref.clone(),
            InfraObject::Network(NetworkRecord {
                id,
                opaque_ref: opaque_ref.clone(),
                name_label: network.name_label,
                other_config: network.other_config,
            }),
        );
        Ok(opaque_ref)
    }

    async fn create_tunnel(
        &self,
        transport_pif: &OpaqueRef,
        network: &OpaqueRef,
    ) -> Result<OpaqueRef, InfraError> {
        let mut state = self.state.lock();
        state.record("create_tunnel", transport_pif.as_str())?;
        let host = state.pif_mut(transport_pif)?.host.clone();

        let (access_id, access_ref) = state.fresh("access");
        let (tunnel_id, tunnel_ref) = state.fresh("tunnel");
        let device = format!("tunnel{}", state.next_id);

        match state.objects.get_mut(&host) {
            Some(InfraObject::Host(record)) => record.pifs.push(access_ref.clone()),
            _ => return Err(InfraError::object_not_found(host.as_str())),
        }
        state.objects.insert(
            access_ref.clone(),
            InfraObject::Pif(PifRecord {
                id: access_id,
                opaque_ref: access_ref.clone(),
                device,
                vlan: VlanTag::UNTAGGED,
                host,
                network: network.clone(),
                currently_attached: false,
                ip_configuration_mode: IpConfigurationMode::None,
            }),
        );
        state.objects.insert(
            tunnel_ref.clone(),
            InfraObject::Tunnel(TunnelRecord {
                id: tunnel_id,
                opaque_ref: tunnel_ref.clone(),
                access_pif: access_ref,
                transport_pif: transport_pif.clone(),
                status: TunnelStatus::inactive(),
            }),
        );
        Ok(tunnel_ref)
    }

    async fn wait_pif_attached(&self, pif: &OpaqueRef) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("wait_pif_attached", pif.as_str())?;
        state.pif_mut(pif)?.currently_attached = true;
        Ok(())
    }

    async fn set_tunnel_status(
        &self,
        tunnel: &OpaqueRef,
        status: TunnelStatus,
    ) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("set_tunnel_status", tunnel.as_str())?;
        match state.objects.get_mut(tunnel) {
            Some(InfraObject::Tunnel(record)) => {
                record.status = status;
                Ok(())
            }
            _ => Err(InfraError::object_not_found(tunnel.as_str())),
        }
    }

    async fn plug_pif(&self, pif: &OpaqueRef) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("plug_pif", pif.as_str())?;
        state.pif_mut(pif)?.currently_attached = true;
        Ok(())
    }

    async fn certificate_list(&self) -> Result<Vec<String>, InfraError> {
        let mut state = self.state.lock();
        state.record("certificate_list", "")?;
        Ok(state.certificates.keys().cloned().collect())
    }

    async fn certificate_install(&self, name: &str, certificate: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("certificate_install", name)?;
        state
            .certificates
            .insert(name.to_string(), certificate.to_string());
        Ok(())
    }

    async fn certificate_uninstall(&self, name: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("certificate_uninstall", name)?;
        state.certificates.remove(name);
        Ok(())
    }

    async fn certificate_sync(&self) -> Result<(), InfraError> {
        self.state.lock().record("certificate_sync", "")
    }

    async fn sdn_controller_introduce(&self, protocol: &str) -> Result<OpaqueRef, InfraError> {
        let mut state = self.state.lock();
        state.record("sdn_controller_introduce", protocol)?;
        let (id, opaque_ref) = state.fresh("sdn-controller");
        state.objects.insert(
            opaque_ref.clone(),
            InfraObject::SdnController(SdnControllerRecord {
                id,
                opaque_ref: opaque_ref.clone(),
                protocol: protocol.to_string(),
                address: String::new(),
                port: 0,
            }),
        );
        Ok(opaque_ref)
    }

    async fn sdn_controller_forget(&self, marker: &OpaqueRef) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("sdn_controller_forget", marker.as_str())?;
        match state.objects.remove(marker) {
            Some(_) => Ok(()),
            None => Err(InfraError::object_not_found(marker.as_str())),
        }
    }

    async fn update_other_config(
        &self,
        network: &OpaqueRef,
        patch: &MetadataPatch,
    ) -> Result<(), InfraError> {
        let mut state = self.state.lock();
        state.record("update_other_config", network.as_str())?;
        match state.objects.get_mut(network) {
            Some(InfraObject::Network(record)) => {
                patch.apply(&mut record.other_config);
                Ok(())
            }
            _ => Err(InfraError::object_not_found(network.as_str())),
        }
    }
}
