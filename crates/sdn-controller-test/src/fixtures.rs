//! Test fixtures for pools, hosts and overlays
//!
//! Naming scheme used by [`PoolBuilder`]:
//! - host `h` has reference `OpaqueRef:h`, metrics `OpaqueRef:h-metrics`
//!   and one management interface `h-eth0` (`OpaqueRef:h-eth0`)
//! - network `n` has reference `OpaqueRef:n`
//! - a pre-existing tunnel of `h` into `n` uses access interface
//!   `OpaqueRef:h-n-access` and tunnel `OpaqueRef:h-n-tunnel`

use crate::memory_pool::MemoryPool;
use crate::recording_switch::RecordingSwitch;
use sdn_controller::certs::{CertificateBundle, CertificateGenerator, SelfSignedGenerator};
use sdn_controller::consts::PROTOCOL;
use sdn_controller::infra::{
    HostMetricsRecord, HostRecord, InfraApi, InfraObject, IpConfigurationMode, NetworkRecord,
    PifRecord, SdnControllerRecord, TunnelRecord, TunnelStatus,
};
use sdn_controller::{ControllerOptions, OverlayController};
use sdn_types::{Metadata, ObjectId, OpaqueRef, VlanTag};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Reference of a named object.
pub fn opaque(name: &str) -> OpaqueRef {
    OpaqueRef::new(format!("OpaqueRef:{name}"))
}

/// Identity of a host's management interface.
pub fn mgmt_pif(host: &str) -> ObjectId {
    ObjectId::new(format!("{host}-eth0"))
}

/// Credentials shared by every test in the process.
pub fn test_credentials() -> Arc<CertificateBundle> {
    static BUNDLE: OnceLock<Arc<CertificateBundle>> = OnceLock::new();
    BUNDLE
        .get_or_init(|| Arc::new(fresh_credentials()))
        .clone()
}

/// A newly generated bundle, distinct from [`test_credentials`].
pub fn fresh_credentials() -> CertificateBundle {
    SelfSignedGenerator::new("sdn-controller-test")
        .generate()
        .expect("Failed to generate test certificates")
}

/// Controller with a recording switch and a short call deadline.
pub fn controller_with(options: ControllerOptions) -> (OverlayController, Arc<RecordingSwitch>) {
    let switch = Arc::new(RecordingSwitch::new());
    let controller = OverlayController::with_switch_protocol(test_credentials(), options, switch.clone());
    (controller, switch)
}

pub fn controller() -> (OverlayController, Arc<RecordingSwitch>) {
    controller_with(ControllerOptions {
        call_timeout: Duration::from_secs(5),
        ..ControllerOptions::default()
    })
}

/// Coerces a memory pool to the trait object the controller takes.
pub fn api(pool: &Arc<MemoryPool>) -> Arc<dyn InfraApi> {
    pool.clone()
}

/// Builds a [`MemoryPool`].
pub struct PoolBuilder {
    id: String,
    name: String,
    objects: Vec<InfraObject>,
    certificates: Vec<(String, String)>,
}

impl PoolBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("pool {id}"),
            objects: Vec::new(),
            certificates: Vec::new(),
        }
    }

    /// Adds the marker this controller recognises as its own.
    pub fn managed(self) -> Self {
        self.marker(PROTOCOL, "", 0)
    }

    pub fn marker(mut self, protocol: &str, address: &str, port: u16) -> Self {
        let name = format!("{}-marker", self.id);
        self.objects.push(InfraObject::SdnController(SdnControllerRecord {
            id: ObjectId::new(name.clone()),
            opaque_ref: opaque(&name),
            protocol: protocol.to_string(),
            address: address.to_string(),
            port,
        }));
        self
    }

    /// Adds an enabled, live host with one management interface.
    pub fn host(self, name: &str, address: &str) -> Self {
        self.host_with_pif(name, address, "eth0", VlanTag::UNTAGGED)
    }

    pub fn host_with_pif(mut self, name: &str, address: &str, device: &str, vlan: VlanTag) -> Self {
        let pif = mgmt_pif(name);
        self.objects.push(InfraObject::Host(HostRecord {
            id: ObjectId::new(name),
            opaque_ref: opaque(name),
            name_label: name.to_string(),
            address: address.to_string(),
            enabled: true,
            pifs: vec![opaque(pif.as_str())],
            metrics: opaque(&format!("{name}-metrics")),
        }));
        self.objects.push(InfraObject::HostMetrics(HostMetricsRecord {
            id: ObjectId::new(format!("{name}-metrics")),
            opaque_ref: opaque(&format!("{name}-metrics")),
            live: true,
        }));
        self.objects.push(InfraObject::Pif(PifRecord {
            id: pif.clone(),
            opaque_ref: opaque(pif.as_str()),
            device: device.to_string(),
            vlan,
            host: opaque(name),
            network: opaque(&format!("{}-mgmt", self.id)),
            currently_attached: true,
            ip_configuration_mode: IpConfigurationMode::Static,
        }));
        self
    }

    /// Adds a network with the given metadata.
    pub fn network(mut self, name: &str, entries: &[(&str, &str)]) -> Self {
        self.objects.push(InfraObject::Network(NetworkRecord {
            id: ObjectId::new(name),
            opaque_ref: opaque(name),
            name_label: name.to_string(),
            other_config: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Metadata>(),
        }));
        self
    }

    /// Adds an attached tunnel of `host` into `network` over its
    /// management interface.
    pub fn tunnel(mut self, host: &str, network: &str) -> Self {
        let access = format!("{host}-{network}-access");
        let tunnel = format!("{host}-{network}-tunnel");
        if let Some(InfraObject::Host(record)) = self
            .objects
            .iter_mut()
            .find(|o| o.opaque_ref() == &opaque(host))
        {
            record.pifs.push(opaque(&access));
        }
        self.objects.push(InfraObject::Pif(PifRecord {
            id: ObjectId::new(access.clone()),
            opaque_ref: opaque(&access),
            device: format!("tunnel-{network}"),
            vlan: VlanTag::UNTAGGED,
            host: opaque(host),
            network: opaque(network),
            currently_attached: true,
            ip_configuration_mode: IpConfigurationMode::None,
        }));
        self.objects.push(InfraObject::Tunnel(TunnelRecord {
            id: ObjectId::new(tunnel.clone()),
            opaque_ref: opaque(&tunnel),
            access_pif: opaque(&access),
            transport_pif: opaque(mgmt_pif(host).as_str()),
            status: TunnelStatus::inactive(),
        }));
        self
    }

    pub fn certificate(mut self, name: &str, content: &str) -> Self {
        self.certificates.push((name.to_string(), content.to_string()));
        self
    }

    pub fn build(self) -> Arc<MemoryPool> {
        let pool = MemoryPool::new(&self.id, &self.name, self.objects);
        for (name, content) in &self.certificates {
            pool.install_certificate(name, content);
        }
        Arc::new(pool)
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
