//! Per-host virtual-switch control channel.
//!
//! A [`SwitchControlClient`] holds one host's identity and the controller's
//! current credentials. The wire protocol is delegated to a
//! [`SwitchProtocol`] implementation; the client only builds the TLS
//! configuration it needs and hands it over on every call.

use crate::certs::CertificateBundle;
use crate::error::SwitchError;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustls::{ClientConfig, RootCertStore};
use sdn_types::{Encapsulation, ObjectId, PoolId, PrivateNetworkId, Vni};
use std::sync::Arc;
use tracing::debug;

/// Identity of the host a client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub id: ObjectId,
    pub pool: PoolId,
    pub name_label: String,
    pub address: String,
}

/// Request to provision one end of a spoke/center tunnel pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    pub private_network: PrivateNetworkId,
    /// Pool-local network the bridge belongs to.
    pub network: ObjectId,
    pub network_name: String,
    /// Address of the host at the other end of the tunnel.
    pub remote_address: String,
    pub encapsulation: Encapsulation,
    pub vni: Vni,
    /// Shared secret for encrypted overlays.
    pub password: Option<String>,
}

/// What a protocol implementation needs to reach one host.
#[derive(Clone)]
pub struct SwitchSession<'a> {
    pub host: &'a HostIdentity,
    /// `address:port` of the host's switch daemon.
    pub endpoint: String,
    pub tls: Arc<ClientConfig>,
}

/// Wire protocol spoken to the virtual-switch daemon.
#[async_trait]
pub trait SwitchProtocol: Send + Sync {
    /// Creates (or reuses) the tunnel interface and port for `request` and
    /// returns the name of the bridge it was attached to.
    async fn add_interface_and_port(
        &self,
        session: &SwitchSession<'_>,
        request: &PortRequest,
    ) -> Result<String, SwitchError>;

    /// Removes every port this controller created for the overlay on the
    /// given network's bridge.
    async fn reset_for_network(
        &self,
        session: &SwitchSession<'_>,
        network: &ObjectId,
        private_network: &PrivateNetworkId,
    ) -> Result<(), SwitchError>;
}

/// Protocol used when no client is wired in. Every call fails.
#[derive(Debug, Default)]
pub struct UnconfiguredSwitch;

#[async_trait]
impl SwitchProtocol for UnconfiguredSwitch {
    async fn add_interface_and_port(
        &self,
        _session: &SwitchSession<'_>,
        _request: &PortRequest,
    ) -> Result<String, SwitchError> {
        Err(SwitchError::NotConfigured)
    }

    async fn reset_for_network(
        &self,
        _session: &SwitchSession<'_>,
        _network: &ObjectId,
        _private_network: &PrivateNetworkId,
    ) -> Result<(), SwitchError> {
        Err(SwitchError::NotConfigured)
    }
}

struct Credentials {
    bundle: Arc<CertificateBundle>,
    tls: Option<Arc<ClientConfig>>,
}

/// Control-channel client for one host.
pub struct SwitchControlClient {
    host: HostIdentity,
    port: u16,
    protocol: Arc<dyn SwitchProtocol>,
    credentials: RwLock<Credentials>,
}

impl SwitchControlClient {
    /// Creates a client. Never performs I/O.
    pub fn new(
        host: HostIdentity,
        bundle: Arc<CertificateBundle>,
        protocol: Arc<dyn SwitchProtocol>,
        port: u16,
    ) -> Self {
        Self {
            host,
            port,
            protocol,
            credentials: RwLock::new(Credentials { bundle, tls: None }),
        }
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host.address, self.port)
    }

    /// Current credentials.
    pub fn credentials(&self) -> Arc<CertificateBundle> {
        self.credentials.read().bundle.clone()
    }

    /// Swaps in new credentials; the next call uses them.
    pub fn update_credentials(&self, bundle: Arc<CertificateBundle>) {
        *self.credentials.write() = Credentials { bundle, tls: None };
        debug!(host = %self.host.name_label, "Control-channel credentials updated");
    }

    /// TLS configuration for the current credentials, built on first use.
    pub fn tls_config(&self) -> Result<Arc<ClientConfig>, SwitchError> {
        let bundle = {
            let credentials = self.credentials.read();
            if let Some(tls) = &credentials.tls {
                return Ok(tls.clone());
            }
            credentials.bundle.clone()
        };

        let tls = Arc::new(build_client_config(&bundle)?);

        let mut credentials = self.credentials.write();
        // Credentials may have been swapped while building.
        if Arc::ptr_eq(&credentials.bundle, &bundle) {
            credentials.tls = Some(tls.clone());
        }
        Ok(tls)
    }

    fn session(&self) -> Result<SwitchSession<'_>, SwitchError> {
        Ok(SwitchSession {
            host: &self.host,
            endpoint: self.endpoint(),
            tls: self.tls_config()?,
        })
    }

    pub async fn add_interface_and_port(&self, request: &PortRequest) -> Result<String, SwitchError> {
        let session = self.session()?;
        self.protocol.add_interface_and_port(&session, request).await
    }

    pub async fn reset_for_network(
        &self,
        network: &ObjectId,
        private_network: &PrivateNetworkId,
    ) -> Result<(), SwitchError> {
        let session = self.session()?;
        self.protocol
            .reset_for_network(&session, network, private_network)
            .await
    }
}

fn build_client_config(bundle: &CertificateBundle) -> Result<ClientConfig, SwitchError> {
    let mut ca_pem = bundle.ca_cert.as_bytes();
    let mut cert_pem = bundle.client_cert.as_bytes();
    let mut key_pem = bundle.client_key.as_bytes();

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_pem) {
        let cert = cert.map_err(|e| SwitchError::Tls(format!("CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| SwitchError::Tls(format!("CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(SwitchError::Tls("no CA certificate found".to_string()));
    }

    let certs = rustls_pemfile::certs(&mut cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SwitchError::Tls(format!("client certificate: {e}")))?;
    if certs.is_empty() {
        return Err(SwitchError::Tls("no client certificate found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut key_pem)
        .map_err(|e| SwitchError::Tls(format!("client key: {e}")))?
        .ok_or_else(|| SwitchError::Tls("no client key found".to_string()))?;

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| SwitchError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| SwitchError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::{CertificateGenerator, SelfSignedGenerator};

    fn identity() -> HostIdentity {
        HostIdentity {
            id: ObjectId::new("host-1"),
            pool: PoolId::new("pool-a"),
            name_label: "host 1".to_string(),
            address: "10.0.0.1".to_string(),
        }
    }

    fn bundle() -> Arc<CertificateBundle> {
        Arc::new(SelfSignedGenerator::default().generate().unwrap())
    }

    #[test]
    fn test_endpoint() {
        let client = SwitchControlClient::new(identity(), bundle(), Arc::new(UnconfiguredSwitch), 6640);
        assert_eq!(client.endpoint(), "10.0.0.1:6640");
        assert_eq!(client.host().id, ObjectId::new("host-1"));
    }

    #[test]
    fn test_tls_config_cached_until_update() {
        let client = SwitchControlClient::new(identity(), bundle(), Arc::new(UnconfiguredSwitch), 6640);

        let first = client.tls_config().unwrap();
        let again = client.tls_config().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let replacement = bundle();
        client.update_credentials(replacement.clone());
        assert!(Arc::ptr_eq(&client.credentials(), &replacement));

        let rebuilt = client.tls_config().unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[test]
    fn test_invalid_credentials() {
        let garbage = Arc::new(CertificateBundle {
            client_key: "nope".to_string(),
            client_cert: "nope".to_string(),
            ca_cert: "nope".to_string(),
        });
        let client = SwitchControlClient::new(identity(), garbage, Arc::new(UnconfiguredSwitch), 6640);
        assert!(matches!(client.tls_config(), Err(SwitchError::Tls(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_protocol_fails() {
        let client = SwitchControlClient::new(identity(), bundle(), Arc::new(UnconfiguredSwitch), 6640);
        let err = client
            .reset_for_network(&ObjectId::new("net"), &PrivateNetworkId::new("pn"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::NotConfigured));
    }
}
