//! Control-channel certificate store.
//!
//! The controller authenticates to every host's virtual-switch daemon with a
//! client key/certificate signed by its own CA. The CA certificate is
//! installed on each managed pool so hosts trust the controller.
//!
//! A certificate directory holds exactly three PEM files. A self-signed
//! bundle is all-or-nothing: if the CA certificate is missing, the client
//! key and certificate must be missing too.

use crate::config::CertificatesConfig;
use crate::consts::cert_files::{CA_CERT, CLIENT_CERT, CLIENT_KEY};
use crate::error::{ControllerError, ControllerResult};
use parking_lot::RwLock;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// CA certificate plus the client key/certificate pair, PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub client_key: String,
    pub client_cert: String,
    pub ca_cert: String,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("client_key", &"<redacted>")
            .field("client_cert_len", &self.client_cert.len())
            .field("ca_cert_len", &self.ca_cert.len())
            .finish()
    }
}

/// Produces a fresh CA plus a client key/certificate signed by it.
pub trait CertificateGenerator: Send + Sync {
    fn generate(&self) -> ControllerResult<CertificateBundle>;
}

/// Default generator backed by `rcgen`.
#[derive(Debug, Clone)]
pub struct SelfSignedGenerator {
    common_name: String,
}

impl SelfSignedGenerator {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
        }
    }
}

impl Default for SelfSignedGenerator {
    fn default() -> Self {
        Self::new("sdn-controller")
    }
}

impl CertificateGenerator for SelfSignedGenerator {
    fn generate(&self) -> ControllerResult<CertificateBundle> {
        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params
            .distinguished_name
            .push(DnType::CommonName, format!("{} CA", self.common_name));
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = Certificate::from_params(ca_params)
            .map_err(|e| ControllerError::certificate(format!("CA generation failed: {e}")))?;
        let ca_cert = ca
            .serialize_pem()
            .map_err(|e| ControllerError::certificate(format!("CA serialization failed: {e}")))?;

        let mut client_params = CertificateParams::new(vec![self.common_name.clone()]);
        client_params
            .distinguished_name
            .push(DnType::CommonName, self.common_name.clone());
        let client = Certificate::from_params(client_params)
            .map_err(|e| ControllerError::certificate(format!("client key generation failed: {e}")))?;
        let client_cert = client
            .serialize_pem_with_signer(&ca)
            .map_err(|e| ControllerError::certificate(format!("client signing failed: {e}")))?;

        Ok(CertificateBundle {
            client_key: client.serialize_private_key_pem(),
            client_cert,
            ca_cert,
        })
    }
}

async fn exists(path: &Path) -> ControllerResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| ControllerError::io(path, e))
}

async fn read(path: PathBuf) -> ControllerResult<String> {
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ControllerError::io(path, e))
}

async fn write(path: PathBuf, content: &str) -> ControllerResult<()> {
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| ControllerError::io(path, e))
}

/// Reads the three PEM files from `dir`.
pub async fn load(dir: &Path) -> ControllerResult<CertificateBundle> {
    let (client_key, client_cert, ca_cert) = tokio::try_join!(
        read(dir.join(CLIENT_KEY)),
        read(dir.join(CLIENT_CERT)),
        read(dir.join(CA_CERT)),
    )?;
    Ok(CertificateBundle {
        client_key,
        client_cert,
        ca_cert,
    })
}

/// Loads the bundle from `dir`, generating and persisting it on first run.
///
/// # Errors
///
/// Fails with `InvariantViolation` if the CA certificate is missing while
/// the client key or certificate exists.
pub async fn ensure(
    dir: &Path,
    generator: &dyn CertificateGenerator,
) -> ControllerResult<CertificateBundle> {
    if exists(&dir.join(CA_CERT)).await? {
        return load(dir).await;
    }

    for name in [CLIENT_KEY, CLIENT_CERT] {
        if exists(&dir.join(name)).await? {
            return Err(ControllerError::invariant(format!(
                "{name} exists in {} but {CA_CERT} does not",
                dir.display()
            )));
        }
    }

    info!(dir = %dir.display(), "No self-signed certificates found, generating them");
    let bundle = generator.generate()?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ControllerError::io(dir, e))?;
    write(dir.join(CA_CERT), &bundle.ca_cert).await?;
    write(dir.join(CLIENT_KEY), &bundle.client_key).await?;
    write(dir.join(CLIENT_CERT), &bundle.client_cert).await?;

    debug!(dir = %dir.display(), "All certificates have been written");
    Ok(bundle)
}

/// Where the bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Operator-provided directory; files are read, never generated.
    Provided(PathBuf),
    /// Controller data directory; a self-signed bundle is generated once.
    SelfSigned(PathBuf),
}

impl CertificateSource {
    pub fn from_config(config: &CertificatesConfig) -> Self {
        match &config.cert_dir {
            Some(dir) => CertificateSource::Provided(dir.clone()),
            None => CertificateSource::SelfSigned(config.data_dir.clone()),
        }
    }

    pub fn dir(&self) -> &Path {
        match self {
            CertificateSource::Provided(dir) | CertificateSource::SelfSigned(dir) => dir,
        }
    }
}

/// Holds the current bundle and reloads it on demand.
pub struct CertificateStore {
    source: CertificateSource,
    generator: Box<dyn CertificateGenerator>,
    current: RwLock<Option<Arc<CertificateBundle>>>,
}

impl CertificateStore {
    pub fn new(source: CertificateSource) -> Self {
        Self {
            source,
            generator: Box::new(SelfSignedGenerator::default()),
            current: RwLock::new(None),
        }
    }

    /// Replaces the generator used for self-signed bundles.
    pub fn with_generator(mut self, generator: impl CertificateGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn source(&self) -> &CertificateSource {
        &self.source
    }

    /// The bundle loaded by the last successful [`refresh`](Self::refresh).
    pub fn current(&self) -> Option<Arc<CertificateBundle>> {
        self.current.read().clone()
    }

    /// Reloads (or first generates) the bundle and makes it current.
    pub async fn refresh(&self) -> ControllerResult<Arc<CertificateBundle>> {
        let bundle = match &self.source {
            CertificateSource::Provided(dir) => load(dir).await?,
            CertificateSource::SelfSigned(dir) => ensure(dir, self.generator.as_ref()).await?,
        };
        let bundle = Arc::new(bundle);
        *self.current.write() = Some(bundle.clone());
        Ok(bundle)
    }
}
