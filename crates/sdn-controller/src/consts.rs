//! Fixed names shared with the infrastructure and the virtual switch.

/// Protocol of the pool-level SDN controller marker.
pub const PROTOCOL: &str = "pssl";

/// Name the CA certificate is installed under on every managed pool.
pub const SDN_CONTROLLER_CERT: &str = "sdn-controller-ca.pem";

/// Certificate directory content.
pub mod cert_files {
    pub const CA_CERT: &str = "ca-cert.pem";
    pub const CLIENT_KEY: &str = "client-key.pem";
    pub const CLIENT_CERT: &str = "client-cert.pem";
}

/// Default virtual-switch control-channel port.
pub const DEFAULT_SWITCH_PORT: u16 = 6640;
