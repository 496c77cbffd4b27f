//! Configuration file support for the SDN controller.
//!
//! Loads and validates controller configuration from TOML files.
//! Default location: /etc/sdn-controller/sdn-controller.toml

use crate::consts::DEFAULT_SWITCH_PORT;
use crate::error::{ControllerError, ControllerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sdn-controller/sdn-controller.toml";

/// Certificate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatesConfig {
    /// Directory holding `ca-cert.pem`, `client-key.pem` and `client-cert.pem`.
    /// When unset, a self-signed bundle is kept in `data_dir`.
    #[serde(default)]
    pub cert_dir: Option<PathBuf>,

    /// Controller data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Reinstall the CA certificate on every managed pool
    #[serde(default)]
    pub override_certs: bool,
}

/// Reconciliation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Deadline imposed around every reconciliation item, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Virtual-switch control-channel TCP port
    #[serde(default = "default_switch_port")]
    pub switch_port: u16,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG` and `--log-level`)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub certificates: CertificatesConfig,

    #[serde(default)]
    pub controller: ControllerSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/sdn-controller")
}

fn default_call_timeout() -> u64 {
    60
}

fn default_switch_port() -> u16 {
    DEFAULT_SWITCH_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            cert_dir: None,
            data_dir: default_data_dir(),
            override_certs: false,
        }
    }
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            switch_port: default_switch_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ControllerResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ControllerError::config(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ControllerError::io(path, e)),
        }
    }

    /// Load from the default location or defaults
    pub fn load() -> ControllerResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Deadline for one reconciliation item
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.call_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> ControllerResult<()> {
        if self.controller.call_timeout_secs == 0 {
            return Err(ControllerError::config(
                "controller.call_timeout_secs",
                "must be > 0",
            ));
        }

        if self.controller.switch_port == 0 {
            return Err(ControllerError::config("controller.switch_port", "must be > 0"));
        }

        if self.certificates.data_dir.as_os_str().is_empty() {
            return Err(ControllerError::config(
                "certificates.data_dir",
                "must not be empty",
            ));
        }

        if matches!(&self.certificates.cert_dir, Some(dir) if dir.as_os_str().is_empty()) {
            return Err(ControllerError::config(
                "certificates.cert_dir",
                "must not be empty when set",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.certificates.cert_dir, None);
        assert_eq!(config.certificates.data_dir, PathBuf::from("/var/lib/sdn-controller"));
        assert!(!config.certificates.override_certs);
        assert_eq!(config.controller.switch_port, 6640);
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[certificates]
cert_dir = "/etc/sdn-controller/certs"
override_certs = true

[logging]
format = "json"
"#;
        let config: ControllerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.certificates.cert_dir,
            Some(PathBuf::from("/etc/sdn-controller/certs"))
        );
        assert!(config.certificates.override_certs);
        assert_eq!(config.logging.format, LogFormat::Json);
        // Unspecified values should use defaults
        assert_eq!(config.controller.call_timeout_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate() {
        assert!(ControllerConfig::default().validate().is_ok());

        let mut config = ControllerConfig::default();
        config.controller.call_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.certificates.cert_dir = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = ControllerConfig::load_or_default("/nonexistent/path.toml").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[controller]\nswitch_port = \"x\"\n").unwrap();
        assert!(matches!(
            ControllerConfig::load_or_default(&path),
            Err(ControllerError::Config { .. })
        ));
    }
}
