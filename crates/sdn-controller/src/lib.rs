//! SDN overlay controller.
//!
//! Builds private overlay networks across independently managed
//! virtualization pools. Each overlay is a star: one elected center host
//! and a tunnel from every other eligible host toward it.
//!
//! # Architecture
//!
//! ```text
//! +----------------+   events    +---------------------+   ports   +---------------+
//! |  pool (Infra)  | ----------> |  OverlayController  | --------> |  host switch  |
//! |  object cache  | <---------- |  PrivateNetwork(s)  |           |  daemon (TLS) |
//! +----------------+   calls     +---------------------+           +---------------+
//! ```
//!
//! The infrastructure API ([`InfraApi`]) and the virtual-switch wire
//! protocol ([`SwitchProtocol`]) are traits supplied by the embedding
//! process.

pub mod certs;
pub mod config;
pub mod consts;
pub mod controller;
pub mod error;
pub mod infra;
pub mod logging;
pub mod migrations;
pub mod private_network;
pub mod switch;
pub mod vni;

pub use certs::{CertificateBundle, CertificateGenerator, CertificateSource, CertificateStore, SelfSignedGenerator};
pub use config::{ControllerConfig, LogFormat, DEFAULT_CONFIG_PATH};
pub use controller::{is_managed, ControllerOptions, CreatePrivateNetwork, OverlayController};
pub use error::{ControllerError, ControllerResult, InfraError, SwitchError};
pub use infra::{InfraApi, InfraObject, ObjectEvent, PoolSnapshot};
pub use private_network::{choose_center, PrivateNetwork};
pub use switch::{PortRequest, SwitchControlClient, SwitchProtocol, SwitchSession, UnconfiguredSwitch};
pub use vni::VniAllocator;
