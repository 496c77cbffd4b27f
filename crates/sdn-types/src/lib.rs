//! Common types for the overlay-network SDN controller.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the controller and its test harness:
//!
//! - [`PoolId`], [`ObjectId`], [`OpaqueRef`]: infrastructure object identities
//! - [`PrivateNetworkId`]: overlay identity stored in network metadata
//! - [`Encapsulation`]: tunnel encapsulation protocol (GRE or VXLAN)
//! - [`Vni`]: tunnel identifier carried by every overlay
//! - [`VlanTag`]: VLAN tag of a physical interface (untagged allowed)
//! - [`metadata`]: namespaced overlay metadata keys and [`MetadataPatch`]

mod encap;
mod ids;
pub mod metadata;
mod vlan;
mod vni;

pub use encap::Encapsulation;
pub use ids::{ObjectId, OpaqueRef, PoolId, PrivateNetworkId};
pub use metadata::{Metadata, MetadataPatch};
pub use vlan::VlanTag;
pub use vni::Vni;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid encapsulation: {0} (expected gre or vxlan)")]
    InvalidEncapsulation(String),

    #[error("invalid VNI: {0}")]
    InvalidVni(String),

    #[error("invalid VLAN tag: {0} (must be -1 or 0-4094)")]
    InvalidVlanTag(String),
}
