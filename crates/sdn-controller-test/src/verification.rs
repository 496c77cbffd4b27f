//! Verification helpers for controller state
//!
//! Checks the structural invariants of overlays and the tunnel statuses the
//! controller wrote to the pools.

use crate::memory_pool::MemoryPool;
use sdn_controller::OverlayController;
use sdn_types::{ObjectId, OpaqueRef, PrivateNetworkId};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Private network '{0}' not found")]
    PrivateNetworkNotFound(PrivateNetworkId),

    #[error("Center '{center}' of '{private_network}' is outside the member pools")]
    CenterOutsideMembers {
        private_network: PrivateNetworkId,
        center: ObjectId,
    },

    #[error("Star-center index mismatch: expected {expected:?}, indexed {actual:?}")]
    StarIndexMismatch {
        expected: Vec<ObjectId>,
        actual: Vec<ObjectId>,
    },

    #[error("No tunnel for host '{host}' into network '{network}'")]
    TunnelNotFound { host: OpaqueRef, network: OpaqueRef },

    #[error("Tunnel of host '{host}' is active={actual}, expected active={expected}")]
    TunnelStatusMismatch {
        host: OpaqueRef,
        expected: bool,
        actual: bool,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Checks that every overlay's center lives in one of its member pools and
/// that the star-center index lists exactly the current centers.
pub async fn verify_overlays(controller: &OverlayController) -> VerifyResult<()> {
    let mut expected = Vec::new();

    for id in controller.private_network_ids() {
        let pn = controller
            .private_network(&id)
            .await
            .ok_or_else(|| VerificationError::PrivateNetworkNotFound(id.clone()))?;
        let Some(center) = pn.center() else {
            continue;
        };
        if !pn.pools().any(|pool| pool == &center.pool) {
            return Err(VerificationError::CenterOutsideMembers {
                private_network: id,
                center: center.id.clone(),
            });
        }
        expected.push(center.id.clone());
    }

    expected.sort();
    expected.dedup();
    let actual = controller.star_centers();
    if expected != actual {
        return Err(VerificationError::StarIndexMismatch { expected, actual });
    }
    Ok(())
}

/// Checks the `active` flag of the tunnel joining `host` to `network`.
pub fn verify_tunnel_active(
    pool: &MemoryPool,
    host: &OpaqueRef,
    network: &OpaqueRef,
    expected: bool,
) -> VerifyResult<()> {
    let status = pool
        .tunnel_status(host, network)
        .ok_or_else(|| VerificationError::TunnelNotFound {
            host: host.clone(),
            network: network.clone(),
        })?;
    if status.active != expected {
        return Err(VerificationError::TunnelStatusMismatch {
            host: host.clone(),
            expected,
            actual: status.active,
        });
    }
    if status.active && status.key.is_none() {
        return Err(VerificationError::TunnelStatusMismatch {
            host: host.clone(),
            expected,
            actual: false,
        });
    }
    Ok(())
}
