//! Overlay metadata stored on infrastructure network objects.
//!
//! Every pool-local network participating in an overlay carries these
//! namespaced, string-valued keys in its key/value metadata. Updates use
//! last-write-wins semantics with an explicit null for deletion, which is
//! what [`MetadataPatch`] models.

use std::collections::{BTreeMap, HashMap};

/// Namespace prefix shared by every controller-owned key.
pub const NAMESPACE: &str = "sdn-controller";

/// Encapsulation protocol (`gre` or `vxlan`).
pub const ENCAPSULATION: &str = "sdn-controller:encapsulation";
/// `true` if the overlay traffic is encrypted.
pub const ENCRYPTED: &str = "sdn-controller:encrypted";
/// Device name of the transport interface tunnels are built on.
pub const PIF_DEVICE: &str = "sdn-controller:pif-device";
/// Host identity to prioritise as star center.
pub const PREFERRED_CENTER: &str = "sdn-controller:preferred-center";
/// Overlay identity, shared by every member network across pools.
pub const PRIVATE_NETWORK_UUID: &str = "sdn-controller:private-network-uuid";
/// VLAN tag of the transport interface.
pub const VLAN: &str = "sdn-controller:vlan";
/// Tunnel identifier of the overlay.
pub const VNI: &str = "sdn-controller:vni";

/// Legacy keys that older controller versions wrote. Read only by the
/// migrations, which rewrite them into the keys above.
pub mod legacy {
    /// Overlay identity used before overlays spanned several pools.
    pub const CROSS_POOL_NETWORK_UUID: &str = "sdn-controller:cross-pool-network-uuid";
    /// Marker for single-pool private networks.
    pub const PRIVATE_POOL_WIDE: &str = "sdn-controller:private-pool-wide";

    /// Un-namespaced keys and the namespaced key each one moves to.
    pub const UNNAMESPACED: &[(&str, &str)] = &[
        ("cross_pool_network_uuid", CROSS_POOL_NETWORK_UUID),
        ("encapsulation", super::ENCAPSULATION),
        ("pif_device", super::PIF_DEVICE),
        ("private_pool_wide", PRIVATE_POOL_WIDE),
        ("vni", super::VNI),
    ];
}

/// Extra key set on created networks so other management tools do not
/// treat them as automatically managed.
pub const AUTOMATIC: &str = "automatic";

/// Key/value metadata of an infrastructure object.
pub type Metadata = HashMap<String, String>;

/// A single atomic metadata update.
///
/// `Some(value)` sets a key, `None` deletes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    entries: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key (builder pattern).
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), Some(value.into()));
        self
    }

    /// Deletes a key (builder pattern).
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.entries.insert(key.into(), None);
        self
    }

    /// Merges another patch into this one; later entries win.
    pub fn merge(mut self, other: MetadataPatch) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(key, Some(value) | None)` entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Applies the patch to a metadata map.
    pub fn apply(&self, metadata: &mut Metadata) {
        for (key, value) in &self.entries {
            match value {
                Some(value) => {
                    metadata.insert(key.clone(), value.clone());
                }
                None => {
                    metadata.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keys_are_namespaced() {
        for key in [ENCAPSULATION, ENCRYPTED, PIF_DEVICE, PREFERRED_CENTER, PRIVATE_NETWORK_UUID, VLAN, VNI] {
            assert!(key.starts_with(NAMESPACE), "{key} is not namespaced");
        }
    }

    #[test]
    fn test_patch_apply_set_and_delete() {
        let mut metadata: Metadata = HashMap::from([
            ("vni".to_string(), "3".to_string()),
            ("keep".to_string(), "me".to_string()),
        ]);

        MetadataPatch::new()
            .delete("vni")
            .set(VNI, "3")
            .apply(&mut metadata);

        assert_eq!(metadata.get("vni"), None);
        assert_eq!(metadata.get(VNI).map(String::as_str), Some("3"));
        assert_eq!(metadata.get("keep").map(String::as_str), Some("me"));
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let patch = MetadataPatch::new()
            .set(VNI, "1")
            .merge(MetadataPatch::new().delete(VNI));
        let entries: Vec<_> = patch.iter().collect();
        assert_eq!(entries, vec![(VNI, None)]);
    }
}
