//! Identifier newtypes for infrastructure objects.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id! {
    /// Identity of a pool (cluster of hosts behind one infrastructure API).
    PoolId
}

string_id! {
    /// Globally unique object identity (the object's UUID).
    ///
    /// Removal events are keyed by this identity.
    ObjectId
}

string_id! {
    /// Pool-local object reference used by infrastructure RPCs.
    ///
    /// Two pools may hand out the same reference for different objects,
    /// so a reference is only meaningful together with its [`PoolId`].
    OpaqueRef
}

string_id! {
    /// Identity of a private overlay network, shared by every pool-local
    /// network that participates in it.
    PrivateNetworkId
}

impl OpaqueRef {
    /// The null reference used by the infrastructure API for "no object".
    pub const NULL: &'static str = "OpaqueRef:NULL";

    /// Returns true if this is the null reference.
    pub fn is_null(&self) -> bool {
        self.0 == Self::NULL
    }
}
