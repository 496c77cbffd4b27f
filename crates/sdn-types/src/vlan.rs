//! VLAN tag of a physical interface.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// VLAN tag as reported by the infrastructure API for a physical interface.
///
/// `-1` means the interface is untagged; `0..=4094` are tagged interfaces.
/// The tag is stored as a decimal string in overlay metadata and compared
/// against each host's interfaces when creating tunnels.
///
/// # Examples
///
/// ```
/// use sdn_types::VlanTag;
///
/// let tag: VlanTag = "-1".parse().unwrap();
/// assert!(!tag.is_tagged());
///
/// let tag: VlanTag = "100".parse().unwrap();
/// assert_eq!(tag.to_string(), "100");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct VlanTag(i64);

impl VlanTag {
    /// Untagged interface.
    pub const UNTAGGED: VlanTag = VlanTag(-1);

    /// Maximum valid VLAN ID.
    pub const MAX: i64 = 4094;

    /// Creates a new VLAN tag.
    ///
    /// # Errors
    ///
    /// Returns an error unless the tag is -1 or in 0-4094.
    pub const fn new(tag: i64) -> Result<Self, ParseError> {
        if tag == -1 || (tag >= 0 && tag <= Self::MAX) {
            Ok(VlanTag(tag))
        } else {
            Err(ParseError::InvalidVlanTag(String::new()))
        }
    }

    /// Returns the raw tag value.
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true if the interface carries a VLAN tag.
    pub const fn is_tagged(&self) -> bool {
        self.0 >= 0
    }
}

impl Default for VlanTag {
    fn default() -> Self {
        Self::UNTAGGED
    }
}

impl fmt::Display for VlanTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanTag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag: i64 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidVlanTag(s.to_string()))?;
        VlanTag::new(tag).map_err(|_| ParseError::InvalidVlanTag(s.to_string()))
    }
}

impl TryFrom<i64> for VlanTag {
    type Error = ParseError;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        VlanTag::new(tag).map_err(|_| ParseError::InvalidVlanTag(tag.to_string()))
    }
}

impl From<VlanTag> for i64 {
    fn from(tag: VlanTag) -> i64 {
        tag.0
    }
}
