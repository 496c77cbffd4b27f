//! Tunnel identifier type.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tunnel identifier (VXLAN Network Identifier / GRE key) of an overlay.
///
/// The virtual switch uses it to keep traffic of different overlays apart
/// when they share a tunnel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vni(u32);

impl Vni {
    /// Largest identifier representable in a 24-bit VXLAN header.
    pub const MAX: u32 = (1 << 24) - 1;

    /// Creates a new tunnel identifier.
    pub const fn new(vni: u32) -> Self {
        Vni(vni)
    }

    /// Returns the identifier as a u32.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Vni {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vni: u32 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidVni(s.to_string()))?;
        if vni > Self::MAX {
            return Err(ParseError::InvalidVni(s.to_string()));
        }
        Ok(Vni(vni))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("42".parse::<Vni>().unwrap(), Vni::new(42));
        assert!("-1".parse::<Vni>().is_err());
        assert!("abc".parse::<Vni>().is_err());
        assert!("16777216".parse::<Vni>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(Vni::new(1) < Vni::new(2));
    }
}
