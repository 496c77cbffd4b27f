//! Tunnel encapsulation protocol.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encapsulation used for overlay tunnels.
///
/// # Examples
///
/// ```
/// use sdn_types::Encapsulation;
///
/// let encap: Encapsulation = "vxlan".parse().unwrap();
/// assert_eq!(encap, Encapsulation::Vxlan);
/// assert_eq!(encap.to_string(), "vxlan");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encapsulation {
    /// Generic Routing Encapsulation.
    #[default]
    Gre,
    /// Virtual eXtensible LAN.
    Vxlan,
}

impl Encapsulation {
    /// Returns the protocol name as stored in network metadata.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Encapsulation::Gre => "gre",
            Encapsulation::Vxlan => "vxlan",
        }
    }
}

impl fmt::Display for Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encapsulation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gre" => Ok(Encapsulation::Gre),
            "vxlan" => Ok(Encapsulation::Vxlan),
            _ => Err(ParseError::InvalidEncapsulation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Encapsulation {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Encapsulation> for String {
    fn from(encap: Encapsulation) -> String {
        encap.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("GRE".parse::<Encapsulation>().unwrap(), Encapsulation::Gre);
        assert_eq!("VxLan".parse::<Encapsulation>().unwrap(), Encapsulation::Vxlan);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            "geneve".parse::<Encapsulation>(),
            Err(ParseError::InvalidEncapsulation("geneve".to_string()))
        );
    }

    #[test]
    fn test_default_is_gre() {
        assert_eq!(Encapsulation::default(), Encapsulation::Gre);
    }
}
