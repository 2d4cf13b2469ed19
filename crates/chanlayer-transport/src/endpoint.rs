use std::fmt;
use std::str::FromStr;

use crate::TransportError;

/// Scheme prefix every endpoint address carries.
pub const INPROC_SCHEME: &str = "inproc://";

/// Address of an in-process endpoint, e.g. `inproc://channels`.
///
/// Not a network address: it only names a rendezvous point inside one
/// [`Transport`](crate::Transport).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddr(String);

impl EndpointAddr {
    /// The part after the scheme.
    pub fn name(&self) -> &str {
        &self.0[INPROC_SCHEME.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointAddr({})", self.0)
    }
}

impl FromStr for EndpointAddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(INPROC_SCHEME) {
            Some(name) if !name.is_empty() && !name.chars().any(char::is_whitespace) => {
                Ok(Self(s.to_string()))
            }
            _ => Err(TransportError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl serde::Serialize for EndpointAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EndpointAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
