use std::fmt;

use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 27017;

/// The address of a server.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ServerAddress {
    pub host: String,

    /// Defaults to 27017 when unset.
    pub port: Option<u16>,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: impl Into<Option<u16>>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub(crate) fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port_or_default())
    }
}

/// The type of server a connection was established to, as reported by its handshake.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ServerType {
    Standalone,
    Mongos,
    #[serde(rename = "RSPrimary")]
    RsPrimary,
    #[serde(rename = "RSSecondary")]
    RsSecondary,
    #[serde(rename = "RSArbiter")]
    RsArbiter,
    #[serde(rename = "RSOther")]
    RsOther,
    #[serde(rename = "RSGhost")]
    RsGhost,
    LoadBalancer,
    #[default]
    Unknown,
}
