//! Domain primitive types used across the harbortest workspace.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarborError;

/// Identifier Docker assigned to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character short form Docker prints in `docker ps`.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP, the default when a specifier omits the protocol.
    #[default]
    Tcp,
    /// UDP.
    Udp,
    /// SCTP.
    Sctp,
}

impl Protocol {
    /// Returns the lowercase name Docker uses in port keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container port in `<number>[/<proto>]` form, e.g. `6379/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExposedPort {
    /// Port number inside the container.
    pub number: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl ExposedPort {
    /// Creates a TCP port.
    #[must_use]
    pub const fn tcp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Tcp,
        }
    }

    /// Creates a UDP port.
    #[must_use]
    pub const fn udp(number: u16) -> Self {
        Self {
            number,
            protocol: Protocol::Udp,
        }
    }
}

impl FromStr for ExposedPort {
    type Err = HarborError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || HarborError::InvalidPort {
            spec: spec.to_string(),
        };
        let trimmed = spec.trim();
        let (number, protocol) = match trimmed.split_once('/') {
            Some((number, proto)) => {
                let protocol = match proto.to_ascii_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    "sctp" => Protocol::Sctp,
                    _ => return Err(invalid()),
                };
                (number, protocol)
            }
            None => (trimmed, Protocol::Tcp),
        };
        let number = number.parse::<u16>().map_err(|_| invalid())?;
        if number == 0 {
            return Err(invalid());
        }
        Ok(Self { number, protocol })
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// A port to expose, optionally pinned to a host address and port.
///
/// Accepts `[[host_ip:]host_port:]<number>[/<proto>]`, e.g. `6379/tcp`,
/// `8080:80/tcp` or `127.0.0.1:8080:80`. IPv6 host addresses may be
/// bracketed. An empty or zero host port lets Docker pick one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    /// Host interface to bind on; `None` binds on all interfaces.
    pub host_ip: Option<String>,
    /// Fixed host port; `None` lets Docker choose.
    pub host_port: Option<u16>,
    /// Container port.
    pub port: ExposedPort,
}

impl PortSpec {
    /// Returns `true` if the spec asks for an explicit host binding.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.host_ip.is_some() || self.host_port.is_some()
    }
}

impl From<ExposedPort> for PortSpec {
    fn from(port: ExposedPort) -> Self {
        Self {
            host_ip: None,
            host_port: None,
            port,
        }
    }
}

impl FromStr for PortSpec {
    type Err = HarborError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || HarborError::InvalidPort {
            spec: spec.to_string(),
        };
        let trimmed = spec.trim();
        let Some((binding, container)) = trimmed.rsplit_once(':') else {
            return Ok(trimmed.parse::<ExposedPort>().map_err(|_| invalid())?.into());
        };
        let port: ExposedPort = container.parse().map_err(|_| invalid())?;

        let (host_ip, host_port) = match binding.rsplit_once(':') {
            Some((ip, host_port)) => {
                let ip = ip
                    .strip_prefix('[')
                    .and_then(|ip| ip.strip_suffix(']'))
                    .unwrap_or(ip);
                (Some(ip).filter(|ip| !ip.is_empty()), host_port)
            }
            None => (None, binding),
        };
        let host_port = if host_port.is_empty() {
            None
        } else {
            Some(host_port.parse::<u16>().map_err(|_| invalid())?).filter(|p| *p != 0)
        };
        Ok(Self {
            host_ip: host_ip.map(str::to_string),
            host_port,
            port,
        })
    }
}

/// A single host-side binding of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host interface the port is bound on (`0.0.0.0`, `::`, ...).
    pub host_ip: String,
    /// Host port number.
    pub host_port: u16,
}

/// Container port to host bindings, as reported by an inspect call.
pub type PortMap = BTreeMap<ExposedPort, Vec<PortBinding>>;
