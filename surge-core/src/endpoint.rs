//! Endpoint abstraction for transport-agnostic listen addressing.
//!
//! Addresses take the form `<scheme>://<target>` where the scheme selects the
//! transport and the target is a `host:port` pair (TCP/UDP) or a filesystem
//! path (Unix domain sockets).

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

/// Transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`
    Tcp(SocketAddr),
    /// UDP transport: `udp://host:port`
    Udp(SocketAddr),
    /// Unix domain stream socket: `unix:///path/to/socket`
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// Supported formats:
    /// - `tcp://127.0.0.1:5555`
    /// - `tcp://[::1]:5555` (IPv6)
    /// - `tcp://:5555` (all interfaces)
    /// - `tcp://` (all interfaces, ephemeral port)
    /// - `udp://0.0.0.0:5555`
    /// - `unix:///tmp/test.sock` (Unix only)
    ///
    /// # Examples
    ///
    /// ```
    /// use surge_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(endpoint.is_tcp());
    ///
    /// let endpoint = Endpoint::parse("udp://:5555").unwrap();
    /// assert!(endpoint.is_udp());
    ///
    /// assert!(Endpoint::parse("tulip://howdy").is_err());
    /// assert!(Endpoint::parse("howdy").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// The lowercase scheme name of this endpoint.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Udp(_) => "udp",
            #[cfg(unix)]
            Self::Unix(_) => "unix",
        }
    }

    /// Returns true if this is a TCP endpoint.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }

    /// Returns true if this is a UDP endpoint.
    pub fn is_udp(&self) -> bool {
        matches!(self, Self::Udp(_))
    }

    /// Returns true if this is a Unix domain socket endpoint.
    #[cfg(unix)]
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// Returns true for connection-oriented transports (TCP, Unix).
    pub fn is_stream(&self) -> bool {
        !self.is_udp()
    }

    /// The socket address for TCP/UDP endpoints.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(addr) | Self::Udp(addr) => Some(*addr),
            #[cfg(unix)]
            Self::Unix(_) => None,
        }
    }
}

/// Resolve a `host:port` target.
///
/// An empty target means "any interface, ephemeral port" and a target with an
/// empty host (`:9000`) binds every IPv4 interface.
fn resolve_inet(target: &str) -> Result<SocketAddr, EndpointError> {
    if target.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    }

    if let Some(port) = target.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidAddress(target.to_string()))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }

    target
        .to_socket_addrs()
        .map_err(|_| EndpointError::InvalidAddress(target.to_string()))?
        .next()
        .ok_or_else(|| EndpointError::InvalidAddress(target.to_string()))
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, target) = s
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(s.to_string()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp(resolve_inet(target)?)),
            "udp" => Ok(Self::Udp(resolve_inet(target)?)),
            "unix" => {
                #[cfg(unix)]
                {
                    if target.is_empty() {
                        return Err(EndpointError::InvalidUnixPath(s.to_string()));
                    }
                    Ok(Self::Unix(PathBuf::from(target)))
                }
                #[cfg(not(unix))]
                {
                    Err(EndpointError::UnixNotSupported)
                }
            }
            _ => Err(EndpointError::InvalidScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Udp(addr) => write!(f, "udp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Errors that can occur when parsing endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Missing scheme in endpoint: {0} (expected <scheme>://<target>)")]
    MissingScheme(String),

    #[error("Invalid scheme in endpoint: {0} (expected tcp://, udp://, or unix://)")]
    InvalidScheme(String),

    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    #[error("Invalid unix socket path: {0}")]
    InvalidUnixPath(String),

    #[error("Unix domain sockets not supported on this platform")]
    UnixNotSupported,
}
