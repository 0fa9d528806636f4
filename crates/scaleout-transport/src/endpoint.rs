//! Transport endpoint URIs.
//!
//! Endpoints use the `tcp://host:port` form. A `*` host binds every
//! interface, and port `0` asks the OS for an ephemeral port.

use std::fmt;
use std::str::FromStr;

use crate::traits::TransportError;

const TCP_SCHEME: &str = "tcp://";

/// A parsed `tcp://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint URI.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] for unsupported schemes,
    /// missing hosts, or bad ports.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidEndpoint(format!("{uri}: {reason}"));

        let rest = uri
            .trim()
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| invalid("expected tcp://host:port"))?;

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;

        Ok(Self::tcp(host, port))
    }

    /// Get the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check if this endpoint binds every interface.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.host == "*"
    }

    /// The `host:port` form handed to the socket layer.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.is_wildcard() { "0.0.0.0" } else { &self.host };
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}[{}]:{}", TCP_SCHEME, self.host, self.port)
        } else {
            write!(f, "{}{}:{}", TCP_SCHEME, self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::tcp(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:6000").unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 6000);
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:6000");
        assert_eq!(endpoint.authority(), "127.0.0.1:6000");
    }

    #[test]
    fn test_parse_wildcard_and_ipv6() {
        let wildcard: Endpoint = "tcp://*:7000".parse().unwrap();
        assert!(wildcard.is_wildcard());
        assert_eq!(wildcard.authority(), "0.0.0.0:7000");

        let v6 = Endpoint::parse("tcp://[::1]:7001").unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.authority(), "[::1]:7001");
        assert_eq!(v6.to_string(), "tcp://[::1]:7001");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        for uri in [
            "",
            "127.0.0.1:6000",
            "udp://127.0.0.1:6000",
            "tcp://127.0.0.1",
            "tcp://:6000",
            "tcp://host:notaport",
            "tcp://host:70000",
        ] {
            assert!(
                matches!(Endpoint::parse(uri), Err(TransportError::InvalidEndpoint(_))),
                "accepted {uri:?}"
            );
        }
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: std::net::SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert_eq!(Endpoint::from(addr).to_string(), "tcp://10.0.0.1:9000");
    }
}
