//! Minimal UDP socket wrapper and address helpers.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use super::error::{Result, TransportError};

/// Binding for a UDP socket.
#[derive(Debug, Clone)]
pub struct SocketBinding {
    socket: Arc<UdpSocket>,
}

impl SocketBinding {
    /// Bind to the provided address.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(false)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Set socket read timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    /// Set socket write timeout.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_write_timeout(timeout)
    }

    /// Adjust the non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    /// Send bytes to a remote address.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    /// Receive bytes into the provided buffer.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Access the local address for this binding.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Loopback address of the same family as `ip`.
pub(crate) fn loopback_for(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}

/// Split a `host[:port]` string, filling in `default_port` when the port is omitted.
///
/// IPv6 literals must be bracketed when a port is given (`[::1]:6820`); a bare IPv6
/// literal is taken as a host without port. An empty host means "any address".
pub fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let invalid = |reason: &str| TransportError::Resolve {
        addr: s.to_owned(),
        reason: reason.to_owned(),
    };
    let s = s.trim();

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing closing bracket"))?;
        match tail {
            "" => (host, None),
            _ => (
                host,
                Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| invalid("unexpected text after bracket"))?,
                ),
            ),
        }
    } else if s.matches(':').count() == 1 {
        let (host, port) = s.split_once(':').unwrap_or((s, ""));
        (host, Some(port))
    } else {
        (s, None)
    };

    let port = match port {
        None | Some("") => default_port,
        Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
    };
    let host = if host.is_empty() { "0.0.0.0" } else { host };

    Ok((host.to_owned(), port))
}

/// Resolve a `host[:port]` string to the first matching socket address.
pub fn resolve(s: &str, default_port: u16) -> Result<SocketAddr> {
    let (host, port) = parse_host_port(s, default_port)?;
    (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|err| TransportError::Resolve {
            addr: s.to_owned(),
            reason: err.to_string(),
        })?
        .next()
        .ok_or_else(|| TransportError::Resolve {
            addr: s.to_owned(),
            reason: "no addresses found".to_owned(),
        })
}
