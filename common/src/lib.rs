use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    os::unix::io::{AsRawFd, RawFd},
};

use anyhow::{anyhow, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

mod ancillary;

pub use ancillary::Ancillary;

/// Address family preference used when resolving the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    /// Take the first address the resolver returns.
    #[default]
    Any,
    V4,
    V6,
}

impl Family {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        }
    }
}

/// IP-layer parameters applied to the socket before it is connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpOptions {
    /// IPv4 TTL or IPv6 unicast hop limit.
    pub ttl: Option<u32>,
    /// IPv4 type-of-service byte or IPv6 traffic class.
    pub tos: Option<u8>,
}

// Resolve a host name (or literal) and port into a single destination.
pub fn resolve(target: &str, port: u16, family: Family) -> Result<SocketAddr> {
    let addrs = (target, port)
        .to_socket_addrs()
        .map_err(|e| anyhow!("unknown host {}: {}", target, e))?;
    addrs
        .into_iter()
        .find(|addr| family.accepts(addr))
        .ok_or_else(|| {
            anyhow!("no {:?} address found for host {}", family, target)
        })
}

// UDP strongly typed socket, connected to a single peer
pub struct UDPSocket {
    socket: Socket,
    peer: SocketAddr,
    ancillary: bool,
}

impl UDPSocket {
    pub fn connect(
        peer: SocketAddr,
        bind_interface: Option<&str>,
        options: IpOptions,
    ) -> Result<UDPSocket> {
        // Check peer is an IPv4 or IPv6 address
        let socket = match peer.ip() {
            IpAddr::V4(_) => {
                let socket = Socket::new(
                    Domain::IPV4,
                    Type::DGRAM,
                    Some(Protocol::UDP),
                )?;
                if let Some(ttl) = options.ttl {
                    socket.set_ttl(ttl)?;
                }
                if let Some(tos) = options.tos {
                    socket.set_tos(tos as u32)?;
                }
                socket
            }
            IpAddr::V6(_) => {
                let socket = Socket::new(
                    Domain::IPV6,
                    Type::DGRAM,
                    Some(Protocol::UDP),
                )?;
                if let Some(hops) = options.ttl {
                    socket.set_unicast_hops_v6(hops)?;
                }
                if let Some(tclass) = options.tos {
                    ancillary::set_traffic_class(&socket, tclass)?;
                }
                socket
            }
        };
        socket.set_nonblocking(true)?;

        let socket = match bind_interface {
            Some(bi) => bind_to_device(socket, bi)?,
            None => socket,
        };

        // Metadata is best effort, the probe still works without it
        let ancillary = match ancillary::enable(&socket, peer.is_ipv6()) {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!("received TTL/ToS reporting unavailable: {}", err);
                false
            }
        };

        socket
            .connect(&SockAddr::from(peer))
            .map_err(|e| anyhow!("connect({}): {}", peer, e))?;
        debug!(%peer, ancillary, "udp socket connected");

        Ok(UDPSocket {
            socket,
            peer,
            ancillary,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether received datagrams carry TTL/ToS metadata.
    pub fn ancillary_supported(&self) -> bool {
        self.ancillary
    }

    pub fn send(&self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send(packet)
    }

    /// Receive one datagram together with whatever metadata the kernel
    /// attached to it.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, Ancillary)> {
        if self.ancillary {
            ancillary::recv(&self.socket, buf)
        } else {
            let n = io::Read::read(&mut &self.socket, buf)?;
            Ok((n, Ancillary::default()))
        }
    }

    pub fn get_ref(&self) -> &Socket {
        &self.socket
    }
}

impl AsRawFd for UDPSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

pub fn bind_to_device(
    socket: Socket,
    bind_interface: &str,
) -> Result<Socket, std::io::Error> {
    // Socket2 bind_device does not have nice error types, so we have to handle
    // the libc errors. In case, we get an error when binding, map it into a
    // more friendly std::io::Error
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        return if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            let error_msg = format!(
                "error binding to device (`{}`): {}",
                bind_interface, err
            );
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        } else {
            let error_msg = format!("unexpected error binding device: {}", err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        };
    }

    Ok(socket)
}

#[cfg(test)]
mod test {
    use std::net::UdpSocket;

    use super::*;

    #[test]
    fn resolve_literal_respects_family() {
        let v4 = resolve("127.0.0.1", 2123, Family::V4).unwrap();
        assert_eq!(v4, "127.0.0.1:2123".parse::<SocketAddr>().unwrap());
        assert!(resolve("127.0.0.1", 2123, Family::V6).is_err());
    }

    #[test]
    fn connected_socket_exchanges_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = server.local_addr().unwrap();
        let client = UDPSocket::connect(
            peer,
            None,
            IpOptions {
                ttl: Some(32),
                tos: Some(0x10),
            },
        )
        .unwrap();
        assert_eq!(client.peer_addr(), peer);

        client.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.send_to(b"pong", from).unwrap();
        client.get_ref().set_nonblocking(false).unwrap();
        let (n, meta) = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
        if client.ancillary_supported() {
            assert!(meta.ttl.is_some());
        }
    }
}
