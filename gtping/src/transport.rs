use std::{io, net::SocketAddr, os::unix::io::AsRawFd, time::Duration};

use anyhow::Result;
use common::{resolve, IpOptions, UDPSocket};
use polling::{Event, Events, Poller};
use tracing::info;

use crate::config::ProbeConfig;

/// One received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Datagram {
    pub len: usize,
    /// Received TTL or hop limit, when the transport can tell.
    pub ttl: Option<u8>,
    /// Received ToS or traffic class, when the transport can tell.
    pub tos: Option<u8>,
}

/// What the probe loop needs from the network.
pub trait Transport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;

    /// Block for at most `timeout`. `Ok(true)` when a datagram (or a pending
    /// socket error) is ready to be received.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Datagram>;

    fn peer(&self) -> SocketAddr;

    /// Whether [`Datagram::ttl`] and [`Datagram::tos`] can ever be filled in.
    fn ancillary_supported(&self) -> bool {
        false
    }
}

const SOCKET_KEY: usize = 7;

/// Connected UDP socket plus a poller for the bounded readiness wait.
pub struct UdpTransport {
    socket: UDPSocket,
    poller: Poller,
    events: Events,
}

impl UdpTransport {
    /// Resolve the target, create the socket, apply IP options and connect.
    pub fn connect(config: &ProbeConfig) -> Result<UdpTransport> {
        let peer = resolve(&config.target, config.port, config.family)?;
        info!(host = %config.target, targetip = %peer.ip(), "resolved");
        let socket = UDPSocket::connect(
            peer,
            config.iface.as_deref(),
            IpOptions {
                ttl: config.ttl,
                tos: config.tos,
            },
        )?;
        Self::new(socket)
    }

    pub fn new(socket: UDPSocket) -> Result<UdpTransport> {
        let poller = Poller::new()?;
        // Safety: the socket is deleted from the poller before it is closed,
        // see Drop
        unsafe {
            poller.add(socket.as_raw_fd(), Event::readable(SOCKET_KEY))?;
        }
        Ok(UdpTransport {
            socket,
            poller,
            events: Events::new(),
        })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send(datagram)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        self.events.clear();
        let n = self.poller.wait(&mut self.events, Some(timeout))?;
        if n == 0 {
            return Ok(false);
        }
        // Interest is oneshot, re-arm for the next wait
        self.poller
            .modify(self.socket.get_ref(), Event::readable(SOCKET_KEY))?;
        Ok(self.events.iter().any(|ev| ev.key == SOCKET_KEY))
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Datagram> {
        let (len, meta) = self.socket.recv(buf)?;
        Ok(Datagram {
            len,
            ttl: meta.ttl,
            tos: meta.tos,
        })
    }

    fn peer(&self) -> SocketAddr {
        self.socket.peer_addr()
    }

    fn ancillary_supported(&self) -> bool {
        self.socket.ancillary_supported()
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.poller.delete(self.socket.get_ref());
    }
}
