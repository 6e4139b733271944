// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Datagram transports carrying XRCE messages between a client and its agent.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::DEFAULT_MTU;
use crate::error::{Result, XrceError};

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Point-to-point datagram transport used by a [`ClientSession`](crate::ClientSession).
///
/// Every `send` carries exactly one XRCE message. `recv` waits at most
/// `timeout_ms` milliseconds (zero polls) and returns `Ok(None)` on timeout.
pub trait XrceTransport: Send {
    fn send(&mut self, data: &[u8]) -> Result<()>;

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<Option<usize>>;

    /// Largest message this transport carries.
    fn mtu(&self) -> usize;
}

// ---------------------------------------------------------------------------
// UDP transport
// ---------------------------------------------------------------------------

/// UDP transport connected to a single agent.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    mtu: usize,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `agent`.
    pub fn connect(agent: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if agent.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind_connect(local, agent)
    }

    /// Bind `local` and connect it to `agent`.
    pub fn bind_connect(local: SocketAddr, agent: SocketAddr) -> Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(local),
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&local.into())?;
        socket.connect(&agent.into())?;
        log::debug!("[UdpTransport] {} -> {}", local, agent);
        Ok(Self {
            socket: socket.into(),
            mtu: DEFAULT_MTU,
        })
    }

    /// Override the advertised MTU (default 512).
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl XrceTransport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let n = self.socket.send(data)?;
        if n != data.len() {
            return Err(XrceError::Io(format!("short send: {} of {} bytes", n, data.len())));
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<Option<usize>> {
        if timeout_ms == 0 {
            self.socket.set_nonblocking(true)?;
        } else {
            self.socket.set_nonblocking(false)?;
            self.socket
                .set_read_timeout(Some(Duration::from_millis(timeout_ms)))?;
        }
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

// ---------------------------------------------------------------------------
// Loopback transport
// ---------------------------------------------------------------------------

/// Decides whether an outgoing datagram is dropped (`true`) or delivered.
pub type LossFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// In-process transport: one end of a pair created by [`LoopbackTransport::pair`].
pub struct LoopbackTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    mtu: usize,
    loss: Option<LossFilter>,
    dropped: u64,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("mtu", &self.mtu)
            .field("lossy", &self.loss.is_some())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl LoopbackTransport {
    /// Two connected ends: what one sends the other receives.
    pub fn pair(mtu: usize) -> (Self, Self) {
        let (a_tx, b_rx) = channel::unbounded();
        let (b_tx, a_rx) = channel::unbounded();
        let end = |tx, rx| Self {
            tx,
            rx,
            mtu,
            loss: None,
            dropped: 0,
        };
        (end(a_tx, a_rx), end(b_tx, b_rx))
    }

    /// Drop outgoing datagrams for which `filter` returns `true`.
    pub fn with_loss<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.loss = Some(Box::new(filter));
        self
    }

    /// Datagrams discarded by the loss filter so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl XrceTransport for LoopbackTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.mtu {
            return Err(XrceError::Io(format!(
                "datagram of {} bytes exceeds MTU {}",
                data.len(),
                self.mtu
            )));
        }
        if let Some(loss) = self.loss.as_mut() {
            if loss(data) {
                self.dropped += 1;
                log::trace!("[LoopbackTransport] dropped {} bytes", data.len());
                return Ok(());
            }
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| XrceError::Io("loopback peer closed".into()))
    }

    fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<Option<usize>> {
        let datagram = if timeout_ms == 0 {
            match self.rx.try_recv() {
                Ok(d) => d,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(XrceError::Io("loopback peer closed".into()))
                }
            }
        } else {
            match self.rx.recv_timeout(Duration::from_millis(timeout_ms)) {
                Ok(d) => d,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(XrceError::Io("loopback peer closed".into()))
                }
            }
        };
        if datagram.len() > buf.len() {
            return Err(XrceError::BufferTooShort);
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(Some(datagram.len()))
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_pair_delivers_both_ways() {
        let (mut a, mut b) = LoopbackTransport::pair(64);
        a.send(&[1, 2, 3]).unwrap();
        b.send(&[9]).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(b.recv(&mut buf, 0).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(a.recv(&mut buf, 10).unwrap(), Some(1));
        assert_eq!(a.recv(&mut buf, 0).unwrap(), None);
    }

    #[test]
    fn test_loopback_loss_and_mtu() {
        let (a, mut b) = LoopbackTransport::pair(8);
        let mut a = a.with_loss(|d| d[0] == 0xFF);
        a.send(&[0xFF]).unwrap();
        a.send(&[0x01]).unwrap();
        assert_eq!(a.dropped(), 1);
        assert!(a.send(&[0; 9]).is_err());
        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf, 10).unwrap(), Some(1));
        assert_eq!(buf[0], 0x01);
        assert_eq!(b.recv(&mut buf, 1).unwrap(), None);
    }

    #[test]
    fn test_loopback_closed_peer_is_io_error() {
        let (mut a, b) = LoopbackTransport::pair(8);
        drop(b);
        assert!(matches!(a.send(&[1]), Err(XrceError::Io(_))));
        let mut buf = [0u8; 8];
        assert!(matches!(a.recv(&mut buf, 0), Err(XrceError::Io(_))));
    }

    #[test]
    fn test_udp_connected_pair() {
        let a_addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let server = UdpSocket::bind(a_addr).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = UdpTransport::connect(server_addr).unwrap();
        let client_addr = client.local_addr().unwrap();

        client.send(&[0x81, 0x80, 0, 0]).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(from.port(), client_addr.port());

        server.send_to(&[7, 7], from).unwrap();
        assert_eq!(client.recv(&mut buf, 500).unwrap(), Some(2));
        assert_eq!(client.recv(&mut buf, 0).unwrap(), None);
        assert_eq!(client.mtu(), DEFAULT_MTU);
    }
}
