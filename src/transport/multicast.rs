//! Réception multicast SSDP.
//!
//! Un socket lié sur `0.0.0.0:1900` qui rejoint le groupe
//! 239.255.255.250 sur chaque interface retenue. Les doublons de
//! loopback et les datagrammes malformés sont à la charge du codec ; ici
//! on livre les octets bruts.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::transport::TransportError;

/// Récepteur multicast du groupe SSDP.
pub struct MulticastReceiver {
    socket: UdpSocket,
    group: Ipv4Addr,
    port: u16,
    max_datagram_bytes: usize,
    running: AtomicBool,
}

impl MulticastReceiver {
    /// Lie le port SSDP et rejoint le groupe sur chaque interface.
    pub fn bind(
        group: Ipv4Addr,
        port: u16,
        interfaces: &[Ipv4Addr],
        max_datagram_bytes: usize,
    ) -> Result<Self, TransportError> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| {
            TransportError::Bind {
                addr: bind_addr.to_string(),
                source: e,
            }
        })?;
        socket2.set_reuse_address(true).map_err(TransportError::Io)?;
        socket2
            .bind(&bind_addr.into())
            .map_err(|e| TransportError::Bind {
                addr: bind_addr.to_string(),
                source: e,
            })?;

        let socket: UdpSocket = socket2.into();
        socket
            .set_read_timeout(Some(Duration::from_secs(1)))
            .map_err(TransportError::Io)?;
        socket.set_multicast_loop_v4(true).map_err(TransportError::Io)?;

        for iface in interfaces {
            match socket.join_multicast_v4(&group, iface) {
                Ok(()) => debug!("SSDP: joined {} on {}", group, iface),
                Err(e) => warn!("SSDP: failed to join {} on {}: {}", group, iface, e),
            }
        }

        info!("✅ multicast receiver bound on {}:{}", group, port);

        Ok(Self {
            socket,
            group,
            port,
            max_datagram_bytes,
            running: AtomicBool::new(false),
        })
    }

    /// Adresse du groupe écouté.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.group), self.port)
    }

    /// Boucle de réception bloquante, jusqu'à [`stop`](Self::stop).
    pub fn run(&self, mut on_datagram: impl FnMut(Vec<u8>, SocketAddr)) {
        self.running.store(true, Ordering::SeqCst);
        let mut buf = vec![0u8; self.max_datagram_bytes];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => on_datagram(buf[..n].to_vec(), from),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!("multicast receive error: {}", e);
                    }
                    break;
                }
            }
        }
        debug!("multicast receive loop terminated");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Émet un datagramme brut vers le groupe.
    pub fn send_to_group(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(payload, self.group_addr())
            .map(|_| ())
            .map_err(TransportError::Send)
    }
}
