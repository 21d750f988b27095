//! E/S datagramme par interface.
//!
//! Une instance par adresse liée. Le socket sert à la fois à l'envoi
//! unicast/multicast (TTL configuré) et à la réception unicast des
//! réponses M-SEARCH. Le port est éphémère : certaines piles refusent de
//! répondre en unicast vers le port 1900.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use crate::transport::TransportError;

/// Backlog de réception : absorbe les rafales de réponses M-SEARCH.
const RECV_BUFFER_BYTES: usize = 262_144;

/// Socket datagramme lié à une interface.
///
/// `send`, `stop` et l'initialisation s'excluent mutuellement via le
/// verrou interne ; la boucle de réception lit en parallèle des envois.
pub struct DatagramIo {
    socket: UdpSocket,
    local: SocketAddr,
    max_datagram_bytes: usize,
    running: AtomicBool,
    // Exclusion mutuelle send/stop.
    gate: Mutex<()>,
}

impl DatagramIo {
    /// Lie un socket multicast-capable sur `addr:port`.
    pub fn bind(
        addr: IpAddr,
        port: u16,
        ttl: u32,
        max_datagram_bytes: usize,
    ) -> Result<Self, TransportError> {
        let bind_addr = SocketAddr::new(addr, port);
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| {
            TransportError::Bind {
                addr: bind_addr.to_string(),
                source: e,
            }
        })?;
        socket2.set_reuse_address(true).map_err(TransportError::Io)?;
        socket2
            .set_recv_buffer_size(RECV_BUFFER_BYTES)
            .map_err(TransportError::Io)?;
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
        socket.set_multicast_ttl_v4(ttl).map_err(TransportError::Io)?;

        let local = socket.local_addr().map_err(TransportError::Io)?;
        debug!("✅ datagram socket bound on {}", local);

        Ok(Self {
            socket,
            local,
            max_datagram_bytes,
            running: AtomicBool::new(false),
            gate: Mutex::new(()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Boucle de réception bloquante.
    ///
    /// Retourne à l'appel de [`stop`](Self::stop). Un datagramme
    /// indécodable est ignoré par le consommateur ; ici seule l'erreur
    /// socket compte et la fermeture est un arrêt propre.
    pub fn run(&self, mut on_datagram: impl FnMut(Vec<u8>, SocketAddr)) {
        self.running.store(true, Ordering::SeqCst);
        debug!("entering datagram receive loop on {}", self.local);

        let mut buf = vec![0u8; self.max_datagram_bytes];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    trace!(bytes = n, %from, "datagram received on {}", self.local);
                    on_datagram(buf[..n].to_vec(), from);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!("datagram receive error on {}: {}", self.local, e);
                    }
                    break;
                }
            }
        }
        debug!("datagram receive loop on {} terminated", self.local);
    }

    /// Arrêt idempotent de la boucle de réception.
    pub fn stop(&self) {
        let _gate = self.gate.lock().unwrap();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Envoie un datagramme ; l'échec d'envoi est non fatal et journalisé.
    pub fn send_to(&self, payload: &[u8], to: SocketAddr) -> Result<(), TransportError> {
        let _gate = self.gate.lock().unwrap();
        match self.socket.send_to(payload, to) {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("datagram send to {} failed: {}", to, e);
                Err(TransportError::Send(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    #[test]
    fn test_send_and_receive_loopback() {
        let a = DatagramIo::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 2, 640).unwrap();
        let b = DatagramIo::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 2, 640).unwrap();

        let (tx, rx) = mpsc::channel();
        let b_addr = b.local_addr();
        let handle = std::thread::spawn(move || {
            b.run(|payload, from| {
                tx.send((payload, from)).ok();
                b.stop();
            });
        });

        a.send_to(b"hello", b_addr).unwrap();
        let (payload, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(payload, b"hello");
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let io = DatagramIo::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 2, 640).unwrap();
        io.stop();
        io.stop();
    }

    #[test]
    fn test_stop_terminates_run() {
        let io =
            std::sync::Arc::new(DatagramIo::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 2, 640).unwrap());
        let io2 = io.clone();
        let handle = std::thread::spawn(move || io2.run(|_, _| {}));
        std::thread::sleep(Duration::from_millis(50));
        io.stop();
        // La boucle sort au prochain timeout de lecture (≤ 1 s).
        handle.join().unwrap();
    }
}
