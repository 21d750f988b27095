//! # Routeur de messages
//!
//! Multiplexe tout le trafic réseau de la pile : sockets datagramme par
//! interface, récepteur multicast SSDP, client de flux HTTP. Le trafic
//! entrant est remis au dispatch (les moteurs de protocole), le trafic
//! sortant choisit son socket d'émission.
//!
//! `enable`/`disable` sont idempotents et peuvent être appelés en
//! alternance ; le routeur applique aussi une limite de débit sur les
//! réponses M-SEARCH entrantes pour absorber les inondations.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UpnpConfig;
use crate::ssdp::SsdpMessage;
use crate::transport::{
    DatagramIo, MulticastReceiver, StreamClient, StreamRequestMessage, StreamResponseMessage,
    TransportError,
};

/// Erreurs du routeur.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no usable network interface")]
    NoNetwork,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Datagramme SSDP décodé, avec son origine.
#[derive(Debug, Clone)]
pub struct IncomingDatagram {
    pub message: SsdpMessage,
    pub from: SocketAddr,
    /// Interface locale de réception, si connue.
    pub received_on: Option<Ipv4Addr>,
}

/// Destinataire du trafic entrant (les moteurs de protocole).
pub trait InboundDispatch: Send + Sync {
    fn received_datagram(&self, datagram: IncomingDatagram);
    fn received_stream(&self, request: StreamRequestMessage) -> StreamResponseMessage;
}

/// Limite de débit des réponses M-SEARCH entrantes.
struct SearchResponseGate {
    max_per_second: u32,
    window: Mutex<VecDeque<Instant>>,
}

impl SearchResponseGate {
    fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window: Mutex::new(VecDeque::new()),
        }
    }

    fn allow(&self) -> bool {
        if self.max_per_second == 0 {
            return true;
        }
        let now = Instant::now();
        let mut window = self.window.lock().unwrap();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(1) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_per_second as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}

/// Routeur : interfaces actives, transports, dispatch.
pub struct Router {
    config: Arc<UpnpConfig>,
    stream_client: Arc<dyn StreamClient>,
    dispatch: RwLock<Option<Arc<dyn InboundDispatch>>>,
    interfaces: RwLock<HashMap<Ipv4Addr, Arc<DatagramIo>>>,
    multicast: RwLock<Option<Arc<MulticastReceiver>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    enabled: AtomicBool,
    gate: SearchResponseGate,
    /// Port du serveur de flux HTTP, connu après son démarrage.
    stream_port: RwLock<Option<u16>>,
}

impl Router {
    pub fn new(config: Arc<UpnpConfig>, stream_client: Arc<dyn StreamClient>) -> Self {
        let gate = SearchResponseGate::new(config.search_response_per_second);
        Self {
            config,
            stream_client,
            dispatch: RwLock::new(None),
            interfaces: RwLock::new(HashMap::new()),
            multicast: RwLock::new(None),
            threads: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(false),
            gate,
            stream_port: RwLock::new(None),
        }
    }

    pub fn set_dispatch(&self, dispatch: Arc<dyn InboundDispatch>) {
        *self.dispatch.write().unwrap() = Some(dispatch);
    }

    pub fn set_stream_port(&self, port: u16) {
        *self.stream_port.write().unwrap() = Some(port);
    }

    pub fn stream_port(&self) -> Option<u16> {
        *self.stream_port.read().unwrap()
    }

    /// Interfaces IPv4 retenues par la configuration.
    pub fn select_interfaces(config: &UpnpConfig) -> Vec<Ipv4Addr> {
        let Ok(interfaces) = get_if_addrs::get_if_addrs() else {
            return Vec::new();
        };
        interfaces
            .into_iter()
            .filter_map(|iface| match iface.ip() {
                IpAddr::V4(ip) if !ip.is_loopback() => {
                    let name = iface.name.clone();
                    let included = config.interface_include.is_empty()
                        || config
                            .interface_include
                            .iter()
                            .any(|sel| *sel == name || *sel == ip.to_string());
                    let excluded = config
                        .interface_exclude
                        .iter()
                        .any(|sel| *sel == name || *sel == ip.to_string());
                    (included && !excluded).then_some(ip)
                }
                _ => None,
            })
            .collect()
    }

    /// Adresses des interfaces actuellement liées.
    pub fn active_interfaces(&self) -> Vec<Ipv4Addr> {
        self.interfaces.read().unwrap().keys().copied().collect()
    }

    /// Monte les sockets. Idempotent : un second appel est sans effet.
    ///
    /// En cas d'échec partiel (bind impossible), tout ce qui a été monté
    /// est redémonté avant de retourner l'erreur.
    pub fn enable(self: &Arc<Self>) -> Result<(), RouterError> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.bring_up() {
            Ok(count) => {
                info!("✅ router enabled on {} interface(s)", count);
                Ok(())
            }
            Err(e) => {
                self.tear_down();
                self.enabled.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn bring_up(self: &Arc<Self>) -> Result<usize, RouterError> {
        let selected = Self::select_interfaces(&self.config);
        if selected.is_empty() {
            return Err(RouterError::NoNetwork);
        }

        for addr in &selected {
            // Port éphémère : les réponses unicast reviennent ici.
            let io = Arc::new(DatagramIo::bind(
                IpAddr::V4(*addr),
                0,
                self.config.ttl,
                self.config.max_datagram_bytes,
            )?);
            self.interfaces.write().unwrap().insert(*addr, io.clone());

            let router = self.clone();
            let bound = *addr;
            let handle = std::thread::Builder::new()
                .name(format!("ssdp-io-{bound}"))
                .spawn(move || {
                    io.run(|payload, from| router.received_raw(&payload, from, Some(bound)));
                })
                .expect("spawning a datagram thread cannot fail");
            self.threads.lock().unwrap().push(handle);
        }

        let receiver = Arc::new(MulticastReceiver::bind(
            self.config.multicast_address,
            self.config.multicast_port,
            &selected,
            self.config.max_datagram_bytes,
        )?);
        *self.multicast.write().unwrap() = Some(receiver.clone());

        let router = self.clone();
        let handle = std::thread::Builder::new()
            .name("ssdp-multicast".to_string())
            .spawn(move || {
                receiver.run(|payload, from| router.received_raw(&payload, from, None));
            })
            .expect("spawning the multicast thread cannot fail");
        self.threads.lock().unwrap().push(handle);

        Ok(selected.len())
    }

    fn tear_down(&self) {
        if let Some(receiver) = self.multicast.write().unwrap().take() {
            receiver.stop();
        }
        for io in self.interfaces.write().unwrap().drain().map(|(_, io)| io) {
            io.stop();
        }
        let threads: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock().unwrap());
        for handle in threads {
            let _ = handle.join();
        }
    }

    /// Démonte les sockets et rejoint les threads. Idempotent.
    pub fn disable(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        self.tear_down();
        info!("router disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Entrée du trafic datagramme brut.
    ///
    /// Un datagramme indécodable est ignoré et journalisé ; les réponses
    /// M-SEARCH passent par la limite de débit.
    pub fn received_raw(&self, payload: &[u8], from: SocketAddr, on: Option<Ipv4Addr>) {
        let Some(message) = SsdpMessage::parse(payload) else {
            debug!("undecodable datagram from {} ({} bytes), skipped", from, payload.len());
            return;
        };
        self.received(IncomingDatagram {
            message,
            from,
            received_on: on,
        });
    }

    /// Entrée du trafic datagramme décodé.
    pub fn received(&self, datagram: IncomingDatagram) {
        if matches!(datagram.message, SsdpMessage::SearchResponse(_)) && !self.gate.allow() {
            debug!("search response from {} rate-limited", datagram.from);
            return;
        }
        let dispatch = self.dispatch.read().unwrap().clone();
        match dispatch {
            Some(dispatch) => dispatch.received_datagram(datagram),
            None => debug!("datagram received before dispatch is wired, dropped"),
        }
    }

    /// Entrée du trafic de flux HTTP (depuis l'adaptateur serveur).
    pub fn received_stream(&self, request: StreamRequestMessage) -> StreamResponseMessage {
        let dispatch = self.dispatch.read().unwrap().clone();
        match dispatch {
            Some(dispatch) => dispatch.received_stream(request),
            None => StreamResponseMessage::new(503),
        }
    }

    /// Émet un datagramme unicast, de préférence depuis l'interface donnée.
    pub fn send_datagram(&self, payload: &[u8], to: SocketAddr, via: Option<Ipv4Addr>) {
        let interfaces = self.interfaces.read().unwrap();
        let io = via
            .and_then(|addr| interfaces.get(&addr))
            .or_else(|| interfaces.values().next());
        match io {
            // L'échec d'envoi est déjà journalisé par le transport.
            Some(io) => {
                let _ = io.send_to(payload, to);
            }
            None => warn!("no bound interface to send datagram to {}", to),
        }
    }

    /// Diffuse un datagramme sur le groupe multicast, via chaque interface.
    pub fn broadcast(&self, payload: &[u8]) {
        let group = SocketAddr::new(
            IpAddr::V4(self.config.multicast_address),
            self.config.multicast_port,
        );
        let interfaces = self.interfaces.read().unwrap();
        if interfaces.is_empty() {
            warn!("broadcast requested with no bound interface");
            return;
        }
        for io in interfaces.values() {
            let _ = io.send_to(payload, group);
        }
    }

    /// Requête de flux sortante (descripteurs, SOAP, GENA).
    pub fn stream_request(
        &self,
        request: &StreamRequestMessage,
    ) -> Result<StreamResponseMessage, TransportError> {
        self.stream_client.request(request)
    }

    /// Base `http://ip:port` des URLs locales sur une interface.
    pub fn base_url(&self, interface: Ipv4Addr) -> Option<url::Url> {
        let port = self.stream_port()?;
        url::Url::parse(&format!("http://{interface}:{port}")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::SearchResponse;
    use std::sync::atomic::AtomicU32;

    struct CountingDispatch {
        datagrams: AtomicU32,
    }

    impl InboundDispatch for CountingDispatch {
        fn received_datagram(&self, _datagram: IncomingDatagram) {
            self.datagrams.fetch_add(1, Ordering::SeqCst);
        }
        fn received_stream(&self, _request: StreamRequestMessage) -> StreamResponseMessage {
            StreamResponseMessage::new(200)
        }
    }

    struct NoopClient;
    impl StreamClient for NoopClient {
        fn request(
            &self,
            _request: &StreamRequestMessage,
        ) -> Result<StreamResponseMessage, TransportError> {
            Ok(StreamResponseMessage::new(200))
        }
    }

    fn router(config: UpnpConfig) -> (Arc<Router>, Arc<CountingDispatch>) {
        let router = Arc::new(Router::new(Arc::new(config), Arc::new(NoopClient)));
        let dispatch = Arc::new(CountingDispatch {
            datagrams: AtomicU32::new(0),
        });
        router.set_dispatch(dispatch.clone());
        (router, dispatch)
    }

    fn search_response() -> IncomingDatagram {
        IncomingDatagram {
            message: SsdpMessage::SearchResponse(SearchResponse {
                st: "upnp:rootdevice".to_string(),
                usn: "uuid:x::upnp:rootdevice".to_string(),
                location: "http://10.0.0.9/desc.xml".to_string(),
                server: String::new(),
                max_age: 1800,
            }),
            from: "10.0.0.9:1900".parse().unwrap(),
            received_on: None,
        }
    }

    #[test]
    fn test_search_response_rate_limit() {
        let (router, dispatch) = router(UpnpConfig {
            search_response_per_second: 3,
            ..Default::default()
        });
        for _ in 0..10 {
            router.received(search_response());
        }
        assert_eq!(dispatch.datagrams.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_undecodable_datagram_is_skipped() {
        let (router, dispatch) = router(UpnpConfig::default());
        router.received_raw(b"\x00\x01garbage", "10.0.0.9:5000".parse().unwrap(), None);
        assert_eq!(dispatch.datagrams.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disable_without_enable_is_noop() {
        let (router, _) = router(UpnpConfig::default());
        router.disable();
        router.disable();
        assert!(!router.is_enabled());
    }

    #[test]
    fn test_stream_dispatch_requires_wiring() {
        let config = Arc::new(UpnpConfig::default());
        let bare = Router::new(config, Arc::new(NoopClient));
        let response =
            bare.received_stream(StreamRequestMessage::new(crate::transport::StreamMethod::Get, "/"));
        assert_eq!(response.status, 503);
    }
}
