//! Moteur de découverte SSDP.
//!
//! Côté local : annonces `ssdp:alive` par triplet d'annonce UPnP,
//! ré-annonce périodique, `ssdp:byebye` au retrait, et réponses unicast
//! aux `M-SEARCH` après un délai aléatoire dans `[0, MX]`.
//!
//! Côté distant : sur `alive` ou réponse de recherche, rafraîchit le
//! bail si le device est connu, sinon récupère descripteur + SCPD dans
//! un pool de workers borné — une garde « découverte en cours » par UDN
//! évite les doubles lectures. Sur `byebye`, retrait immédiat.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::UpnpConfig;
use crate::descriptor::{read_device_descriptor, read_scpd, DescriptorError};
use crate::model::{Device, DeviceType, ServiceType, Udn};
use crate::registry::{Registry, RemoteDeviceIdentity, RemovalReason};
use crate::router::{IncomingDatagram, Router};
use crate::ssdp::{
    Alive, ByeBye, Search, SearchResponse, SsdpMessage, BYEBYE_REPEAT, ST_ALL, ST_ROOT_DEVICE,
};
use crate::transport::{StreamClient, StreamMethod, StreamRequestMessage};

/// Erreurs de la découverte distante.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),

    #[error("descriptor fetch answered HTTP {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Lecture des descripteurs d'un device distant.
///
/// Seam de test : la production passe par HTTP, les tests injectent un
/// loader synthétique.
pub trait DescriptorLoader: Send + Sync {
    fn load(&self, location: &Url) -> Result<Arc<Device>, DiscoveryError>;
}

/// Loader HTTP : descripteur de device, puis le SCPD de chaque service.
pub struct HttpDescriptorLoader {
    client: Arc<dyn StreamClient>,
}

impl HttpDescriptorLoader {
    pub fn new(client: Arc<dyn StreamClient>) -> Self {
        Self { client }
    }

    fn get(&self, url: &Url) -> Result<Vec<u8>, DiscoveryError> {
        let request = StreamRequestMessage::new(StreamMethod::Get, url.as_str());
        let response = self.client.request(&request)?;
        if !response.is_success() {
            return Err(DiscoveryError::HttpStatus(response.status));
        }
        Ok(response.body)
    }
}

impl DescriptorLoader for HttpDescriptorLoader {
    fn load(&self, location: &Url) -> Result<Arc<Device>, DiscoveryError> {
        let body = self.get(location)?;
        let shell = read_device_descriptor(&body)?;

        // Chaque coquille de service est complétée par son SCPD, résolu
        // relativement à LOCATION. Un SCPD illisible laisse la coquille
        // vide plutôt que de rejeter tout le device.
        let device = shell.map_services(&|_owner, svc| {
            let path = &svc.paths().scpd;
            if path.is_empty() {
                return svc.clone();
            }
            let scpd_url = match location.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(service = %svc.service_id(), error = %e, "unresolvable SCPD url");
                    return svc.clone();
                }
            };
            match self.get(&scpd_url).and_then(|bytes| Ok(read_scpd(&bytes)?)) {
                Ok(scpd) => svc
                    .clone()
                    .with_scpd(scpd.actions, scpd.state_variables),
                Err(e) => {
                    warn!(service = %svc.service_id(), error = %e, "SCPD fetch failed");
                    svc.clone()
                }
            }
        });
        Ok(Arc::new(device))
    }
}

struct FetchTask {
    udn: Udn,
    location: Url,
    max_age: u32,
    received_on: Option<std::net::Ipv4Addr>,
}

/// Moteur de découverte.
pub struct DiscoveryEngine {
    config: Arc<UpnpConfig>,
    router: Arc<Router>,
    registry: Arc<Registry>,
    fetch_tx: Mutex<Option<Sender<FetchTask>>>,
    in_progress: Arc<Mutex<HashSet<Udn>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryEngine {
    /// Démarre le pool de récupération des descripteurs (3 workers,
    /// file bornée : une rafale d'annonces ne s'empile pas sans fin).
    pub fn new(
        config: Arc<UpnpConfig>,
        router: Arc<Router>,
        registry: Arc<Registry>,
        loader: Arc<dyn DescriptorLoader>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = bounded::<FetchTask>(16);
        let in_progress: Arc<Mutex<HashSet<Udn>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::new();
        for worker_id in 0..3 {
            let fetch_rx = fetch_rx.clone();
            let loader = loader.clone();
            let registry = registry.clone();
            let in_progress = in_progress.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ssdp-fetch-{worker_id}"))
                .spawn(move || {
                    while let Ok(task) = fetch_rx.recv() {
                        match loader.load(&task.location) {
                            Ok(device) => {
                                let identity = RemoteDeviceIdentity {
                                    udn: device.udn().clone(),
                                    max_age_secs: task.max_age,
                                    descriptor_url: task.location.clone(),
                                    discovered_on: task.received_on.map(std::net::IpAddr::V4),
                                };
                                registry.update_remote(device, identity);
                            }
                            Err(e) => {
                                // Descripteur illisible : le device n'est
                                // pas admis au registre.
                                warn!(udn = %task.udn, location = %task.location, error = %e,
                                      "device descriptor rejected");
                            }
                        }
                        in_progress.lock().unwrap().remove(&task.udn);
                    }
                })
                .expect("spawning a fetch worker cannot fail");
            workers.push(handle);
        }

        Self {
            config,
            router,
            registry,
            fetch_tx: Mutex::new(Some(fetch_tx)),
            in_progress,
            workers: Mutex::new(workers),
        }
    }

    /// Arrête le pool de récupération.
    pub fn shutdown(&self) {
        drop(self.fetch_tx.lock().unwrap().take());
        for handle in std::mem::take(&mut *self.workers.lock().unwrap()) {
            let _ = handle.join();
        }
    }

    // ---- Côté local ------------------------------------------------------

    /// Annonce `ssdp:alive` d'un device local, par interface active.
    pub fn advertise_alive(&self, device: &Device) {
        let server = self.config.server_header();
        for interface in self.router.active_interfaces() {
            let Some(base) = self.router.base_url(interface) else {
                debug!("no stream port yet, skipping alive on {}", interface);
                continue;
            };
            let location = match base.join(&self.config.device_descriptor_path(device.udn())) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            };
            for (nt, usn) in advertisement_targets(device) {
                let message = SsdpMessage::Alive(Alive {
                    nt,
                    usn,
                    location: location.clone(),
                    server: server.clone(),
                    max_age: self.config.max_age_secs,
                    boot_id: Some(1),
                    config_id: Some(1),
                });
                self.router.send_datagram(
                    &message.to_bytes(),
                    self.multicast_group(),
                    Some(interface),
                );
            }
        }
        info!("📢 alive notifications sent for {}", device.udn());
    }

    /// Annonce `ssdp:byebye` (répétée) d'un device local.
    pub fn advertise_byebye(&self, device: &Device) {
        let messages: Vec<Vec<u8>> = advertisement_targets(device)
            .into_iter()
            .map(|(nt, usn)| SsdpMessage::ByeBye(ByeBye { nt, usn }).to_bytes())
            .collect();
        for _ in 0..BYEBYE_REPEAT {
            for payload in &messages {
                self.router.broadcast(payload);
            }
        }
        info!("👋 byebye notifications sent for {}", device.udn());
    }

    /// Émet un `M-SEARCH` multicast.
    pub fn search(&self, st: &str, mx: u32) {
        let message = SsdpMessage::Search(Search {
            st: st.to_string(),
            mx,
        });
        self.router.broadcast(&message.to_bytes());
        debug!("📤 M-SEARCH sent (ST={}, MX={})", st, mx);
    }

    /// Recherche de rafraîchissement périodique (`ssdp:all`).
    pub fn refresh_search(&self) {
        self.search(ST_ALL, self.config.search_mx);
    }

    /// Répond aux `M-SEARCH` dont le ST vise un device local.
    ///
    /// Chaque réponse part en unicast après un délai aléatoire dans
    /// `[0, MX]` secondes pour étaler la charge.
    pub fn handle_search(&self, datagram: &IncomingDatagram) {
        let SsdpMessage::Search(search) = &datagram.message else {
            return;
        };
        let interface = datagram.received_on.or_else(|| {
            self.router.active_interfaces().first().copied()
        });
        let Some(interface) = interface else {
            return;
        };
        let Some(base) = self.router.base_url(interface) else {
            return;
        };

        let server = self.config.server_header();
        for local in self.registry.local_devices() {
            let device = local.device();
            let matches = search_matches(device, &search.st);
            if matches.is_empty() {
                continue;
            }
            let location = match base.join(&self.config.device_descriptor_path(device.udn())) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            };
            for (st, usn) in matches {
                let payload = SsdpMessage::SearchResponse(SearchResponse {
                    st,
                    usn,
                    location: location.clone(),
                    server: server.clone(),
                    max_age: self.config.max_age_secs,
                })
                .to_bytes();

                let delay =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=search.mx as u64 * 1000));
                let router = self.router.clone();
                let to = datagram.from;
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    router.send_datagram(&payload, to, Some(interface));
                });
            }
        }
    }

    // ---- Côté distant ----------------------------------------------------

    /// Traite un `ssdp:alive` ou une réponse de recherche.
    pub fn handle_presence(&self, datagram: &IncomingDatagram) {
        let (usn, location, max_age) = match &datagram.message {
            SsdpMessage::Alive(alive) => (&alive.usn, &alive.location, alive.max_age),
            SsdpMessage::SearchResponse(resp) => (&resp.usn, &resp.location, resp.max_age),
            _ => return,
        };
        let Some(udn) = Udn::from_usn(usn) else {
            debug!("presence without UDN in USN '{}', ignored", usn);
            return;
        };
        // Nos propres annonces reviennent en boucle multicast.
        if self.registry.local_device(&udn).is_some() {
            return;
        }
        let Ok(location) = Url::parse(location) else {
            debug!("presence with invalid LOCATION '{}', ignored", location);
            return;
        };

        // Device connu, même descripteur : on prolonge le bail, rien à relire.
        if self.registry.refresh_remote(&udn, max_age, &location) {
            return;
        }

        // Garde « découverte en cours » : une annonce suivante pour le
        // même UDN ne déclenche pas de seconde lecture.
        {
            let mut in_progress = self.in_progress.lock().unwrap();
            if !in_progress.insert(udn.clone()) {
                return;
            }
        }

        let task = FetchTask {
            udn: udn.clone(),
            location,
            max_age,
            received_on: datagram.received_on,
        };
        let sent = self
            .fetch_tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.try_send(task).is_ok())
            .unwrap_or(false);
        if !sent {
            // File pleine ou moteur arrêté : la prochaine annonce retentera.
            self.in_progress.lock().unwrap().remove(&udn);
        }
    }

    /// Traite un `ssdp:byebye` : retrait immédiat.
    pub fn handle_byebye(&self, datagram: &IncomingDatagram) {
        let SsdpMessage::ByeBye(byebye) = &datagram.message else {
            return;
        };
        if let Some(udn) = Udn::from_usn(&byebye.usn) {
            self.registry.remove_remote(&udn, RemovalReason::ByeBye);
        }
    }

    fn multicast_group(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(
            std::net::IpAddr::V4(self.config.multicast_address),
            self.config.multicast_port,
        )
    }
}

/// Triplets d'annonce d'un arbre de devices.
///
/// Racine : `upnp:rootdevice`, `uuid:<UDN>`, type de device ; chaque
/// device embarqué : `uuid:<UDN>`, type ; chaque service : son type.
pub fn advertisement_targets(root: &Device) -> Vec<(String, String)> {
    let mut targets = Vec::new();
    for (index, device) in root.iter_devices().into_iter().enumerate() {
        let udn = device.udn();
        if index == 0 {
            targets.push((
                ST_ROOT_DEVICE.to_string(),
                format!("{udn}::{ST_ROOT_DEVICE}"),
            ));
        }
        targets.push((udn.to_string(), udn.to_string()));
        let device_type = device.device_type().to_string();
        targets.push((device_type.clone(), format!("{udn}::{device_type}")));

        let mut seen = HashSet::new();
        for service in device.services() {
            let st = service.service_type().to_string();
            if seen.insert(st.clone()) {
                targets.push((st.clone(), format!("{udn}::{st}")));
            }
        }
    }
    targets
}

/// Cibles de réponse d'un device local à un `M-SEARCH`.
pub fn search_matches(root: &Device, st: &str) -> Vec<(String, String)> {
    let st = st.trim();
    if st == ST_ALL {
        return advertisement_targets(root);
    }
    if st == ST_ROOT_DEVICE {
        return vec![(st.to_string(), format!("{}::{ST_ROOT_DEVICE}", root.udn()))];
    }
    if st.starts_with("uuid:") {
        return root
            .iter_devices()
            .into_iter()
            .filter(|d| d.udn().as_str() == st)
            .map(|d| (st.to_string(), d.udn().to_string()))
            .collect();
    }
    if let Ok(wanted) = st.parse::<DeviceType>() {
        return root
            .iter_devices()
            .into_iter()
            .filter(|d| d.device_type().implements(&wanted))
            .map(|d| (st.to_string(), format!("{}::{st}", d.udn())))
            .collect();
    }
    if let Ok(wanted) = st.parse::<ServiceType>() {
        let mut out = Vec::new();
        for device in root.iter_devices() {
            if device
                .services()
                .iter()
                .any(|s| s.service_type().implements(&wanted))
            {
                out.push((st.to_string(), format!("{}::{st}", device.udn())));
            }
        }
        return out;
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceType, Service, ServiceId, ServicePaths};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn renderer(udn: &str) -> Device {
        Device::builder(
            udn.parse().unwrap(),
            DeviceType::standard("MediaRenderer", 1),
            "Salon",
        )
        .service(Service::shell(
            ServiceType::standard("AVTransport", 1),
            ServiceId::standard("AVTransport"),
            ServicePaths::default(),
        ))
        .unwrap()
        .build()
    }

    #[test]
    fn test_advertisement_targets() {
        let device = renderer("uuid:111");
        let targets = advertisement_targets(&device);
        assert_eq!(
            targets,
            vec![
                (
                    "upnp:rootdevice".to_string(),
                    "uuid:111::upnp:rootdevice".to_string()
                ),
                ("uuid:111".to_string(), "uuid:111".to_string()),
                (
                    "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
                    "uuid:111::urn:schemas-upnp-org:device:MediaRenderer:1".to_string()
                ),
                (
                    "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
                    "uuid:111::urn:schemas-upnp-org:service:AVTransport:1".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_search_matches_root_device() {
        let device = renderer("uuid:111");
        let matches = search_matches(&device, "upnp:rootdevice");
        assert_eq!(
            matches,
            vec![(
                "upnp:rootdevice".to_string(),
                "uuid:111::upnp:rootdevice".to_string()
            )]
        );
    }

    #[test]
    fn test_search_matches_by_uuid_type_and_service() {
        let device = renderer("uuid:111");

        assert_eq!(
            search_matches(&device, "uuid:111"),
            vec![("uuid:111".to_string(), "uuid:111".to_string())]
        );
        assert_eq!(
            search_matches(&device, "urn:schemas-upnp-org:device:MediaRenderer:1").len(),
            1
        );
        assert_eq!(
            search_matches(&device, "urn:schemas-upnp-org:service:AVTransport:1").len(),
            1
        );
        assert!(search_matches(&device, "uuid:other").is_empty());
        assert!(search_matches(&device, "urn:schemas-upnp-org:device:MediaServer:1").is_empty());
    }

    struct FakeLoader {
        calls: AtomicU32,
        udn: String,
    }

    impl DescriptorLoader for FakeLoader {
        fn load(&self, _location: &Url) -> Result<Arc<Device>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Lecture « réseau » : laisse le temps à une seconde annonce
            // d'arriver pendant la récupération.
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(renderer(&self.udn)))
        }
    }

    struct NoopClient;
    impl StreamClient for NoopClient {
        fn request(
            &self,
            _request: &StreamRequestMessage,
        ) -> Result<crate::transport::StreamResponseMessage, crate::transport::TransportError>
        {
            Ok(crate::transport::StreamResponseMessage::new(404))
        }
    }

    fn engine(loader: Arc<dyn DescriptorLoader>) -> (DiscoveryEngine, Arc<Registry>) {
        let config = Arc::new(UpnpConfig::default());
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(config.clone(), Arc::new(NoopClient)));
        (
            DiscoveryEngine::new(config, router, registry.clone(), loader),
            registry,
        )
    }

    fn alive(udn: &str, location: &str, max_age: u32) -> IncomingDatagram {
        IncomingDatagram {
            message: SsdpMessage::Alive(Alive {
                nt: "upnp:rootdevice".to_string(),
                usn: format!("{udn}::upnp:rootdevice"),
                location: location.to_string(),
                server: String::new(),
                max_age,
                boot_id: None,
                config_id: None,
            }),
            from: "10.0.0.9:1900".parse().unwrap(),
            received_on: None,
        }
    }

    fn wait_until(deadline_ms: u64, mut probe: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if probe() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_two_alives_trigger_one_fetch_and_advance_expiry() {
        let loader = Arc::new(FakeLoader {
            calls: AtomicU32::new(0),
            udn: "uuid:remote-1".to_string(),
        });
        let (engine, registry) = engine(loader.clone());
        let udn: Udn = "uuid:remote-1".parse().unwrap();

        // Deux annonces identiques coup sur coup : la seconde tombe sur
        // la garde « découverte en cours ».
        engine.handle_presence(&alive("uuid:remote-1", "http://10.0.0.9:8080/desc.xml", 1800));
        engine.handle_presence(&alive("uuid:remote-1", "http://10.0.0.9:8080/desc.xml", 1800));

        assert!(wait_until(2000, || registry.remote_device(&udn).is_some()));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

        // Annonce suivante, même LOCATION : rafraîchit le bail sans relire.
        let before = registry.remote_expires_at(&udn).unwrap();
        engine.handle_presence(&alive("uuid:remote-1", "http://10.0.0.9:8080/desc.xml", 1800));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert!(registry.remote_expires_at(&udn).unwrap() >= before);

        engine.shutdown();
    }

    #[test]
    fn test_location_change_triggers_refetch() {
        let loader = Arc::new(FakeLoader {
            calls: AtomicU32::new(0),
            udn: "uuid:remote-2".to_string(),
        });
        let (engine, registry) = engine(loader.clone());
        let udn: Udn = "uuid:remote-2".parse().unwrap();

        engine.handle_presence(&alive("uuid:remote-2", "http://10.0.0.9:8080/desc.xml", 1800));
        assert!(wait_until(2000, || registry.remote_device(&udn).is_some()));

        engine.handle_presence(&alive("uuid:remote-2", "http://10.0.0.7:8080/desc.xml", 1800));
        assert!(wait_until(2000, || loader.calls.load(Ordering::SeqCst) == 2));

        engine.shutdown();
    }

    #[test]
    fn test_byebye_removes_immediately() {
        let loader = Arc::new(FakeLoader {
            calls: AtomicU32::new(0),
            udn: "uuid:remote-3".to_string(),
        });
        let (engine, registry) = engine(loader);
        let udn: Udn = "uuid:remote-3".parse().unwrap();

        engine.handle_presence(&alive("uuid:remote-3", "http://10.0.0.9:8080/desc.xml", 1800));
        assert!(wait_until(2000, || registry.remote_device(&udn).is_some()));

        engine.handle_byebye(&IncomingDatagram {
            message: SsdpMessage::ByeBye(ByeBye {
                nt: "upnp:rootdevice".to_string(),
                usn: "uuid:remote-3::upnp:rootdevice".to_string(),
            }),
            from: "10.0.0.9:1900".parse().unwrap(),
            received_on: None,
        });
        assert!(registry.remote_device(&udn).is_none());

        engine.shutdown();
    }
}
