//! # hirondelle
//!
//! Pile UPnP Device Architecture 1.0/1.1 : un processus hôte peut
//! exposer des devices (services, actions, variables d'état) sur le
//! réseau et agir en control point — découverte SSDP, contrôle SOAP,
//! eventing GENA.
//!
//! ## Architecture
//!
//! - [`types`] / [`ranges`] : datatypes UPnP, plages et valeurs permises
//! - [`model`] / [`binder`] : graphe de métadonnées et binding local
//! - [`descriptor`] / [`soap`] / [`gena`] : codecs XML et moteurs d'eventing
//! - [`transport`] / [`router`] : sockets, messages, aiguillage
//! - [`protocol`] : moteurs de découverte et de contrôle
//! - [`registry`] / [`service`] : devices connus, gestionnaires locaux
//!
//! Pas d'état global : tout est composé dans un [`UpnpStack`] explicite,
//! avec des phases `startup`/`shutdown`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hirondelle::{UpnpConfig, UpnpStack};
//!
//! let stack = UpnpStack::new(UpnpConfig::default()).unwrap();
//! stack.startup().unwrap();
//! stack.search("ssdp:all", 3);
//! // ...
//! stack.shutdown();
//! ```

pub mod binder;
pub mod config;
pub mod descriptor;
pub mod gena;
pub mod httpd;
pub mod model;
pub mod protocol;
pub mod ranges;
pub mod registry;
pub mod router;
pub mod service;
pub mod soap;
pub mod ssdp;
pub mod transport;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Sender};
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

pub use crate::binder::{
    ArgumentSpec, LocalServiceBindingError, ServiceBuilder, StateVariableSpec,
};
pub use crate::config::{ConfigError, UpnpConfig};
pub use crate::gena::{PropertyChangeListener, Sid};
pub use crate::model::{Device, DeviceType, ServiceId, ServiceType, Udn};
pub use crate::protocol::{invoke_action, ActionInvocation};
pub use crate::registry::{Registry, RegistryListener, RemovalReason};
pub use crate::service::{ActionError, LocalDevice, ServiceHandler, ServiceManager};
pub use crate::types::{StateValue, StateVarType};

use crate::gena::{EventClient, EventServer};
use crate::httpd::HttpServer;
use crate::protocol::{DiscoveryEngine, HttpDescriptorLoader, ProtocolEngines};
use crate::registry::RegistryError;
use crate::router::{Router, RouterError};
use crate::transport::{StreamClient, TransportError, UreqStreamClient};

/// Erreurs de cycle de vie de la pile.
#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Binding(#[from] LocalServiceBindingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("stack is not started")]
    NotStarted,

    #[error("no remote device '{0}' in the registry")]
    UnknownDevice(Udn),

    #[error("no service '{0}' on this device")]
    UnknownService(ServiceId),

    #[error("unresolvable URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Gena(#[from] gena::GenaClientError),
}

/// La pile UPnP assemblée : registre, routeur, moteurs, maintenance.
pub struct UpnpStack {
    config: Arc<UpnpConfig>,
    registry: Arc<Registry>,
    router: Arc<Router>,
    engines: Arc<ProtocolEngines>,
    stream_client: Arc<dyn StreamClient>,
    http: Mutex<Option<HttpServer>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    maintenance_stop: Mutex<Option<Sender<()>>>,
    started: AtomicBool,
}

impl UpnpStack {
    /// Compose la pile ; la configuration est validée ici (erreur fatale
    /// avant tout bind).
    pub fn new(config: UpnpConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let stream_client: Arc<dyn StreamClient> = Arc::new(UreqStreamClient::new(&config));
        // Livraison des NOTIFY : timeouts courts dédiés.
        let notify_client: Arc<dyn StreamClient> = Arc::new(UreqStreamClient::with_timeouts(
            config.notify_timeout(),
            config.notify_timeout(),
            config.notify_timeout() * 2,
        ));

        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(config.clone(), stream_client.clone()));
        let loader = Arc::new(HttpDescriptorLoader::new(stream_client.clone()));
        let discovery = Arc::new(DiscoveryEngine::new(
            config.clone(),
            router.clone(),
            registry.clone(),
            loader,
        ));
        let event_server = Arc::new(EventServer::new(&config, notify_client));
        let event_client = Arc::new(EventClient::new(&config, stream_client.clone()));
        let engines = Arc::new(ProtocolEngines::new(
            config.clone(),
            registry.clone(),
            discovery,
            event_server,
            event_client,
        ));

        Ok(Arc::new(Self {
            config,
            registry,
            router,
            engines,
            stream_client,
            http: Mutex::new(None),
            maintenance: Mutex::new(None),
            maintenance_stop: Mutex::new(None),
            started: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &UpnpConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn event_client(&self) -> &Arc<EventClient> {
        &self.engines.event_client
    }

    pub fn event_server(&self) -> &Arc<EventServer> {
        &self.engines.event_server
    }

    /// Monte les sockets, démarre le serveur de flux et la maintenance.
    /// Idempotent.
    pub fn startup(self: &Arc<Self>) -> Result<(), StackError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.router.set_dispatch(self.engines.clone());
        if let Err(e) = self.router.enable() {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let http = match HttpServer::start(self.config.stream_listen_port, self.router.clone()) {
            Ok(http) => http,
            Err(e) => {
                self.router.disable();
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.router.set_stream_port(http.local_addr().port());
        *self.http.lock().unwrap() = Some(http);

        self.start_maintenance();

        // Les devices enregistrés avant le démarrage s'annoncent maintenant.
        for local in self.registry.local_devices() {
            self.engines.discovery.advertise_alive(local.device());
        }
        // Premier balayage du réseau.
        self.engines.discovery.refresh_search();

        info!("✅ UPnP stack started");
        Ok(())
    }

    /// Éteint proprement : byebye des devices locaux, purge du registre,
    /// arrêt des moteurs, des sockets et du serveur HTTP. Idempotent.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(stop) = self.maintenance_stop.lock().unwrap().take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.maintenance.lock().unwrap().take() {
            let _ = handle.join();
        }

        for local in self.registry.local_devices() {
            self.engines.discovery.advertise_byebye(local.device());
        }
        self.registry.remove_all_remote(RemovalReason::Shutdown);

        self.engines.discovery.shutdown();
        self.engines.event_server.shutdown();

        if let Some(http) = self.http.lock().unwrap().take() {
            http.stop();
        }
        self.router.disable();
        info!("UPnP stack stopped");
    }

    // ---- Côté device -----------------------------------------------------

    /// Enregistre un device local : binding des handlers, publication
    /// des chemins HTTP et, si la pile tourne, annonces `ssdp:alive`.
    pub fn add_local_device(
        &self,
        device: Device,
        handlers: Vec<(ServiceId, Box<dyn ServiceHandler>)>,
    ) -> Result<Arc<LocalDevice>, StackError> {
        let local = Arc::new(LocalDevice::new(device, handlers, &self.config)?);
        local.set_publisher(self.engines.event_server.clone());
        self.registry.add_local(local.clone())?;
        if self.started.load(Ordering::SeqCst) {
            self.engines.discovery.advertise_alive(local.device());
        }
        Ok(local)
    }

    /// Retire un device local, avec ses `ssdp:byebye`.
    pub fn remove_local_device(&self, udn: &Udn) {
        if let Some(local) = self.registry.remove_local(udn) {
            if self.started.load(Ordering::SeqCst) {
                self.engines.discovery.advertise_byebye(local.device());
            }
        }
    }

    // ---- Côté control point ----------------------------------------------

    /// Émet un `M-SEARCH` multicast.
    pub fn search(&self, st: &str, mx: u32) {
        self.engines.discovery.search(st, mx);
    }

    /// Invoque une action sur un service distant.
    pub fn invoke(&self, invocation: &mut ActionInvocation) -> anyhow::Result<()> {
        invoke_action(self.stream_client.as_ref(), invocation)
    }

    /// S'abonne aux événements d'un service d'un device distant connu.
    pub fn subscribe_remote(&self, udn: &Udn, service_id: &ServiceId) -> Result<Sid, StackError> {
        let identity = self
            .registry
            .remote_identity(udn)
            .ok_or_else(|| StackError::UnknownDevice(udn.clone()))?;
        let device = self
            .registry
            .remote_device(udn)
            .ok_or_else(|| StackError::UnknownDevice(udn.clone()))?;
        let service = device
            .find_service(service_id)
            .ok_or_else(|| StackError::UnknownService(service_id.clone()))?
            .clone();

        let interface = self
            .router
            .active_interfaces()
            .first()
            .copied()
            .ok_or(StackError::Router(RouterError::NoNetwork))?;
        let base = self.router.base_url(interface).ok_or(StackError::NotStarted)?;

        let event_url = identity
            .descriptor_url
            .join(&service.paths().event)
            .map_err(|e| StackError::InvalidUrl(e.to_string()))?;
        let callback_token = format!("uuid:{}", Uuid::new_v4());
        let callback_url: Url = base
            .join(&self.config.callback_path(udn, service_id, &callback_token))
            .map_err(|e| StackError::InvalidUrl(e.to_string()))?;

        self.engines
            .event_client
            .subscribe(udn.clone(), service_id.clone(), event_url, callback_url)
            .map_err(|e| {
                warn!(error = %e, "remote subscription failed");
                StackError::Gena(e)
            })
    }

    // ---- Maintenance -----------------------------------------------------

    /// Tâches périodiques : ré-annonce, balayages d'expiration,
    /// renouvellements, vidage de la modération, recherche de
    /// rafraîchissement.
    fn start_maintenance(self: &Arc<Self>) {
        let (stop_tx, stop_rx) = unbounded::<()>();
        *self.maintenance_stop.lock().unwrap() = Some(stop_tx);

        // Référence faible : le thread ne retient pas la pile en vie, il
        // s'arrête de lui-même quand elle disparaît.
        let weak = Arc::downgrade(self);
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("upnp-maintenance".to_string())
            .spawn(move || {
                let flush_period = Duration::from_millis(config.moderation_flush_ms.max(50));
                let ticker = tick(flush_period);
                let sweep_period = Duration::from_secs(config.sweep_interval_secs.max(1));
                let advertise_period = config.advertise_interval();
                let search_period = Duration::from_secs(config.refresh_search_interval_secs);

                let mut last_sweep = Instant::now();
                // Première ré-annonce à mi-période, avec un peu de jitter
                // pour ne pas synchroniser toutes les piles du réseau.
                let mut next_advertise = Instant::now() + jittered(advertise_period);
                let mut next_search = Instant::now() + search_period;

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(stack) = weak.upgrade() else {
                                break;
                            };
                            stack.flush_moderation();

                            let now = Instant::now();
                            if now.duration_since(last_sweep) >= sweep_period {
                                last_sweep = now;
                                stack.registry.remove_expired();
                                stack.engines.event_server.remove_expired();
                                stack.engines.event_client.remove_expired();
                                stack.engines.event_client.renew_due();
                            }
                            if now >= next_advertise {
                                next_advertise = now + jittered(advertise_period);
                                for local in stack.registry.local_devices() {
                                    stack.engines.discovery.advertise_alive(local.device());
                                }
                            }
                            if config.refresh_search_interval_secs > 0 && now >= next_search {
                                next_search = now + search_period;
                                stack.engines.discovery.refresh_search();
                            }
                        }
                    }
                }
            })
            .expect("spawning the maintenance thread cannot fail");
        *self.maintenance.lock().unwrap() = Some(handle);
    }

    fn flush_moderation(&self) {
        let registry = self.registry.clone();
        self.engines.event_server.flush_moderated(&move |key, variable| {
            registry
                .local_manager(&key.0, &key.1)
                .and_then(|manager| {
                    manager
                        .service()
                        .state_variable(variable)
                        .and_then(|v| v.event_policy().max_rate_ms)
                })
        });
    }
}

impl Drop for UpnpStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Période ± 10 % de jitter.
fn jittered(period: Duration) -> Duration {
    let millis = period.as_millis() as u64;
    if millis == 0 {
        return period;
    }
    let spread = (millis / 10).max(1);
    let offset = rand::thread_rng().gen_range(0..=spread * 2);
    Duration::from_millis(millis - spread + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = UpnpConfig {
            min_lease_secs: 0,
            ..Default::default()
        };
        assert!(UpnpStack::new(config).is_err());
    }

    #[test]
    fn test_shutdown_without_startup_is_noop() {
        let stack = UpnpStack::new(UpnpConfig::default()).unwrap();
        stack.shutdown();
        stack.shutdown();
    }

    #[test]
    fn test_jitter_stays_close_to_period() {
        let period = Duration::from_secs(900);
        for _ in 0..50 {
            let j = jittered(period);
            assert!(j >= Duration::from_secs(810));
            assert!(j <= Duration::from_secs(990));
        }
    }
}
