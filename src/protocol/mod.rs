//! # Moteurs de protocole
//!
//! Le point de jonction entre le routeur et la sémantique UPnP :
//! - **Discovery** (SSDP) : annonces locales, réponses aux recherches,
//!   admission des devices distants ;
//! - **Control** (SOAP) : dispatch serveur et invocation client ;
//! - **Eventing** (GENA) : délégué aux moteurs du module `gena`.
//!
//! L'aiguillage entrant se fait par nature du message : datagramme SSDP
//! vers Discovery, flux HTTP vers le descripteur, le contrôle ou
//! l'eventing selon le chemin et la méthode.

pub mod control;
pub mod discovery;

use std::sync::Arc;

use tracing::debug;

use crate::config::UpnpConfig;
use crate::descriptor::{write_device_descriptor, write_scpd};
use crate::gena::{EventClient, EventServer};
use crate::model::{ServiceId, Udn};
use crate::registry::Registry;
use crate::router::{InboundDispatch, IncomingDatagram};
use crate::service::ServiceKey;
use crate::ssdp::SsdpMessage;
use crate::transport::{StreamMethod, StreamRequestMessage, StreamResponseMessage};

pub use control::{handle_control_request, invoke_action, ActionInvocation};
pub use discovery::{DescriptorLoader, DiscoveryEngine, HttpDescriptorLoader};

/// Route d'une requête de flux entrante.
#[derive(Debug, PartialEq)]
enum StreamRoute {
    DeviceDescriptor(Udn),
    Scpd(Udn, ServiceId),
    Control(Udn, ServiceId),
    Event(Udn, ServiceId),
    EventCallback,
}

fn parse_route(config: &UpnpConfig, path: &str) -> Option<StreamRoute> {
    let path = path.strip_prefix(config.path_prefix.as_str())?;
    let mut parts = path.split('/');
    if !parts.next()?.is_empty() {
        return None;
    }
    if parts.next()? != "dev" {
        return None;
    }
    let udn: Udn = parts.next()?.parse().ok()?;
    match parts.next()? {
        "desc.xml" => parts.next().is_none().then_some(StreamRoute::DeviceDescriptor(udn)),
        "svc" => {
            let service_id = ServiceId::standard(parts.next()?);
            match parts.next()? {
                "desc.xml" => Some(StreamRoute::Scpd(udn, service_id)),
                "control" => Some(StreamRoute::Control(udn, service_id)),
                "event" => match parts.next() {
                    None => Some(StreamRoute::Event(udn, service_id)),
                    Some("cb") => Some(StreamRoute::EventCallback),
                    Some(_) => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}

/// Les trois moteurs, branchés sur le routeur comme dispatch entrant.
pub struct ProtocolEngines {
    config: Arc<UpnpConfig>,
    registry: Arc<Registry>,
    pub discovery: Arc<DiscoveryEngine>,
    pub event_server: Arc<EventServer>,
    pub event_client: Arc<EventClient>,
}

impl ProtocolEngines {
    pub fn new(
        config: Arc<UpnpConfig>,
        registry: Arc<Registry>,
        discovery: Arc<DiscoveryEngine>,
        event_server: Arc<EventServer>,
        event_client: Arc<EventClient>,
    ) -> Self {
        Self {
            config,
            registry,
            discovery,
            event_server,
            event_client,
        }
    }

    fn serve_device_descriptor(&self, udn: &Udn) -> StreamResponseMessage {
        let device = self
            .registry
            .local_devices()
            .into_iter()
            .find(|local| local.udn() == udn)
            .map(|local| local.device().clone());
        match device {
            Some(device) => match write_device_descriptor(&device) {
                Ok(xml) => StreamResponseMessage::ok_xml(xml),
                Err(_) => StreamResponseMessage::new(500),
            },
            None => StreamResponseMessage::new(404),
        }
    }

    fn serve_scpd(&self, udn: &Udn, service_id: &ServiceId) -> StreamResponseMessage {
        match self.registry.local_manager(udn, service_id) {
            Some(manager) => match write_scpd(manager.service()) {
                Ok(xml) => StreamResponseMessage::ok_xml(xml),
                Err(_) => StreamResponseMessage::new(500),
            },
            None => StreamResponseMessage::new(404),
        }
    }
}

impl InboundDispatch for ProtocolEngines {
    fn received_datagram(&self, datagram: IncomingDatagram) {
        match &datagram.message {
            SsdpMessage::Search(_) => self.discovery.handle_search(&datagram),
            SsdpMessage::Alive(_) | SsdpMessage::SearchResponse(_) => {
                self.discovery.handle_presence(&datagram)
            }
            SsdpMessage::ByeBye(_) => self.discovery.handle_byebye(&datagram),
        }
    }

    fn received_stream(&self, request: StreamRequestMessage) -> StreamResponseMessage {
        let Some(route) = parse_route(&self.config, &request.uri) else {
            debug!(path = request.uri.as_str(), "no UPnP route for request");
            return StreamResponseMessage::new(404);
        };

        match (&request.method, route) {
            (StreamMethod::Get, StreamRoute::DeviceDescriptor(udn)) => {
                self.serve_device_descriptor(&udn)
            }
            (StreamMethod::Get, StreamRoute::Scpd(udn, service_id)) => {
                self.serve_scpd(&udn, &service_id)
            }
            (StreamMethod::Post, StreamRoute::Control(udn, service_id)) => {
                match self.registry.local_manager(&udn, &service_id) {
                    Some(manager) => handle_control_request(&request, &manager),
                    None => StreamResponseMessage::new(404),
                }
            }
            (
                StreamMethod::Subscribe | StreamMethod::Unsubscribe,
                StreamRoute::Event(udn, service_id),
            ) => match self.registry.local_manager(&udn, &service_id) {
                Some(manager) => {
                    // La clé du gestionnaire, pas celle du chemin : c'est
                    // elle que les publications d'état utilisent.
                    let key: ServiceKey = manager.key().clone();
                    self.event_server.handle_request(&request, &key, &manager)
                }
                None => StreamResponseMessage::new(404),
            },
            (StreamMethod::Notify, StreamRoute::EventCallback) => {
                self.event_client.handle_notify(&request)
            }
            _ => StreamResponseMessage::new(405),
        }
    }
}
