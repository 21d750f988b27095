//! # Gestion des services locaux
//!
//! Chaque service local est piloté par un [`ServiceManager`] : un verrou
//! unique sérialise les invocations d'actions et les écritures de
//! variables, et le gestionnaire sait lire l'état courant pour
//! l'événement GENA initial — y compris via le mécanisme LastChange
//! d'AVTransport/RenderingControl.

mod manager;

pub use manager::{ActionError, ServiceHandler, ServiceManager, StatePublisher};

use std::collections::HashMap;
use std::sync::Arc;

use crate::binder::LocalServiceBindingError;
use crate::config::UpnpConfig;
use crate::model::{Device, ServiceId, ServicePaths, Udn};

/// Clé stable d'un service local : (UDN, id de service).
pub type ServiceKey = (Udn, ServiceId);

/// Device local : modèle + gestionnaires de services.
///
/// Construit à l'enregistrement ; les chemins HTTP des services sont
/// posés ici, d'après la configuration et l'UDN de chaque device de
/// l'arbre.
pub struct LocalDevice {
    device: Arc<Device>,
    managers: HashMap<ServiceId, Arc<ServiceManager>>,
}

impl LocalDevice {
    /// Lie un device et les implémentations de ses services.
    ///
    /// Échoue si un service n'a pas de handler ou si un handler ne sait
    /// pas lire une variable événementielle (règle de l'événement
    /// initial).
    pub fn new(
        device: Device,
        handlers: Vec<(ServiceId, Box<dyn ServiceHandler>)>,
        config: &UpnpConfig,
    ) -> Result<Self, LocalServiceBindingError> {
        let device = device.map_services(&|owner: &Device, svc| {
            svc.clone().with_paths(ServicePaths {
                scpd: config.scpd_path(owner.udn(), svc.service_id()),
                control: config.control_path(owner.udn(), svc.service_id()),
                event: config.event_path(owner.udn(), svc.service_id()),
            })
        });
        let device = Arc::new(device);

        let mut handlers: HashMap<ServiceId, Box<dyn ServiceHandler>> =
            handlers.into_iter().collect();

        let mut managers = HashMap::new();
        for node in device.iter_devices() {
            for svc in node.services() {
                let id = svc.service_id().clone();
                let handler = handlers.remove(&id).ok_or_else(|| {
                    LocalServiceBindingError::MissingHandler {
                        service: id.to_string(),
                    }
                })?;
                let key: ServiceKey = (node.udn().clone(), id.clone());
                let manager = ServiceManager::new(svc.clone(), key, handler)?;
                managers.insert(id, Arc::new(manager));
            }
        }

        Ok(Self { device, managers })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn udn(&self) -> &Udn {
        self.device.udn()
    }

    pub fn manager(&self, id: &ServiceId) -> Option<&Arc<ServiceManager>> {
        self.managers.get(id)
    }

    pub fn managers(&self) -> impl Iterator<Item = &Arc<ServiceManager>> {
        self.managers.values()
    }

    /// Branche l'éditeur d'événements sur tous les gestionnaires.
    pub fn set_publisher(&self, publisher: Arc<dyn StatePublisher>) {
        for manager in self.managers.values() {
            manager.set_publisher(publisher.clone());
        }
    }
}

impl std::fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDevice")
            .field("udn", self.device.udn())
            .field("services", &self.managers.len())
            .finish()
    }
}
