//! Modèle d'un device UPnP.

use std::sync::Arc;

use crate::model::{DeviceType, ModelError, Service, ServiceId, ServiceType, Udn};

/// Icône déclarée par un device.
#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub url: String,
}

/// Device UPnP : identité, métadonnées constructeur, services et
/// sous-devices.
///
/// L'arbre est immuable une fois construit ; les devices racines et
/// embarqués partagent la même structure.
#[derive(Debug, Clone)]
pub struct Device {
    udn: Udn,
    device_type: DeviceType,
    friendly_name: String,
    manufacturer: String,
    manufacturer_url: Option<String>,
    model_name: String,
    model_description: Option<String>,
    model_number: Option<String>,
    model_url: Option<String>,
    serial_number: Option<String>,
    upc: Option<String>,
    presentation_url: Option<String>,
    icons: Vec<Icon>,
    services: Vec<Arc<Service>>,
    embedded: Vec<Arc<Device>>,
}

impl Device {
    pub fn builder(udn: Udn, device_type: DeviceType, friendly_name: &str) -> DeviceBuilder {
        DeviceBuilder::new(udn, device_type, friendly_name)
    }

    pub fn udn(&self) -> &Udn {
        &self.udn
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn manufacturer_url(&self) -> Option<&str> {
        self.manufacturer_url.as_deref()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_description(&self) -> Option<&str> {
        self.model_description.as_deref()
    }

    pub fn model_number(&self) -> Option<&str> {
        self.model_number.as_deref()
    }

    pub fn model_url(&self) -> Option<&str> {
        self.model_url.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn upc(&self) -> Option<&str> {
        self.upc.as_deref()
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    pub fn icons(&self) -> &[Icon] {
        &self.icons
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn embedded_devices(&self) -> &[Arc<Device>] {
        &self.embedded
    }

    /// Ce device et tous ses sous-devices, racine d'abord.
    pub fn iter_devices(&self) -> Vec<&Device> {
        let mut out = vec![self];
        for child in &self.embedded {
            out.extend(child.iter_devices());
        }
        out
    }

    /// Cherche un service par id, sous-devices compris.
    pub fn find_service(&self, id: &ServiceId) -> Option<&Arc<Service>> {
        for device in self.iter_devices() {
            if let Some(svc) = device.services.iter().find(|s| s.service_id() == id) {
                return Some(svc);
            }
        }
        None
    }

    /// Reconstruit l'arbre en transformant chaque service.
    ///
    /// Utilisé à l'enregistrement local pour poser les chemins HTTP sans
    /// muter le modèle partagé.
    pub fn map_services(&self, f: &impl Fn(&Device, &Service) -> Service) -> Device {
        let mut clone = self.clone();
        clone.services = self
            .services
            .iter()
            .map(|svc| Arc::new(f(self, svc)))
            .collect();
        clone.embedded = self
            .embedded
            .iter()
            .map(|child| Arc::new(child.map_services(f)))
            .collect();
        clone
    }

    /// Cherche le premier service implémentant un type donné.
    pub fn find_service_by_type(&self, st: &ServiceType) -> Option<&Arc<Service>> {
        for device in self.iter_devices() {
            if let Some(svc) = device
                .services
                .iter()
                .find(|s| s.service_type().implements(st))
            {
                return Some(svc);
            }
        }
        None
    }
}

/// Constructeur de [`Device`].
#[derive(Debug)]
pub struct DeviceBuilder {
    device: Device,
}

impl DeviceBuilder {
    pub fn new(udn: Udn, device_type: DeviceType, friendly_name: &str) -> Self {
        Self {
            device: Device {
                udn,
                device_type,
                friendly_name: friendly_name.to_string(),
                manufacturer: String::new(),
                manufacturer_url: None,
                model_name: String::new(),
                model_description: None,
                model_number: None,
                model_url: None,
                serial_number: None,
                upc: None,
                presentation_url: None,
                icons: Vec::new(),
                services: Vec::new(),
                embedded: Vec::new(),
            },
        }
    }

    pub fn manufacturer(mut self, name: &str) -> Self {
        self.device.manufacturer = name.to_string();
        self
    }

    pub fn manufacturer_url(mut self, url: &str) -> Self {
        self.device.manufacturer_url = Some(url.to_string());
        self
    }

    pub fn model_name(mut self, name: &str) -> Self {
        self.device.model_name = name.to_string();
        self
    }

    pub fn model_description(mut self, description: &str) -> Self {
        self.device.model_description = Some(description.to_string());
        self
    }

    pub fn model_number(mut self, number: &str) -> Self {
        self.device.model_number = Some(number.to_string());
        self
    }

    pub fn model_url(mut self, url: &str) -> Self {
        self.device.model_url = Some(url.to_string());
        self
    }

    pub fn serial_number(mut self, serial: &str) -> Self {
        self.device.serial_number = Some(serial.to_string());
        self
    }

    pub fn upc(mut self, upc: &str) -> Self {
        self.device.upc = Some(upc.to_string());
        self
    }

    pub fn presentation_url(mut self, url: &str) -> Self {
        self.device.presentation_url = Some(url.to_string());
        self
    }

    pub fn icon(mut self, icon: Icon) -> Self {
        self.device.icons.push(icon);
        self
    }

    pub fn service(mut self, service: Service) -> Result<Self, ModelError> {
        if self
            .device
            .services
            .iter()
            .any(|s| s.service_id() == service.service_id())
        {
            return Err(ModelError::ServiceAlreadyExists(
                service.service_id().to_string(),
            ));
        }
        self.device.services.push(Arc::new(service));
        Ok(self)
    }

    pub fn embedded_device(mut self, device: Device) -> Result<Self, ModelError> {
        if self
            .device
            .embedded
            .iter()
            .any(|d| d.udn() == device.udn())
        {
            return Err(ModelError::DeviceAlreadyExists(device.udn().to_string()));
        }
        self.device.embedded.push(Arc::new(device));
        Ok(self)
    }

    pub fn build(self) -> Device {
        self.device
    }
}
