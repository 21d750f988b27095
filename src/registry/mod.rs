//! # Registre de devices
//!
//! Deux tables clés par UDN : les devices locaux (durée de vie explicite)
//! et les devices distants (durée de vie bornée par le bail `max-age`).
//! Un balayage périodique retire les devices expirés ; chaque retrait
//! notifie les listeners avec sa raison.
//!
//! Verrouillage : un verrou grossier protège les tables, les listeners
//! sont toujours appelés hors du verrou pour éviter toute inversion avec
//! le code utilisateur.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::model::{Device, ServiceId, ServiceType, Udn};
use crate::service::{LocalDevice, ServiceManager};

/// Raison du retrait d'un device distant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// `max-age` écoulé sans rafraîchissement.
    Expired,
    /// `ssdp:byebye` reçu.
    ByeBye,
    /// Arrêt de la pile.
    Shutdown,
}

/// Identité réseau d'un device distant.
///
/// Invariant : `expires_at = discovered_at + max_age`.
#[derive(Debug, Clone)]
pub struct RemoteDeviceIdentity {
    pub udn: Udn,
    pub max_age_secs: u32,
    pub descriptor_url: Url,
    pub discovered_on: Option<IpAddr>,
}

/// Observateur du registre.
pub trait RegistryListener: Send + Sync {
    fn remote_device_added(&self, _device: &Arc<Device>) {}
    fn remote_device_updated(&self, _device: &Arc<Device>) {}
    fn remote_device_removed(&self, _device: &Arc<Device>, _reason: RemovalReason) {}
    fn local_device_added(&self, _device: &Arc<Device>) {}
    fn local_device_removed(&self, _device: &Arc<Device>) {}
}

/// Erreurs du registre.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("device '{0}' is already registered")]
    AlreadyRegistered(Udn),
}

struct RemoteEntry {
    device: Arc<Device>,
    identity: RemoteDeviceIdentity,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    local: HashMap<Udn, Arc<LocalDevice>>,
    remote: HashMap<Udn, RemoteEntry>,
}

enum Notification {
    RemoteAdded(Arc<Device>),
    RemoteUpdated(Arc<Device>),
    RemoteRemoved(Arc<Device>, RemovalReason),
    LocalAdded(Arc<Device>),
    LocalRemoved(Arc<Device>),
}

/// Registre des devices connus.
pub struct Registry {
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
    paused: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            listeners: RwLock::new(Vec::new()),
            paused: AtomicBool::new(false),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Suspend les balayages d'expiration.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ---- Devices locaux -------------------------------------------------

    pub fn add_local(&self, device: Arc<LocalDevice>) -> Result<(), RegistryError> {
        let udn = device.udn().clone();
        let model = device.device().clone();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.local.contains_key(&udn) {
                return Err(RegistryError::AlreadyRegistered(udn));
            }
            inner.local.insert(udn.clone(), device);
        }
        info!("✅ local device registered: {}", udn);
        self.notify(vec![Notification::LocalAdded(model)]);
        Ok(())
    }

    pub fn remove_local(&self, udn: &Udn) -> Option<Arc<LocalDevice>> {
        let removed = self.inner.lock().unwrap().local.remove(udn);
        if let Some(device) = &removed {
            info!("local device removed: {}", udn);
            self.notify(vec![Notification::LocalRemoved(device.device().clone())]);
        }
        removed
    }

    pub fn local_device(&self, udn: &Udn) -> Option<Arc<LocalDevice>> {
        self.inner.lock().unwrap().local.get(udn).cloned()
    }

    pub fn local_devices(&self) -> Vec<Arc<LocalDevice>> {
        self.inner.lock().unwrap().local.values().cloned().collect()
    }

    /// Gestionnaire d'un service local, par (UDN, id de service).
    ///
    /// L'UDN peut désigner un device embarqué ; l'id de service est
    /// aussi accepté par son composant court (forme utilisée dans les
    /// chemins HTTP, où le domaine du vendeur n'apparaît pas).
    pub fn local_manager(
        &self,
        udn: &Udn,
        service_id: &ServiceId,
    ) -> Option<Arc<ServiceManager>> {
        let inner = self.inner.lock().unwrap();
        let local = inner
            .local
            .values()
            .find(|local| local.device().iter_devices().iter().any(|d| d.udn() == udn))?;
        local.manager(service_id).cloned().or_else(|| {
            local
                .managers()
                .find(|m| m.service().service_id().id() == service_id.id())
                .cloned()
        })
    }

    // ---- Devices distants -----------------------------------------------

    /// Ajoute ou remplace un device distant après lecture du descripteur.
    pub fn update_remote(&self, device: Arc<Device>, identity: RemoteDeviceIdentity) {
        let udn = identity.udn.clone();
        let expires_at = Instant::now() + Duration::from_secs(identity.max_age_secs as u64);
        let notification = {
            let mut inner = self.inner.lock().unwrap();
            let existed = inner.remote.contains_key(&udn);
            inner.remote.insert(
                udn.clone(),
                RemoteEntry {
                    device: device.clone(),
                    identity,
                    expires_at,
                },
            );
            if existed {
                Notification::RemoteUpdated(device)
            } else {
                Notification::RemoteAdded(device)
            }
        };
        match &notification {
            Notification::RemoteAdded(_) => info!("📡 remote device added: {}", udn),
            _ => debug!("remote device refreshed: {}", udn),
        }
        self.notify(vec![notification]);
    }

    /// Rafraîchit le bail d'un device connu.
    ///
    /// Retourne `false` si le device est inconnu ou si son URL de
    /// descripteur a changé — dans les deux cas l'appelant doit relire
    /// les descripteurs avant publication.
    pub fn refresh_remote(&self, udn: &Udn, max_age_secs: u32, descriptor_url: &Url) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.remote.get_mut(udn) {
            Some(entry) if entry.identity.descriptor_url == *descriptor_url => {
                entry.identity.max_age_secs = max_age_secs;
                entry.expires_at = Instant::now() + Duration::from_secs(max_age_secs as u64);
                true
            }
            _ => false,
        }
    }

    pub fn remote_device(&self, udn: &Udn) -> Option<Arc<Device>> {
        self.inner
            .lock()
            .unwrap()
            .remote
            .get(udn)
            .map(|e| e.device.clone())
    }

    pub fn remote_identity(&self, udn: &Udn) -> Option<RemoteDeviceIdentity> {
        self.inner
            .lock()
            .unwrap()
            .remote
            .get(udn)
            .map(|e| e.identity.clone())
    }

    pub fn remote_devices(&self) -> Vec<Arc<Device>> {
        self.inner
            .lock()
            .unwrap()
            .remote
            .values()
            .map(|e| e.device.clone())
            .collect()
    }

    /// Instant d'expiration du bail d'un device distant.
    pub fn remote_expires_at(&self, udn: &Udn) -> Option<Instant> {
        self.inner.lock().unwrap().remote.get(udn).map(|e| e.expires_at)
    }

    /// Services distants filtrés par type.
    pub fn remote_services(&self, st: &ServiceType) -> Vec<(Udn, Arc<crate::model::Service>)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for entry in inner.remote.values() {
            for device in entry.device.iter_devices() {
                for svc in device.services() {
                    if svc.service_type().implements(st) {
                        out.push((device.udn().clone(), svc.clone()));
                    }
                }
            }
        }
        out
    }

    pub fn remove_remote(&self, udn: &Udn, reason: RemovalReason) -> bool {
        let removed = self.inner.lock().unwrap().remote.remove(udn);
        match removed {
            Some(entry) => {
                info!("👋 remote device removed ({:?}): {}", reason, udn);
                self.notify(vec![Notification::RemoteRemoved(entry.device, reason)]);
                true
            }
            None => false,
        }
    }

    /// Retire tous les devices distants dont le bail est écoulé.
    pub fn remove_expired(&self) {
        if self.is_paused() {
            return;
        }
        let now = Instant::now();
        let expired: Vec<(Udn, Arc<Device>)> = {
            let mut inner = self.inner.lock().unwrap();
            let udns: Vec<Udn> = inner
                .remote
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(udn, _)| udn.clone())
                .collect();
            udns.into_iter()
                .filter_map(|udn| inner.remote.remove(&udn).map(|e| (udn, e.device)))
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let notifications = expired
            .into_iter()
            .map(|(udn, device)| {
                info!("⏳ remote device expired: {}", udn);
                Notification::RemoteRemoved(device, RemovalReason::Expired)
            })
            .collect();
        self.notify(notifications);
    }

    /// Vide la table distante (arrêt de la pile).
    pub fn remove_all_remote(&self, reason: RemovalReason) {
        let entries: Vec<Arc<Device>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.remote.drain().map(|(_, e)| e.device).collect()
        };
        let notifications = entries
            .into_iter()
            .map(|device| Notification::RemoteRemoved(device, reason))
            .collect();
        self.notify(notifications);
    }

    // Dispatch hors verrou : le code utilisateur peut rappeler le
    // registre sans interblocage.
    fn notify(&self, notifications: Vec<Notification>) {
        let listeners = self.listeners.read().unwrap().clone();
        for notification in &notifications {
            for listener in &listeners {
                match notification {
                    Notification::RemoteAdded(d) => listener.remote_device_added(d),
                    Notification::RemoteUpdated(d) => listener.remote_device_updated(d),
                    Notification::RemoteRemoved(d, reason) => {
                        listener.remote_device_removed(d, *reason)
                    }
                    Notification::LocalAdded(d) => listener.local_device_added(d),
                    Notification::LocalRemoved(d) => listener.local_device_removed(d),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceType;
    use std::sync::atomic::AtomicU32;

    fn remote(udn: &str, max_age: u32) -> (Arc<Device>, RemoteDeviceIdentity) {
        let udn: Udn = udn.parse().unwrap();
        let device = Arc::new(
            Device::builder(
                udn.clone(),
                DeviceType::standard("MediaRenderer", 1),
                "remote",
            )
            .build(),
        );
        let identity = RemoteDeviceIdentity {
            udn,
            max_age_secs: max_age,
            descriptor_url: Url::parse("http://10.0.0.9:8080/desc.xml").unwrap(),
            discovered_on: None,
        };
        (device, identity)
    }

    #[derive(Default)]
    struct Counter {
        added: AtomicU32,
        removed: AtomicU32,
        updated: AtomicU32,
    }

    impl RegistryListener for Counter {
        fn remote_device_added(&self, _d: &Arc<Device>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_device_updated(&self, _d: &Arc<Device>) {
            self.updated.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_device_removed(&self, _d: &Arc<Device>, _r: RemovalReason) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_update_then_byebye() {
        let registry = Registry::new();
        let counter = Arc::new(Counter::default());
        registry.add_listener(counter.clone());

        let (device, identity) = remote("uuid:r1", 1800);
        let udn = identity.udn.clone();
        registry.update_remote(device, identity);
        assert!(registry.remote_device(&udn).is_some());
        assert_eq!(counter.added.load(Ordering::SeqCst), 1);

        assert!(registry.remove_remote(&udn, RemovalReason::ByeBye));
        assert!(registry.remote_device(&udn).is_none());
        assert_eq!(counter.removed.load(Ordering::SeqCst), 1);
        // Un second byebye est sans effet.
        assert!(!registry.remove_remote(&udn, RemovalReason::ByeBye));
    }

    #[test]
    fn test_refresh_advances_expiry_without_refetch() {
        let registry = Registry::new();
        let (device, identity) = remote("uuid:r2", 1);
        let udn = identity.udn.clone();
        let url = identity.descriptor_url.clone();
        registry.update_remote(device, identity);

        let first_expiry = registry.remote_expires_at(&udn).unwrap();
        assert!(registry.refresh_remote(&udn, 1800, &url));
        assert!(registry.remote_expires_at(&udn).unwrap() > first_expiry);

        // URL différente : il faut relire les descripteurs.
        let other = Url::parse("http://10.0.0.10:8080/desc.xml").unwrap();
        assert!(!registry.refresh_remote(&udn, 1800, &other));
    }

    #[test]
    fn test_expiry_sweep() {
        let registry = Registry::new();
        let counter = Arc::new(Counter::default());
        registry.add_listener(counter.clone());

        let (device, identity) = remote("uuid:r3", 0);
        let udn = identity.udn.clone();
        registry.update_remote(device, identity);

        registry.remove_expired();
        assert!(registry.remote_device(&udn).is_none());
        assert_eq!(counter.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_stops_sweep() {
        let registry = Registry::new();
        let (device, identity) = remote("uuid:r4", 0);
        let udn = identity.udn.clone();
        registry.update_remote(device, identity);

        registry.pause();
        registry.remove_expired();
        assert!(registry.remote_device(&udn).is_some());

        registry.resume();
        registry.remove_expired();
        assert!(registry.remote_device(&udn).is_none());
    }

    #[test]
    fn test_update_notifies_updated_not_added() {
        let registry = Registry::new();
        let counter = Arc::new(Counter::default());
        registry.add_listener(counter.clone());

        let (device, identity) = remote("uuid:r5", 60);
        registry.update_remote(device.clone(), identity.clone());
        registry.update_remote(device, identity);
        assert_eq!(counter.added.load(Ordering::SeqCst), 1);
        assert_eq!(counter.updated.load(Ordering::SeqCst), 1);
    }
}
