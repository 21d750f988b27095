//! Configuration de la pile.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::model::{ServiceId, Udn};

/// Erreur de configuration, fatale avant démarrage.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Options reconnues par le routeur et les moteurs de protocole.
///
/// Toutes les valeurs ont un défaut raisonnable ; la structure se
/// désérialise telle quelle depuis un fichier de configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpnpConfig {
    /// Groupe multicast SSDP.
    pub multicast_address: Ipv4Addr,
    /// Port multicast SSDP.
    pub multicast_port: u16,
    /// Port d'écoute HTTP (0 = éphémère).
    pub stream_listen_port: u16,
    /// TTL des datagrammes multicast.
    pub ttl: u32,
    /// Taille maximale d'un datagramme SSDP.
    pub max_datagram_bytes: usize,
    /// MX des M-SEARCH émis par le control point.
    pub search_mx: u32,
    /// Durée de validité des annonces (CACHE-CONTROL max-age).
    pub max_age_secs: u32,
    /// Période de ré-annonce ; 0 = `max_age_secs / 2`.
    pub advertise_interval_secs: u64,
    /// Bail minimal accordé aux abonnements GENA.
    pub min_lease_secs: u32,
    /// Bail maximal accordé aux abonnements GENA.
    pub max_lease_secs: u32,
    /// Marge de renouvellement côté client, avant expiration du bail.
    pub renewal_slack_secs: u32,
    /// Interfaces à inclure (vide = toutes les non-loopback).
    pub interface_include: Vec<String>,
    /// Interfaces à exclure.
    pub interface_exclude: Vec<String>,
    /// Produit annoncé dans l'en-tête SERVER / USER-AGENT.
    pub user_agent_product: String,
    /// Préfixe des chemins HTTP UPnP.
    pub path_prefix: String,
    /// Période du balayage d'expiration (registre et abonnements).
    pub sweep_interval_secs: u64,
    /// Période de vidage de la modération d'événements.
    pub moderation_flush_ms: u64,
    /// Timeout de connexion HTTP.
    pub connect_timeout_ms: u64,
    /// Timeout de lecture de la réponse HTTP.
    pub response_timeout_ms: u64,
    /// Timeout global d'une requête HTTP.
    pub total_timeout_ms: u64,
    /// Timeout (court) de livraison d'un NOTIFY GENA.
    pub notify_timeout_ms: u64,
    /// Nombre maximal de réponses M-SEARCH acceptées par seconde.
    pub search_response_per_second: u32,
    /// Période des M-SEARCH de rafraîchissement ; 0 = désactivé.
    pub refresh_search_interval_secs: u64,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            multicast_address: Ipv4Addr::new(239, 255, 255, 250),
            multicast_port: 1900,
            stream_listen_port: 0,
            ttl: 4,
            max_datagram_bytes: 640,
            search_mx: 3,
            max_age_secs: 1800,
            advertise_interval_secs: 0,
            min_lease_secs: 60,
            max_lease_secs: 1800,
            renewal_slack_secs: 30,
            interface_include: Vec::new(),
            interface_exclude: Vec::new(),
            user_agent_product: format!("hirondelle/{}", env!("CARGO_PKG_VERSION")),
            path_prefix: String::new(),
            sweep_interval_secs: 2,
            moderation_flush_ms: 250,
            connect_timeout_ms: 3_000,
            response_timeout_ms: 5_000,
            total_timeout_ms: 10_000,
            notify_timeout_ms: 2_000,
            search_response_per_second: 50,
            refresh_search_interval_secs: 300,
        }
    }
}

impl UpnpConfig {
    /// Valide la configuration ; erreur fatale avant tout bind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multicast_port == 0 {
            return Err(ConfigError::Invalid("multicastPort must not be 0".into()));
        }
        if self.ttl == 0 || self.ttl > 255 {
            return Err(ConfigError::Invalid("ttl must be in [1, 255]".into()));
        }
        if self.min_lease_secs == 0 || self.min_lease_secs > self.max_lease_secs {
            return Err(ConfigError::Invalid(
                "lease bounds require 0 < minLeaseSec <= maxLeaseSec".into(),
            ));
        }
        if self.max_age_secs == 0 {
            return Err(ConfigError::Invalid("maxAgeSecs must not be 0".into()));
        }
        if self.max_datagram_bytes < 128 {
            return Err(ConfigError::Invalid(
                "maxDatagramBytes must be at least 128".into(),
            ));
        }
        Ok(())
    }

    /// Valeur de l'en-tête `SERVER` / `USER-AGENT`.
    pub fn server_header(&self) -> String {
        format!(
            "{}/{} UPnP/1.1 {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            self.user_agent_product
        )
    }

    /// Période effective de ré-annonce SSDP.
    pub fn advertise_interval(&self) -> Duration {
        if self.advertise_interval_secs > 0 {
            Duration::from_secs(self.advertise_interval_secs)
        } else {
            Duration::from_secs((self.max_age_secs / 2).max(1) as u64)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    // Chemins HTTP des devices locaux.

    pub fn device_descriptor_path(&self, udn: &Udn) -> String {
        format!("{}/dev/{}/desc.xml", self.path_prefix, udn)
    }

    pub fn scpd_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/dev/{}/svc/{}/desc.xml", self.path_prefix, udn, service_id.id())
    }

    pub fn control_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/dev/{}/svc/{}/control", self.path_prefix, udn, service_id.id())
    }

    pub fn event_path(&self, udn: &Udn, service_id: &ServiceId) -> String {
        format!("{}/dev/{}/svc/{}/event", self.path_prefix, udn, service_id.id())
    }

    /// Chemin de callback GENA côté control point.
    pub fn callback_path(&self, udn: &Udn, service_id: &ServiceId, sid: &str) -> String {
        format!(
            "{}/dev/{}/svc/{}/event/cb/{}",
            self.path_prefix,
            udn,
            service_id.id(),
            sid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        UpnpConfig::default().validate().unwrap();
    }

    #[test]
    fn test_lease_bounds_checked() {
        let config = UpnpConfig {
            min_lease_secs: 3600,
            max_lease_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths() {
        let config = UpnpConfig::default();
        let udn: Udn = "uuid:abc".parse().unwrap();
        let id = ServiceId::standard("AVTransport");
        assert_eq!(
            config.device_descriptor_path(&udn),
            "/dev/uuid:abc/desc.xml"
        );
        assert_eq!(
            config.control_path(&udn, &id),
            "/dev/uuid:abc/svc/AVTransport/control"
        );
        assert_eq!(
            config.callback_path(&udn, &id, "uuid:sid"),
            "/dev/uuid:abc/svc/AVTransport/event/cb/uuid:sid"
        );
    }

    #[test]
    fn test_advertise_interval_defaults_to_half_max_age() {
        let config = UpnpConfig::default();
        assert_eq!(config.advertise_interval(), Duration::from_secs(900));
    }
}
