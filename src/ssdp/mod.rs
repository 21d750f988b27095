//! # SSDP — Simple Service Discovery Protocol
//!
//! Codec des messages HTTP-over-UDP de découverte : annonces `NOTIFY`
//! (alive/byebye), recherches `M-SEARCH` et leurs réponses unicast.
//!
//! ## Constantes
//!
//! - **Groupe multicast** : 239.255.255.250:1900
//! - **MX** : plafonné à 5 secondes
//! - **byebye** : répété 3 fois

mod message;

pub use message::{Alive, ByeBye, Search, SearchResponse, SsdpMessage};

/// Adresse multicast SSDP.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP.
pub const SSDP_PORT: u16 = 1900;

/// Plafond du MX d'un M-SEARCH.
pub const MAX_SEARCH_MX: u32 = 5;

/// Nombre d'émissions d'un byebye.
pub const BYEBYE_REPEAT: usize = 3;

/// Cible de recherche « tout ».
pub const ST_ALL: &str = "ssdp:all";

/// Cible de recherche « devices racines ».
pub const ST_ROOT_DEVICE: &str = "upnp:rootdevice";
