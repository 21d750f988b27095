//! # GENA — eventing UPnP
//!
//! Publication/abonnement HTTP des changements de variables d'état :
//! codec des property sets, comptabilité des abonnements (SID, bail,
//! numéro de séquence), accumulateur LastChange, et les deux moteurs —
//! serveur (devices locaux) et client (control point).

mod client;
mod last_change;
mod propertyset;
mod server;
mod subscription;

pub use client::{EventClient, GenaClientError, PropertyChangeListener, RemoteSubscription};
pub use last_change::{LastChange, AVT_EVENT_NS, RCS_EVENT_NS};
pub use propertyset::{decode_property_set, encode_property_set, GenaParseError};
pub use server::{EventServer, GenaServerError};
pub use subscription::{EventSequence, LocalSubscription, Sid, Timeout};

/// En-tête `NT` obligatoire des requêtes d'abonnement.
pub const NT_UPNP_EVENT: &str = "upnp:event";

/// En-tête `NTS` des NOTIFY de changement d'état.
pub const NTS_PROPCHANGE: &str = "upnp:propchange";
