//! # Transports réseau
//!
//! Les entrées/sorties brutes de la pile : datagrammes UDP par
//! interface, réception multicast SSDP, et l'adaptateur de flux HTTP
//! (messages requête/réponse analysés, client `ureq`).
//!
//! Le moteur HTTP serveur est un collaborateur externe : il livre des
//! [`StreamRequestMessage`] au routeur et renvoie les
//! [`StreamResponseMessage`] produits (voir le module `httpd` pour
//! l'adaptateur axum fourni).

mod datagram;
mod multicast;
mod stream;

pub use datagram::DatagramIo;
pub use multicast::MulticastReceiver;
pub use stream::{
    Headers, StreamClient, StreamMethod, StreamRequestMessage, StreamResponseMessage,
    UreqStreamClient,
};

use thiserror::Error;

/// Erreurs de transport.
///
/// La fermeture de socket est un signal terminal normal : les boucles de
/// réception la traitent comme une fin propre, jamais comme une panne.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket closed")]
    SocketClosed,

    #[error("send failed: {0}")]
    Send(std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
