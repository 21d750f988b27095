//! Adaptateur serveur HTTP (axum).
//!
//! Le moteur HTTP est un collaborateur externe de la pile : ce module
//! fait le pont — chaque requête axum devient un
//! [`StreamRequestMessage`] remis au routeur sur un thread bloquant, et
//! la [`StreamResponseMessage`] produite repart en réponse hyper. Le
//! cœur ne voit jamais un type axum.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use tracing::{debug, info, warn};

use crate::router::Router;
use crate::transport::{
    Headers, StreamMethod, StreamRequestMessage, StreamResponseMessage, TransportError,
};

/// Taille maximale d'un corps de requête accepté (SOAP, property sets).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Serveur de flux HTTP adossé au routeur.
pub struct HttpServer {
    // Gardé vivant : le runtime porte la tâche de service.
    _runtime: tokio::runtime::Runtime,
    local_addr: SocketAddr,
    shutdown_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl HttpServer {
    /// Démarre le serveur sur `0.0.0.0:listen_port` (0 = éphémère).
    pub fn start(listen_port: u16, router: Arc<Router>) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("upnp-httpd")
            .enable_all()
            .build()
            .map_err(TransportError::Io)?;

        let listener = runtime
            .block_on(tokio::net::TcpListener::bind(("0.0.0.0", listen_port)))
            .map_err(|e| TransportError::Bind {
                addr: format!("0.0.0.0:{listen_port}"),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        let app = axum::Router::new()
            .fallback(dispatch)
            .with_state(router);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        runtime.spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!("HTTP stream server terminated with error: {}", e);
            }
        });

        info!("✅ HTTP stream server listening on {}", local_addr);
        Ok(Self {
            _runtime: runtime,
            local_addr,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Arrêt gracieux ; idempotent. Le runtime s'éteint avec la valeur.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn dispatch(State(router): State<Arc<Router>>, request: axum::extract::Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(method) = StreamMethod::from_str_opt(parts.method.as_str()) else {
        return status_response(StatusCode::METHOD_NOT_ALLOWED);
    };

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("request body rejected: {}", e);
            return status_response(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let mut headers = Headers::new();
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.add(name.as_str(), value);
        }
    }

    let message = StreamRequestMessage {
        method,
        uri: parts.uri.path().to_string(),
        headers,
        body: bytes.to_vec(),
        remote: None,
    };

    // Le routeur et les moteurs sont synchrones et peuvent bloquer
    // (verrou de service, invocation d'action).
    let response = tokio::task::spawn_blocking(move || router.received_stream(message))
        .await
        .unwrap_or_else(|_| StreamResponseMessage::new(500));

    into_axum_response(response)
}

fn status_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static response cannot fail")
}

fn into_axum_response(message: StreamResponseMessage) -> Response {
    let mut builder = Response::builder().status(message.status);
    for (name, value) in message.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(message.body))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}
