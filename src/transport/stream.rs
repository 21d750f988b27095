//! Messages de flux HTTP et client bloquant.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace};
use ureq::Agent;
use url::Url;

use crate::config::UpnpConfig;
use crate::transport::TransportError;

/// Méthodes HTTP utilisées par les protocoles UPnP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMethod {
    Get,
    Post,
    Subscribe,
    Unsubscribe,
    Notify,
}

impl StreamMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMethod::Get => "GET",
            StreamMethod::Post => "POST",
            StreamMethod::Subscribe => "SUBSCRIBE",
            StreamMethod::Unsubscribe => "UNSUBSCRIBE",
            StreamMethod::Notify => "NOTIFY",
        }
    }

    pub fn from_str_opt(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(StreamMethod::Get),
            "POST" => Some(StreamMethod::Post),
            "SUBSCRIBE" => Some(StreamMethod::Subscribe),
            "UNSUBSCRIBE" => Some(StreamMethod::Unsubscribe),
            "NOTIFY" => Some(StreamMethod::Notify),
            _ => None,
        }
    }
}

/// Multimap d'en-têtes, insensible à la casse des noms.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_string(), value.into()));
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// Première valeur portant ce nom.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Toutes les valeurs portant ce nom.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Requête HTTP analysée, côté serveur comme côté client.
///
/// Côté serveur `uri` est le chemin de la requête ; côté client c'est
/// l'URL absolue de la cible.
#[derive(Debug, Clone)]
pub struct StreamRequestMessage {
    pub method: StreamMethod,
    pub uri: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub remote: Option<SocketAddr>,
}

impl StreamRequestMessage {
    pub fn new(method: StreamMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Vec::new(),
            remote: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// Réponse HTTP produite par la pile ou reçue du réseau.
#[derive(Debug, Clone)]
pub struct StreamResponseMessage {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl StreamResponseMessage {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// `200 OK` avec un corps `text/xml`.
    pub fn ok_xml(body: String) -> Self {
        Self::new(200)
            .with_header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .with_body(body.into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client de flux HTTP : seam vers le moteur HTTP externe.
pub trait StreamClient: Send + Sync {
    /// Exécute une requête ; `uri` du message doit être une URL absolue.
    fn request(
        &self,
        request: &StreamRequestMessage,
    ) -> Result<StreamResponseMessage, TransportError>;
}

/// Implémentation [`StreamClient`] au-dessus d'un agent `ureq`.
pub struct UreqStreamClient {
    agent: Agent,
}

impl UreqStreamClient {
    /// Agent avec timeouts connexion / réponse / global distincts.
    pub fn new(config: &UpnpConfig) -> Self {
        Self::with_timeouts(
            config.connect_timeout(),
            config.response_timeout(),
            config.total_timeout(),
        )
    }

    pub fn with_timeouts(connect: Duration, response: Duration, total: Duration) -> Self {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(connect))
            .timeout_recv_response(Some(response))
            .timeout_global(Some(total))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl StreamClient for UreqStreamClient {
    fn request(
        &self,
        request: &StreamRequestMessage,
    ) -> Result<StreamResponseMessage, TransportError> {
        Url::parse(&request.uri)
            .map_err(|e| TransportError::Http(format!("invalid url '{}': {e}", request.uri)))?;

        let method = ureq::http::Method::from_bytes(request.method.as_str().as_bytes())
            .expect("UPnP methods are valid HTTP tokens");

        let mut builder = ureq::http::Request::builder()
            .method(method)
            .uri(&request.uri);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let http_request = builder
            .body(request.body.clone())
            .map_err(|e| TransportError::Http(e.to_string()))?;

        debug!(
            method = request.method.as_str(),
            uri = request.uri.as_str(),
            "stream request"
        );

        let mut response = self.agent.run(http_request).map_err(map_ureq_error)?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.add(name.as_str(), v);
            }
        }
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(map_ureq_error)?;

        trace!(status, bytes = body.len(), "stream response");

        Ok(StreamResponseMessage {
            status,
            headers,
            body,
        })
    }
}

fn map_ureq_error(error: ureq::Error) -> TransportError {
    match error {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Http(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/xml");
        headers.add("SID", "uuid:1");
        assert_eq!(headers.get("content-type"), Some("text/xml"));
        assert_eq!(headers.get("sid"), Some("uuid:1"));
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn test_headers_multimap() {
        let headers = Headers::new().with("CALLBACK", "<a>").with("callback", "<b>");
        let all: Vec<&str> = headers.get_all("Callback").collect();
        assert_eq!(all, vec!["<a>", "<b>"]);
    }

    #[test]
    fn test_methods() {
        assert_eq!(StreamMethod::from_str_opt("subscribe"), Some(StreamMethod::Subscribe));
        assert_eq!(StreamMethod::from_str_opt("PATCH"), None);
        assert_eq!(StreamMethod::Notify.as_str(), "NOTIFY");
    }

    #[test]
    fn test_response_helpers() {
        let resp = StreamResponseMessage::ok_xml("<a/>".to_string());
        assert!(resp.is_success());
        assert_eq!(resp.headers.get("content-type"), Some("text/xml; charset=\"utf-8\""));
        assert!(!StreamResponseMessage::new(412).is_success());
    }
}
