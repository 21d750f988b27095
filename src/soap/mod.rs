//! # Codec SOAP de contrôle
//!
//! Enveloppes SOAP des invocations d'actions UPnP : requêtes, réponses
//! et faults. Le codec est strict côté serveur : une enveloppe avec
//! plusieurs enfants dans le `Body`, un namespace inattendu ou des
//! arguments obligatoires absents est rejetée.
//!
//! ## Format
//!
//! ```text
//! POST <control-url> HTTP/1.1
//! SOAPACTION: "<service-type>#<action>"
//!
//! <s:Envelope><s:Body>
//!   <u:ActionName xmlns:u="<service-type>"><arg>…</arg></u:ActionName>
//! </s:Body></s:Envelope>
//! ```

mod builder;
mod fault;
mod parser;

pub use builder::{build_action_request, build_action_response};
pub use fault::{build_fault, parse_fault, ErrorCode, UpnpFault};
pub use parser::{parse_action_request, parse_action_response, ActionCall, SoapParseError};

pub(crate) const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub(crate) const SOAP_ENCODING: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub(crate) const UPNP_CONTROL_NS: &str = "urn:schemas-upnp-org:control-1-0";

/// Valeur de l'en-tête `SOAPACTION` : `"<service-type>#<action>"`.
pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

/// Décompose un en-tête `SOAPACTION` en (type de service, action).
pub fn parse_soap_action_header(value: &str) -> Option<(String, String)> {
    let trimmed = value.trim().trim_matches('"');
    let (service_type, action) = trimmed.split_once('#')?;
    if service_type.is_empty() || action.is_empty() {
        return None;
    }
    Some((service_type.to_string(), action.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soap_action_header_round_trip() {
        let header =
            soap_action_header("urn:schemas-upnp-org:service:AVTransport:1", "GetMediaInfo");
        assert_eq!(
            header,
            "\"urn:schemas-upnp-org:service:AVTransport:1#GetMediaInfo\""
        );
        let (st, action) = parse_soap_action_header(&header).unwrap();
        assert_eq!(st, "urn:schemas-upnp-org:service:AVTransport:1");
        assert_eq!(action, "GetMediaInfo");
    }

    #[test]
    fn test_soap_action_header_rejects_junk() {
        assert!(parse_soap_action_header("\"no-separator\"").is_none());
        assert!(parse_soap_action_header("\"#Action\"").is_none());
    }
}
