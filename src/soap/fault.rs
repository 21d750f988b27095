//! SOAP Faults et codes d'erreur UPnP.

use std::io::BufReader;

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::soap::{SOAP_ENVELOPE_NS, UPNP_CONTROL_NS};

/// Codes d'erreur UPnP du protocole de contrôle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidAction,
    InvalidArgs,
    ActionFailed,
    ArgumentValueInvalid,
    ArgumentValueOutOfRange,
    OptionalActionNotImplemented,
    OutOfMemory,
    HumanInterventionRequired,
    StringArgumentTooLong,
    /// Code spécifique vendeur (plage 600–899).
    Vendor(u16),
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::InvalidAction => 401,
            ErrorCode::InvalidArgs => 402,
            ErrorCode::ActionFailed => 501,
            ErrorCode::ArgumentValueInvalid => 600,
            ErrorCode::ArgumentValueOutOfRange => 601,
            ErrorCode::OptionalActionNotImplemented => 602,
            ErrorCode::OutOfMemory => 603,
            ErrorCode::HumanInterventionRequired => 604,
            ErrorCode::StringArgumentTooLong => 605,
            ErrorCode::Vendor(code) => *code,
        }
    }

    /// Libellé standard du code.
    pub fn default_description(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAction => "Invalid Action",
            ErrorCode::InvalidArgs => "Invalid Args",
            ErrorCode::ActionFailed => "Action Failed",
            ErrorCode::ArgumentValueInvalid => "Argument Value Invalid",
            ErrorCode::ArgumentValueOutOfRange => "Argument Value Out of Range",
            ErrorCode::OptionalActionNotImplemented => "Optional Action Not Implemented",
            ErrorCode::OutOfMemory => "Out of Memory",
            ErrorCode::HumanInterventionRequired => "Human Intervention Required",
            ErrorCode::StringArgumentTooLong => "String Argument Too Long",
            ErrorCode::Vendor(_) => "Vendor Defined Error",
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            401 => ErrorCode::InvalidAction,
            402 => ErrorCode::InvalidArgs,
            501 => ErrorCode::ActionFailed,
            600 => ErrorCode::ArgumentValueInvalid,
            601 => ErrorCode::ArgumentValueOutOfRange,
            602 => ErrorCode::OptionalActionNotImplemented,
            603 => ErrorCode::OutOfMemory,
            604 => ErrorCode::HumanInterventionRequired,
            605 => ErrorCode::StringArgumentTooLong,
            other => ErrorCode::Vendor(other),
        }
    }
}

/// Fault UPnP : code et description lisibles par le control point.
#[derive(Debug, Clone, PartialEq)]
pub struct UpnpFault {
    pub code: ErrorCode,
    pub description: String,
}

impl UpnpFault {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            description: code.default_description().to_string(),
            code,
        }
    }

    pub fn with_description(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl std::fmt::Display for UpnpFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UPnPError {} ({})", self.code.code(), self.description)
    }
}

/// Construit l'enveloppe `<s:Fault>` d'un fault UPnP.
pub fn build_fault(fault: &UpnpFault) -> Result<String, xmltree::Error> {
    let mut fault_elem = Element::new("s:Fault");

    let mut faultcode = Element::new("faultcode");
    faultcode.children.push(XMLNode::Text("s:Client".to_string()));
    fault_elem.children.push(XMLNode::Element(faultcode));

    let mut faultstring = Element::new("faultstring");
    faultstring
        .children
        .push(XMLNode::Text("UPnPError".to_string()));
    fault_elem.children.push(XMLNode::Element(faultstring));

    let mut upnp_error = Element::new("UPnPError");
    upnp_error
        .attributes
        .insert("xmlns".to_string(), UPNP_CONTROL_NS.to_string());

    let mut error_code = Element::new("errorCode");
    error_code
        .children
        .push(XMLNode::Text(fault.code.code().to_string()));
    upnp_error.children.push(XMLNode::Element(error_code));

    let mut error_desc = Element::new("errorDescription");
    error_desc
        .children
        .push(XMLNode::Text(fault.description.clone()));
    upnp_error.children.push(XMLNode::Element(error_desc));

    let mut detail = Element::new("detail");
    detail.children.push(XMLNode::Element(upnp_error));
    fault_elem.children.push(XMLNode::Element(detail));

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(fault_elem));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), SOAP_ENVELOPE_NS.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new().perform_indent(true).indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8(buf).expect("emitter writes UTF-8"))
}

/// Extrait un fault UPnP d'une enveloppe de réponse, s'il y en a un.
pub fn parse_fault(xml: &[u8]) -> Option<UpnpFault> {
    let root = Element::parse(BufReader::new(xml)).ok()?;
    let body = find_child(&root, "Body")?;
    let fault = find_child(body, "Fault")?;
    let detail = find_child(fault, "detail")?;
    let upnp_error = find_child(detail, "UPnPError")?;

    let code_text = find_child(upnp_error, "errorCode")?.get_text()?;
    let code = code_text.trim().parse::<u16>().ok()?;

    let description = find_child(upnp_error, "errorDescription")
        .and_then(|e| e.get_text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    Some(UpnpFault {
        code: ErrorCode::from_code(code),
        description,
    })
}

fn find_child<'a>(parent: &'a Element, name: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name == name => Some(elem),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_round_trip() {
        let fault = UpnpFault::new(ErrorCode::InvalidArgs);
        let xml = build_fault(&fault).unwrap();

        assert!(xml.contains("<s:Fault>"));
        assert!(xml.contains("<errorCode>402</errorCode>"));
        assert!(xml.contains("<errorDescription>Invalid Args</errorDescription>"));

        let parsed = parse_fault(xml.as_bytes()).unwrap();
        assert_eq!(parsed, fault);
    }

    #[test]
    fn test_vendor_code() {
        let fault = UpnpFault::with_description(ErrorCode::Vendor(701), "Transition not available");
        let xml = build_fault(&fault).unwrap();
        let parsed = parse_fault(xml.as_bytes()).unwrap();
        assert_eq!(parsed.code.code(), 701);
        assert_eq!(parsed.description, "Transition not available");
    }

    #[test]
    fn test_parse_fault_on_success_response_is_none() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body><u:PlayResponse xmlns:u="urn:x:service:A:1"/></s:Body>
</s:Envelope>"#;
        assert!(parse_fault(xml.as_bytes()).is_none());
    }
}
