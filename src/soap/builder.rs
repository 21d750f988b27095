//! Construction des enveloppes SOAP.

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::soap::{SOAP_ENCODING, SOAP_ENVELOPE_NS};

/// Construit la requête d'invocation d'une action.
///
/// Les arguments sont émis dans l'ordre fourni, qui doit être l'ordre
/// de déclaration des arguments d'entrée de l'action.
pub fn build_action_request(
    service_type: &str,
    action: &str,
    arguments: &[(String, String)],
) -> Result<String, xmltree::Error> {
    build_envelope(service_type, action, arguments)
}

/// Construit la réponse d'une action (`<u:ActionNameResponse>`).
pub fn build_action_response(
    service_type: &str,
    action: &str,
    arguments: &[(String, String)],
) -> Result<String, xmltree::Error> {
    build_envelope(service_type, &format!("{action}Response"), arguments)
}

fn build_envelope(
    service_type: &str,
    body_name: &str,
    arguments: &[(String, String)],
) -> Result<String, xmltree::Error> {
    let mut action_elem = Element::new(&format!("u:{body_name}"));
    action_elem
        .attributes
        .insert("xmlns:u".to_string(), service_type.to_string());
    for (name, value) in arguments {
        let mut arg = Element::new(name);
        arg.children.push(XMLNode::Text(value.clone()));
        action_elem.children.push(XMLNode::Element(arg));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(action_elem));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), SOAP_ENVELOPE_NS.to_string());
    envelope
        .attributes
        .insert("s:encodingStyle".to_string(), SOAP_ENCODING.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new().perform_indent(true).indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8(buf).expect("emitter writes UTF-8"))
}
