//! Codec des property sets GENA.
//!
//! `<e:propertyset><e:property><Var>valeur</Var></e:property>…</e:propertyset>`
//!
//! Pour LastChange, la valeur est elle-même un document XML : l'émetteur
//! l'échappe, le décodeur la restitue telle quelle.

use std::io::BufReader;

use thiserror::Error;
use xmltree::{Element, EmitterConfig, XMLNode};

const EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";

/// Erreur de décodage d'un property set.
#[derive(Debug, Error)]
pub enum GenaParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("document is not an <e:propertyset>")]
    NotAPropertySet,
}

/// Encode un property set ; une propriété par paire (nom, valeur).
pub fn encode_property_set(properties: &[(String, String)]) -> String {
    let mut root = Element::new("e:propertyset");
    root.attributes
        .insert("xmlns:e".to_string(), EVENT_NS.to_string());

    for (name, value) in properties {
        let mut var = Element::new(name);
        var.children.push(XMLNode::Text(value.clone()));
        let mut prop = Element::new("e:property");
        prop.children.push(XMLNode::Element(var));
        root.children.push(XMLNode::Element(prop));
    }

    let mut buf = Vec::new();
    let config = EmitterConfig::new().perform_indent(false);
    root.write_with_config(&mut buf, config)
        .expect("in-memory write cannot fail");
    String::from_utf8(buf).expect("emitter writes UTF-8")
}

/// Décode un property set en paires (nom, valeur), ordre du document.
pub fn decode_property_set(xml: &[u8]) -> Result<Vec<(String, String)>, GenaParseError> {
    let root = Element::parse(BufReader::new(xml))?;
    if root.name != "propertyset" {
        return Err(GenaParseError::NotAPropertySet);
    }

    let mut properties = Vec::new();
    for node in &root.children {
        let Some(prop) = node.as_element().filter(|e| e.name == "property") else {
            continue;
        };
        for child in &prop.children {
            if let Some(var) = child.as_element() {
                let value = var.get_text().map(|t| t.to_string()).unwrap_or_default();
                properties.push((var.name.clone(), value));
            }
        }
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let props = vec![
            ("TransportState".to_string(), "PLAYING".to_string()),
            ("CurrentTrack".to_string(), "3".to_string()),
        ];
        let xml = encode_property_set(&props);
        assert!(xml.contains("urn:schemas-upnp-org:event-1-0"));
        let decoded = decode_property_set(xml.as_bytes()).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_inner_xml_is_escaped() {
        let inner = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"><InstanceID val="0"><TransportState val="STOPPED"/></InstanceID></Event>"#;
        let props = vec![("LastChange".to_string(), inner.to_string())];
        let xml = encode_property_set(&props);
        assert!(xml.contains("&lt;Event"));
        let decoded = decode_property_set(xml.as_bytes()).unwrap();
        assert_eq!(decoded[0].1, inner);
    }

    #[test]
    fn test_rejects_non_property_set() {
        assert!(matches!(
            decode_property_set(b"<root/>"),
            Err(GenaParseError::NotAPropertySet)
        ));
    }
}
