//! # Codec de descripteurs XML
//!
//! Lecture et écriture des descripteurs de device et des SCPD.
//!
//! Le lecteur est tolérant : éléments inconnus et ordre des enfants sont
//! ignorés, seuls les champs obligatoires (UDN, types, nom d'action,
//! direction d'argument) sont stricts. L'écrivain produit un document
//! stable d'une exécution à l'autre : ordre d'éléments fixe, UTF-8 sans
//! BOM.

mod device_desc;
mod errors;
mod scpd;

pub use device_desc::{read_device_descriptor, write_device_descriptor};
pub use errors::DescriptorError;
pub use scpd::{read_scpd, write_scpd, Scpd};

use xmltree::{Element, EmitterConfig, XMLNode};

pub(crate) const DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
pub(crate) const SERVICE_NS: &str = "urn:schemas-upnp-org:service-1-0";

/// Texte du premier enfant portant ce nom local, s'il existe.
pub(crate) fn child_text(elem: &Element, name: &str) -> Option<String> {
    elem.get_child(name)
        .and_then(|c| c.get_text())
        .map(|t| t.trim().to_string())
}

/// Crée `<name>text</name>`.
pub(crate) fn text_element(name: &str, text: &str) -> XMLNode {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    XMLNode::Element(elem)
}

/// Ajoute `<name>text</name>` à `parent`.
pub(crate) fn push_text(parent: &mut Element, name: &str, text: &str) {
    parent.children.push(text_element(name, text));
}

/// Ajoute `<name>text</name>` si `text` est présent.
pub(crate) fn push_opt_text(parent: &mut Element, name: &str, text: Option<&str>) {
    if let Some(text) = text {
        push_text(parent, name, text);
    }
}

/// Élément `<specVersion>` commun aux deux descripteurs.
pub(crate) fn spec_version() -> XMLNode {
    let mut spec = Element::new("specVersion");
    push_text(&mut spec, "major", "1");
    push_text(&mut spec, "minor", "0");
    XMLNode::Element(spec)
}

/// Sérialisation stable d'un document.
pub(crate) fn emit(root: &Element) -> Result<String, DescriptorError> {
    let config = EmitterConfig::new().perform_indent(true).indent_string("  ");
    let mut buf = Vec::new();
    root.write_with_config(&mut buf, config)
        .map_err(DescriptorError::Write)?;
    String::from_utf8(buf).map_err(|_| DescriptorError::NotUtf8)
}

/// Éléments enfants portant un nom local donné.
pub(crate) fn children_named<'a>(
    elem: &'a Element,
    name: &'a str,
) -> impl Iterator<Item = &'a Element> {
    elem.children.iter().filter_map(move |node| match node {
        XMLNode::Element(e) if e.name == name => Some(e),
        _ => None,
    })
}
