//! Accumulateur LastChange d'AVTransport et RenderingControl.
//!
//! Ces services n'événementent pas leurs variables une à une : les
//! changements par instance logique s'accumulent, puis `fire` publie une
//! unique propriété `LastChange` contenant le delta sérialisé en XML et
//! vide l'accumulateur.

use std::collections::BTreeMap;
use std::sync::Mutex;

use xmltree::{Element, EmitterConfig, XMLNode};

/// Namespace du dialecte LastChange d'AVTransport.
pub const AVT_EVENT_NS: &str = "urn:schemas-upnp-org:metadata-1-0/AVT/";

/// Namespace du dialecte LastChange de RenderingControl.
pub const RCS_EVENT_NS: &str = "urn:schemas-upnp-org:metadata-1-0/RCS/";

/// Accumulateur : instance id → (variable → dernière valeur).
///
/// Le verrou interne est un moniteur au sens du contrat de verrouillage
/// du gestionnaire de service : `fire` n'est jamais appelé sans détenir
/// d'abord le verrou du gestionnaire.
#[derive(Debug)]
pub struct LastChange {
    namespace: String,
    state: Mutex<BTreeMap<u32, BTreeMap<String, String>>>,
}

impl LastChange {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Enregistre la dernière valeur d'une variable pour une instance.
    pub fn set(&self, instance_id: u32, variable: &str, value: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .entry(instance_id)
            .or_default()
            .insert(variable.to_string(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().is_empty()
    }

    /// Sérialise le delta accumulé puis vide l'accumulateur.
    ///
    /// Retourne `None` si rien n'a changé depuis le dernier `fire`.
    pub fn fire(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        if state.is_empty() {
            return None;
        }
        let snapshot = std::mem::take(&mut *state);
        drop(state);
        Some(serialize(&self.namespace, &snapshot))
    }
}

fn serialize(namespace: &str, state: &BTreeMap<u32, BTreeMap<String, String>>) -> String {
    let mut event = Element::new("Event");
    event
        .attributes
        .insert("xmlns".to_string(), namespace.to_string());

    for (instance_id, variables) in state {
        let mut instance = Element::new("InstanceID");
        instance
            .attributes
            .insert("val".to_string(), instance_id.to_string());
        for (name, value) in variables {
            let mut var = Element::new(name);
            var.attributes.insert("val".to_string(), value.clone());
            instance.children.push(XMLNode::Element(var));
        }
        event.children.push(XMLNode::Element(instance));
    }

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(false);
    event
        .write_with_config(&mut buf, config)
        .expect("in-memory write cannot fail");
    String::from_utf8(buf).expect("emitter writes UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_serializes_and_clears() {
        let lc = LastChange::new(AVT_EVENT_NS);
        lc.set(0, "TransportState", "STOPPED");
        lc.set(0, "CurrentTrack", "1");

        let xml = lc.fire().unwrap();
        assert!(xml.contains(r#"<InstanceID val="0">"#));
        assert!(xml.contains(r#"<TransportState val="STOPPED"#));
        assert!(xml.contains(r#"<CurrentTrack val="1"#));
        assert!(xml.contains(AVT_EVENT_NS));

        // Le delta est consommé.
        assert!(lc.fire().is_none());
        assert!(lc.is_empty());
    }

    #[test]
    fn test_latest_value_wins() {
        let lc = LastChange::new(RCS_EVENT_NS);
        lc.set(0, "Volume", "10");
        lc.set(0, "Volume", "25");
        let xml = lc.fire().unwrap();
        assert!(xml.contains(r#"<Volume val="25"#));
        assert!(!xml.contains(r#"val="10""#));
    }

    #[test]
    fn test_multiple_instances() {
        let lc = LastChange::new(AVT_EVENT_NS);
        lc.set(0, "TransportState", "PLAYING");
        lc.set(1, "TransportState", "STOPPED");
        let xml = lc.fire().unwrap();
        assert!(xml.contains(r#"<InstanceID val="0">"#));
        assert!(xml.contains(r#"<InstanceID val="1">"#));
    }
}
