//! SCPD : description des actions et variables d'un service.

use std::io::BufReader;

use tracing::warn;
use xmltree::{Element, XMLNode};

use crate::descriptor::{
    child_text, children_named, emit, push_text, spec_version, DescriptorError, SERVICE_NS,
};
use crate::model::{Action, Argument, Direction, EventPolicy, Service, StateVariable};
use crate::ranges::{AllowedValues, ValueRange};
use crate::types::StateVarType;

/// Contenu d'un SCPD, prêt à être fusionné dans une coquille de service.
#[derive(Debug, Clone, Default)]
pub struct Scpd {
    pub actions: Vec<Action>,
    pub state_variables: Vec<StateVariable>,
}

/// Écrit le SCPD d'un service.
pub fn write_scpd(service: &Service) -> Result<String, DescriptorError> {
    let mut root = Element::new("scpd");
    root.attributes
        .insert("xmlns".to_string(), SERVICE_NS.to_string());
    root.children.push(spec_version());

    let mut action_list = Element::new("actionList");
    for action in service.actions() {
        let mut action_elem = Element::new("action");
        push_text(&mut action_elem, "name", action.name());
        if !action.arguments().is_empty() {
            let mut arg_list = Element::new("argumentList");
            for arg in action.arguments() {
                let mut arg_elem = Element::new("argument");
                push_text(&mut arg_elem, "name", arg.name());
                push_text(&mut arg_elem, "direction", arg.direction().descriptor_name());
                if arg.is_retval() {
                    arg_elem.children.push(XMLNode::Element(Element::new("retval")));
                }
                push_text(
                    &mut arg_elem,
                    "relatedStateVariable",
                    arg.related_state_variable(),
                );
                arg_list.children.push(XMLNode::Element(arg_elem));
            }
            action_elem.children.push(XMLNode::Element(arg_list));
        }
        action_list.children.push(XMLNode::Element(action_elem));
    }
    if !action_list.children.is_empty() {
        root.children.push(XMLNode::Element(action_list));
    }

    let mut state_table = Element::new("serviceStateTable");
    for variable in service.state_variables() {
        state_table
            .children
            .push(XMLNode::Element(state_variable_element(variable)));
    }
    root.children.push(XMLNode::Element(state_table));

    emit(&root)
}

fn state_variable_element(variable: &StateVariable) -> Element {
    let mut elem = Element::new("stateVariable");
    elem.attributes.insert(
        "sendEvents".to_string(),
        if variable.sends_events() { "yes" } else { "no" }.to_string(),
    );
    push_text(&mut elem, "name", variable.name());
    push_text(&mut elem, "dataType", variable.var_type().descriptor_name());
    if let Some(default) = variable.default_value() {
        push_text(&mut elem, "defaultValue", &default.format());
    }
    if let Some(allowed) = variable.allowed_values() {
        let mut list = Element::new("allowedValueList");
        for value in allowed.values() {
            push_text(&mut list, "allowedValue", value);
        }
        elem.children.push(XMLNode::Element(list));
    }
    if let Some(range) = variable.allowed_range() {
        let mut range_elem = Element::new("allowedValueRange");
        push_text(&mut range_elem, "minimum", &range.minimum().format());
        push_text(&mut range_elem, "maximum", &range.maximum().format());
        if let Some(step) = range.step() {
            push_text(&mut range_elem, "step", &step.format());
        }
        elem.children.push(XMLNode::Element(range_elem));
    }
    elem
}

/// Lit un SCPD.
///
/// Strict sur le nom des actions, la direction des arguments, le nom et
/// le datatype des variables ; tolérant sur tout le reste. Une action
/// dont un argument référence une variable absente est écartée avec un
/// avertissement.
pub fn read_scpd(xml: &[u8]) -> Result<Scpd, DescriptorError> {
    let root = Element::parse(BufReader::new(xml))?;

    let mut state_variables = Vec::new();
    if let Some(table) = root.get_child("serviceStateTable") {
        for var_elem in children_named(table, "stateVariable") {
            state_variables.push(read_state_variable(var_elem)?);
        }
    }

    let mut actions = Vec::new();
    if let Some(list) = root.get_child("actionList") {
        for action_elem in children_named(list, "action") {
            let action = read_action(action_elem)?;
            let missing: Vec<&str> = action
                .arguments()
                .iter()
                .map(|a| a.related_state_variable())
                .filter(|name| !state_variables.iter().any(|v| v.name() == *name))
                .collect();
            if missing.is_empty() {
                actions.push(action);
            } else {
                warn!(
                    action = action.name(),
                    variables = ?missing,
                    "dropping action referencing undeclared state variables"
                );
            }
        }
    }

    Ok(Scpd {
        actions,
        state_variables,
    })
}

fn read_action(elem: &Element) -> Result<Action, DescriptorError> {
    let name = child_text(elem, "name").ok_or(DescriptorError::MissingField {
        element: "action",
        field: "name",
    })?;

    let mut arguments = Vec::new();
    if let Some(list) = elem.get_child("argumentList") {
        for arg_elem in children_named(list, "argument") {
            let arg_name = child_text(arg_elem, "name").ok_or(DescriptorError::MissingField {
                element: "argument",
                field: "name",
            })?;
            let direction_raw =
                child_text(arg_elem, "direction").ok_or(DescriptorError::MissingField {
                    element: "argument",
                    field: "direction",
                })?;
            let direction = Direction::from_descriptor_name(&direction_raw).ok_or(
                DescriptorError::InvalidField {
                    element: "argument",
                    field: "direction",
                    detail: direction_raw,
                },
            )?;
            let related = child_text(arg_elem, "relatedStateVariable").unwrap_or_default();
            let mut arg = Argument::new(arg_name, direction, related);
            if arg_elem.get_child("retval").is_some() {
                arg = arg.as_retval();
            }
            arguments.push(arg);
        }
    }
    Ok(Action::new(name, arguments))
}

fn read_state_variable(elem: &Element) -> Result<StateVariable, DescriptorError> {
    let name = child_text(elem, "name").ok_or(DescriptorError::MissingField {
        element: "stateVariable",
        field: "name",
    })?;
    let data_type_raw = child_text(elem, "dataType").ok_or(DescriptorError::MissingField {
        element: "stateVariable",
        field: "dataType",
    })?;
    let var_type = StateVarType::from_descriptor_name(&data_type_raw).ok_or(
        DescriptorError::InvalidField {
            element: "stateVariable",
            field: "dataType",
            detail: data_type_raw,
        },
    )?;

    let send_events = elem
        .attributes
        .get("sendEvents")
        .map(|v| v.eq_ignore_ascii_case("yes"))
        .unwrap_or(true); // défaut UPnP : yes

    let allowed_values = elem.get_child("allowedValueList").and_then(|list| {
        let values: Vec<String> = children_named(list, "allowedValue")
            .filter_map(|v| v.get_text().map(|t| t.trim().to_string()))
            .collect();
        match AllowedValues::new(values) {
            Ok(allowed) if !allowed.is_empty() => Some(allowed),
            Ok(_) => None,
            Err(e) => {
                warn!(variable = name.as_str(), error = %e, "ignoring invalid allowed value list");
                None
            }
        }
    });

    let allowed_range = elem.get_child("allowedValueRange").and_then(|range_elem| {
        let minimum = var_type.parse(&child_text(range_elem, "minimum")?).ok()?;
        let maximum = var_type.parse(&child_text(range_elem, "maximum")?).ok()?;
        let step = child_text(range_elem, "step").and_then(|s| var_type.parse(&s).ok());
        match ValueRange::new(minimum, maximum, step) {
            Ok(range) => Some(range),
            Err(e) => {
                warn!(variable = name.as_str(), error = %e, "ignoring invalid allowed value range");
                None
            }
        }
    });

    let default_value = child_text(elem, "defaultValue").and_then(|raw| {
        match var_type.parse(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(variable = name.as_str(), error = %e, "ignoring invalid default value");
                None
            }
        }
    });

    Ok(StateVariable::new(
        name,
        var_type,
        default_value,
        allowed_values,
        allowed_range,
        EventPolicy {
            send_events,
            ..Default::default()
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{ArgumentSpec, ServiceBuilder, StateVariableSpec};
    use crate::model::{ServiceId, ServiceType};
    use crate::types::StateValue;

    fn av_transport() -> Service {
        ServiceBuilder::new(
            ServiceType::standard("AVTransport", 1),
            ServiceId::standard("AVTransport"),
        )
        .state_variable(StateVariableSpec::new(
            "A_ARG_TYPE_InstanceID",
            StateVarType::UI4,
        ))
        .state_variable(
            StateVariableSpec::new("NrTracks", StateVarType::UI4)
                .range(StateValue::UI4(0), StateValue::UI4(4096))
                .default_value("0"),
        )
        .state_variable(
            StateVariableSpec::new("TransportState", StateVarType::String)
                .allowed_values(["STOPPED", "PLAYING"])
                .default_value("STOPPED")
                .send_events(true),
        )
        .action(
            "GetMediaInfo",
            vec![
                ArgumentSpec::input("InstanceID")
                    .related_state_variable("A_ARG_TYPE_InstanceID"),
                ArgumentSpec::output("NrTracks").related_state_variable("NrTracks"),
            ],
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_scpd_round_trip() {
        let service = av_transport();
        let xml = write_scpd(&service).unwrap();
        let scpd = read_scpd(xml.as_bytes()).unwrap();

        assert_eq!(scpd.actions.len(), 1);
        assert_eq!(scpd.state_variables.len(), 3);

        let action = &scpd.actions[0];
        assert_eq!(action.name(), "GetMediaInfo");
        assert_eq!(action.arguments().len(), 2);
        assert_eq!(action.arguments()[0].direction(), Direction::In);

        let tracks = scpd
            .state_variables
            .iter()
            .find(|v| v.name() == "NrTracks")
            .unwrap();
        assert!(tracks.allowed_range().is_some());
        assert_eq!(tracks.default_value().unwrap().format(), "0");

        let ts = scpd
            .state_variables
            .iter()
            .find(|v| v.name() == "TransportState")
            .unwrap();
        assert!(ts.sends_events());
        assert!(ts.allowed_values().unwrap().contains("PLAYING"));
    }

    #[test]
    fn test_scpd_writer_is_stable() {
        let service = av_transport();
        assert_eq!(write_scpd(&service).unwrap(), write_scpd(&service).unwrap());
    }

    #[test]
    fn test_action_without_direction_is_rejected() {
        let xml = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <actionList>
    <action>
      <name>Play</name>
      <argumentList>
        <argument><name>Speed</name><relatedStateVariable>X</relatedStateVariable></argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no"><name>X</name><dataType>string</dataType></stateVariable>
  </serviceStateTable>
</scpd>"#;
        assert!(matches!(
            read_scpd(xml.as_bytes()),
            Err(DescriptorError::MissingField {
                field: "direction",
                ..
            })
        ));
    }

    #[test]
    fn test_action_with_unknown_variable_is_dropped() {
        let xml = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <actionList>
    <action>
      <name>Play</name>
      <argumentList>
        <argument>
          <name>Speed</name>
          <direction>in</direction>
          <relatedStateVariable>Missing</relatedStateVariable>
        </argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no"><name>X</name><dataType>string</dataType></stateVariable>
  </serviceStateTable>
</scpd>"#;
        let scpd = read_scpd(xml.as_bytes()).unwrap();
        assert!(scpd.actions.is_empty());
        assert_eq!(scpd.state_variables.len(), 1);
    }
}
