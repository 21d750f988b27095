//! Parsing des enveloppes SOAP.

use std::io::BufReader;

use thiserror::Error;
use xmltree::{Element, XMLNode};

use crate::soap::SOAP_ENVELOPE_NS;

/// Invocation extraite d'une enveloppe : nom d'action, namespace du
/// service et arguments ordonnés.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub service_type: Option<String>,
    pub arguments: Vec<(String, String)>,
}

impl ActionCall {
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Erreur de parsing SOAP.
#[derive(Debug, Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("missing SOAP Envelope")]
    MissingEnvelope,

    #[error("unexpected envelope namespace '{0}'")]
    WrongNamespace(String),

    #[error("missing SOAP Body")]
    MissingBody,

    #[error("no action element in SOAP Body")]
    NoAction,

    #[error("SOAP Body carries more than one child element")]
    MultipleBodyChildren,

    #[error("'{0}' is not an action response element")]
    NotAResponse(String),
}

/// Parse une requête d'action (corps d'un POST de contrôle).
pub fn parse_action_request(xml: &[u8]) -> Result<ActionCall, SoapParseError> {
    extract_single_body_child(xml).map(element_to_call)
}

/// Parse une réponse d'action et retire le suffixe `Response`.
pub fn parse_action_response(xml: &[u8]) -> Result<ActionCall, SoapParseError> {
    let elem = extract_single_body_child(xml)?;
    let mut call = element_to_call(elem);
    match call.name.strip_suffix("Response") {
        Some(base) if !base.is_empty() => {
            call.name = base.to_string();
            Ok(call)
        }
        _ => Err(SoapParseError::NotAResponse(call.name)),
    }
}

fn extract_single_body_child(xml: &[u8]) -> Result<Element, SoapParseError> {
    let root = Element::parse(BufReader::new(xml))?;

    if root.name != "Envelope" {
        return Err(SoapParseError::MissingEnvelope);
    }
    if let Some(ns) = &root.namespace {
        if ns != SOAP_ENVELOPE_NS {
            return Err(SoapParseError::WrongNamespace(ns.clone()));
        }
    }

    let body = root
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name == "Body"))
        .ok_or(SoapParseError::MissingBody)?;

    let mut children = body.children.iter().filter_map(XMLNode::as_element);
    let first = children.next().ok_or(SoapParseError::NoAction)?;
    if children.next().is_some() {
        return Err(SoapParseError::MultipleBodyChildren);
    }
    Ok(first.clone())
}

fn element_to_call(elem: Element) -> ActionCall {
    let arguments = elem
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|arg| {
            (
                arg.name.clone(),
                arg.get_text().map(|t| t.to_string()).unwrap_or_default(),
            )
        })
        .collect();
    ActionCall {
        name: elem.name,
        service_type: elem.namespace,
        arguments,
    }
}
