//! Moteur de contrôle SOAP.
//!
//! Serveur : dispatch d'une requête POST de contrôle vers l'action d'un
//! service local — parsing strict de l'enveloppe, arguments typés par
//! leur variable liée, invocation sous le verrou du gestionnaire, fault
//! UPnP sinon (401 action inconnue, 402 arguments invalides, 501 échec,
//! 6xx vendeur).
//!
//! Client : construit l'enveloppe d'une invocation, POSTe sur l'URL de
//! contrôle, décode la réponse ou le fault dans l'invocation.

use anyhow::Context;
use tracing::{debug, warn};
use url::Url;

use crate::model::{Service, ServiceType};
use crate::service::ServiceManager;
use crate::soap::{
    build_action_request, build_action_response, build_fault, parse_action_request,
    parse_action_response, parse_fault, parse_soap_action_header, soap_action_header, ErrorCode,
    UpnpFault,
};
use crate::transport::{
    StreamClient, StreamMethod, StreamRequestMessage, StreamResponseMessage,
};
use crate::types::StateValue;

const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

// ---- Serveur -------------------------------------------------------------

/// Traite une requête SOAP sur l'URL de contrôle d'un service local.
pub fn handle_control_request(
    request: &StreamRequestMessage,
    manager: &ServiceManager,
) -> StreamResponseMessage {
    match control_response(request, manager) {
        Ok(response) => response,
        Err(fault) => fault_response(&fault),
    }
}

fn control_response(
    request: &StreamRequestMessage,
    manager: &ServiceManager,
) -> Result<StreamResponseMessage, UpnpFault> {
    let service = manager.service();
    let service_type = service.service_type().to_string();

    // SOAPACTION: "<service-type>#<action>"
    let (header_type, header_action) = request
        .headers
        .get("SOAPACTION")
        .and_then(parse_soap_action_header)
        .ok_or_else(|| UpnpFault::new(ErrorCode::InvalidAction))?;
    if header_type != service_type {
        return Err(UpnpFault::with_description(
            ErrorCode::InvalidAction,
            format!("service type mismatch: {header_type}"),
        ));
    }

    let call = parse_action_request(&request.body).map_err(|e| {
        debug!(error = %e, "unparsable control envelope");
        UpnpFault::new(ErrorCode::InvalidArgs)
    })?;
    if call.name != header_action {
        return Err(UpnpFault::with_description(
            ErrorCode::InvalidAction,
            format!("envelope action '{}' does not match SOAPACTION", call.name),
        ));
    }
    if let Some(ns) = &call.service_type {
        if *ns != service_type {
            return Err(UpnpFault::new(ErrorCode::InvalidAction));
        }
    }

    let action = service
        .action(&call.name)
        .ok_or_else(|| UpnpFault::new(ErrorCode::InvalidAction))?;

    // Chaque argument d'entrée est parsé par le datatype de sa variable
    // liée ; absence ou valeur inconvertible → 402.
    let mut inputs: Vec<(String, StateValue)> = Vec::new();
    for argument in action.inputs() {
        let raw = call
            .argument(argument.name())
            .ok_or_else(|| UpnpFault::new(ErrorCode::InvalidArgs))?;
        let variable = service
            .related_variable(argument)
            .ok_or_else(|| UpnpFault::new(ErrorCode::ActionFailed))?;
        let value = variable.parse(raw).map_err(|e| {
            debug!(argument = argument.name(), error = %e, "argument rejected");
            UpnpFault::new(ErrorCode::InvalidArgs)
        })?;
        inputs.push((argument.name().to_string(), value));
    }

    let results = manager
        .execute(action, &inputs)
        .map_err(|e| UpnpFault::with_description(e.code, e.description))?;

    // Sorties sérialisées dans l'ordre déclaré de l'action.
    let mut outputs: Vec<(String, String)> = Vec::new();
    for argument in action.outputs() {
        let value = results
            .iter()
            .find(|(name, _)| name == argument.name())
            .map(|(_, value)| value.format())
            .ok_or_else(|| {
                warn!(
                    action = action.name(),
                    argument = argument.name(),
                    "handler did not produce a declared output"
                );
                UpnpFault::new(ErrorCode::ActionFailed)
            })?;
        outputs.push((argument.name().to_string(), value));
    }

    let body = build_action_response(&service_type, action.name(), &outputs)
        .map_err(|_| UpnpFault::new(ErrorCode::ActionFailed))?;
    Ok(StreamResponseMessage::ok_xml(body))
}

/// HTTP 500 + enveloppe `<s:Fault>`.
fn fault_response(fault: &UpnpFault) -> StreamResponseMessage {
    let body = build_fault(fault).unwrap_or_default();
    StreamResponseMessage::new(500)
        .with_header("CONTENT-TYPE", CONTENT_TYPE_XML)
        .with_body(body.into_bytes())
}

// ---- Client --------------------------------------------------------------

/// Invocation d'une action distante : entrées, puis sorties ou fault.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub service_type: ServiceType,
    pub control_url: Url,
    pub action: String,
    pub inputs: Vec<(String, String)>,
    pub outputs: Vec<(String, String)>,
    pub fault: Option<UpnpFault>,
}

impl ActionInvocation {
    pub fn new(service_type: ServiceType, control_url: Url, action: &str) -> Self {
        Self {
            service_type,
            control_url,
            action: action.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            fault: None,
        }
    }

    /// Construit l'invocation depuis les métadonnées d'un service
    /// distant, l'URL de contrôle résolue contre `base`.
    pub fn for_service(service: &Service, base: &Url, action: &str) -> anyhow::Result<Self> {
        let control_url = base
            .join(&service.paths().control)
            .context("unresolvable control URL")?;
        Ok(Self::new(service.service_type().clone(), control_url, action))
    }

    pub fn input(mut self, name: &str, value: impl Into<String>) -> Self {
        self.inputs.push((name.to_string(), value.into()));
        self
    }

    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn succeeded(&self) -> bool {
        self.fault.is_none()
    }
}

/// Exécute une invocation : POST, puis décodage de la réponse ou du
/// fault. Les timeouts HTTP remontent en échec d'invocation.
pub fn invoke_action(
    client: &dyn StreamClient,
    invocation: &mut ActionInvocation,
) -> anyhow::Result<()> {
    let service_type = invocation.service_type.to_string();
    let body = build_action_request(&service_type, &invocation.action, &invocation.inputs)
        .context("failed to build SOAP request")?;

    debug!(
        url = invocation.control_url.as_str(),
        action = invocation.action.as_str(),
        service_type = service_type.as_str(),
        "sending SOAP request"
    );

    let request =
        StreamRequestMessage::new(StreamMethod::Post, invocation.control_url.as_str())
            .with_header("CONTENT-TYPE", CONTENT_TYPE_XML)
            .with_header(
                "SOAPACTION",
                soap_action_header(&service_type, &invocation.action),
            )
            .with_body(body.into_bytes());

    let response = client.request(&request).with_context(|| {
        format!(
            "HTTP error invoking {} on {}",
            invocation.action, invocation.control_url
        )
    })?;

    if response.is_success() {
        let call = parse_action_response(&response.body)
            .context("unparsable SOAP action response")?;
        invocation.outputs = call.arguments;
        invocation.fault = None;
        return Ok(());
    }

    match parse_fault(&response.body) {
        Some(fault) => {
            debug!(
                action = invocation.action.as_str(),
                code = fault.code.code(),
                "action answered a UPnP fault"
            );
            invocation.fault = Some(fault);
            Ok(())
        }
        None => anyhow::bail!(
            "action {} failed with HTTP {} and no UPnP fault",
            invocation.action,
            response.status
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{ArgumentSpec, ServiceBuilder, StateVariableSpec};
    use crate::model::{Action, ServiceId, Udn};
    use crate::service::{ActionError, ServiceHandler, ServiceKey};
    use crate::transport::TransportError;
    use crate::types::StateVarType;
    use std::sync::Arc;

    struct MediaInfo;

    impl ServiceHandler for MediaInfo {
        fn invoke(
            &mut self,
            action: &Action,
            inputs: &[(String, StateValue)],
        ) -> Result<Vec<(String, StateValue)>, ActionError> {
            match action.name() {
                "GetMediaInfo" => {
                    assert!(matches!(inputs[0].1, StateValue::UI4(_)));
                    Ok(vec![("NrTracks".to_string(), StateValue::UI4(12))])
                }
                "Fail" => Err(ActionError::vendor(701, "Transition not available")),
                _ => Err(ActionError::new(ErrorCode::InvalidAction)),
            }
        }
        fn read_state_variable(&self, _name: &str) -> Option<StateValue> {
            None
        }
    }

    fn manager() -> ServiceManager {
        let service = Arc::new(
            ServiceBuilder::new(
                ServiceType::standard("AVTransport", 1),
                ServiceId::standard("AVTransport"),
            )
            .state_variable(StateVariableSpec::new(
                "A_ARG_TYPE_InstanceID",
                StateVarType::UI4,
            ))
            .state_variable(StateVariableSpec::new("NrTracks", StateVarType::UI4))
            .action(
                "GetMediaInfo",
                vec![
                    ArgumentSpec::input("InstanceID")
                        .related_state_variable("A_ARG_TYPE_InstanceID"),
                    ArgumentSpec::output("NrTracks").related_state_variable("NrTracks"),
                ],
            )
            .action(
                "Fail",
                vec![ArgumentSpec::input("InstanceID")
                    .related_state_variable("A_ARG_TYPE_InstanceID")],
            )
            .build()
            .unwrap(),
        );
        let key: ServiceKey = (
            "uuid:local".parse::<Udn>().unwrap(),
            ServiceId::standard("AVTransport"),
        );
        ServiceManager::new(service, key, Box::new(MediaInfo)).unwrap()
    }

    const ST: &str = "urn:schemas-upnp-org:service:AVTransport:1";

    fn control_request(action: &str, body: String) -> StreamRequestMessage {
        StreamRequestMessage::new(StreamMethod::Post, "/dev/uuid:local/svc/AVTransport/control")
            .with_header("SOAPACTION", soap_action_header(ST, action))
            .with_header("CONTENT-TYPE", CONTENT_TYPE_XML)
            .with_body(body.into_bytes())
    }

    #[test]
    fn test_successful_invocation() {
        let manager = manager();
        let body = build_action_request(
            ST,
            "GetMediaInfo",
            &[("InstanceID".to_string(), "0".to_string())],
        )
        .unwrap();
        let response = handle_control_request(&control_request("GetMediaInfo", body), &manager);

        assert_eq!(response.status, 200);
        let call = parse_action_response(&response.body).unwrap();
        assert_eq!(call.name, "GetMediaInfo");
        assert_eq!(call.argument("NrTracks"), Some("12"));
    }

    #[test]
    fn test_invalid_argument_is_402() {
        let manager = manager();
        let body = build_action_request(
            ST,
            "GetMediaInfo",
            &[("InstanceID".to_string(), "abc".to_string())],
        )
        .unwrap();
        let response = handle_control_request(&control_request("GetMediaInfo", body), &manager);

        assert_eq!(response.status, 500);
        let fault = parse_fault(&response.body).unwrap();
        assert_eq!(fault.code, ErrorCode::InvalidArgs);
        assert_eq!(fault.description, "Invalid Args");
    }

    #[test]
    fn test_missing_argument_is_402() {
        let manager = manager();
        let body = build_action_request(ST, "GetMediaInfo", &[]).unwrap();
        let response = handle_control_request(&control_request("GetMediaInfo", body), &manager);
        assert_eq!(response.status, 500);
        assert_eq!(
            parse_fault(&response.body).unwrap().code,
            ErrorCode::InvalidArgs
        );
    }

    #[test]
    fn test_unknown_action_is_401() {
        let manager = manager();
        let body = build_action_request(ST, "Levitate", &[]).unwrap();
        let response = handle_control_request(&control_request("Levitate", body), &manager);
        assert_eq!(response.status, 500);
        assert_eq!(
            parse_fault(&response.body).unwrap().code,
            ErrorCode::InvalidAction
        );
    }

    #[test]
    fn test_vendor_failure_is_preserved() {
        let manager = manager();
        let body = build_action_request(
            ST,
            "Fail",
            &[("InstanceID".to_string(), "0".to_string())],
        )
        .unwrap();
        let response = handle_control_request(&control_request("Fail", body), &manager);
        let fault = parse_fault(&response.body).unwrap();
        assert_eq!(fault.code.code(), 701);
        assert_eq!(fault.description, "Transition not available");
    }

    #[test]
    fn test_missing_soapaction_header_is_401() {
        let manager = manager();
        let body = build_action_request(ST, "GetMediaInfo", &[]).unwrap();
        let request = StreamRequestMessage::new(StreamMethod::Post, "/control")
            .with_body(body.into_bytes());
        let response = handle_control_request(&request, &manager);
        assert_eq!(
            parse_fault(&response.body).unwrap().code,
            ErrorCode::InvalidAction
        );
    }

    /// Control point → serveur local, aller-retour complet en mémoire.
    struct LoopbackClient {
        manager: ServiceManager,
    }

    impl StreamClient for LoopbackClient {
        fn request(
            &self,
            request: &StreamRequestMessage,
        ) -> Result<StreamResponseMessage, TransportError> {
            Ok(handle_control_request(request, &self.manager))
        }
    }

    #[test]
    fn test_client_round_trip() {
        let client = LoopbackClient { manager: manager() };
        let mut invocation = ActionInvocation::new(
            ServiceType::standard("AVTransport", 1),
            Url::parse("http://10.0.0.9:8080/control").unwrap(),
            "GetMediaInfo",
        )
        .input("InstanceID", "0");

        invoke_action(&client, &mut invocation).unwrap();
        assert!(invocation.succeeded());
        assert_eq!(invocation.output("NrTracks"), Some("12"));
    }

    #[test]
    fn test_client_surfaces_fault() {
        let client = LoopbackClient { manager: manager() };
        let mut invocation = ActionInvocation::new(
            ServiceType::standard("AVTransport", 1),
            Url::parse("http://10.0.0.9:8080/control").unwrap(),
            "Fail",
        )
        .input("InstanceID", "0");

        invoke_action(&client, &mut invocation).unwrap();
        assert!(!invocation.succeeded());
        assert_eq!(invocation.fault.as_ref().unwrap().code.code(), 701);
    }
}
