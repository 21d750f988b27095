//! Services : table d'actions, table de variables et chemins HTTP.

use std::collections::BTreeMap;

use crate::model::{Action, Argument, ServiceId, ServiceType, StateVariable};

/// Les trois chemins HTTP d'un service.
///
/// Pour un service local ils sont dérivés de la configuration au moment
/// de l'enregistrement du device ; pour un service distant ils viennent
/// du descripteur de device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServicePaths {
    pub scpd: String,
    pub control: String,
    pub event: String,
}

/// Service UPnP : identifié par (type de service, id de service).
///
/// Invariant : chaque argument d'action référence une variable d'état
/// déclarée par ce service (vérifié au binding pour les services locaux,
/// assaini à la lecture du SCPD pour les services distants).
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    service_type: ServiceType,
    service_id: ServiceId,
    paths: ServicePaths,
    actions: BTreeMap<String, Action>,
    state_variables: BTreeMap<String, StateVariable>,
}

impl Service {
    pub fn new(
        service_type: ServiceType,
        service_id: ServiceId,
        actions: Vec<Action>,
        state_variables: Vec<StateVariable>,
    ) -> Self {
        Self {
            service_type,
            service_id,
            paths: ServicePaths::default(),
            actions: actions.into_iter().map(|a| (a.name().to_string(), a)).collect(),
            state_variables: state_variables
                .into_iter()
                .map(|v| (v.name().to_string(), v))
                .collect(),
        }
    }

    /// Coquille sans actions ni variables, telle que lue dans un
    /// descripteur de device avant récupération du SCPD.
    pub fn shell(service_type: ServiceType, service_id: ServiceId, paths: ServicePaths) -> Self {
        Self {
            service_type,
            service_id,
            paths,
            actions: BTreeMap::new(),
            state_variables: BTreeMap::new(),
        }
    }

    pub fn with_paths(mut self, paths: ServicePaths) -> Self {
        self.paths = paths;
        self
    }

    /// Remplace les tables par le contenu d'un SCPD.
    pub fn with_scpd(
        mut self,
        actions: Vec<Action>,
        state_variables: Vec<StateVariable>,
    ) -> Self {
        self.actions = actions.into_iter().map(|a| (a.name().to_string(), a)).collect();
        self.state_variables = state_variables
            .into_iter()
            .map(|v| (v.name().to_string(), v))
            .collect();
        self
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.get(name)
    }

    pub fn state_variables(&self) -> impl Iterator<Item = &StateVariable> {
        self.state_variables.values()
    }

    /// Variables événementielles, dans l'ordre stable des noms.
    pub fn evented_variables(&self) -> impl Iterator<Item = &StateVariable> {
        self.state_variables.values().filter(|v| v.sends_events())
    }

    /// La variable liée d'un argument.
    pub fn related_variable(&self, argument: &Argument) -> Option<&StateVariable> {
        self.state_variables.get(argument.related_state_variable())
    }

    /// Un service AVTransport/RenderingControl événemente via LastChange.
    pub fn uses_last_change(&self) -> bool {
        self.state_variables
            .get("LastChange")
            .map(|v| v.sends_events())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, EventPolicy};
    use crate::types::StateVarType;

    fn sample() -> Service {
        Service::new(
            ServiceType::standard("AVTransport", 1),
            ServiceId::standard("AVTransport"),
            vec![Action::new(
                "Stop",
                vec![Argument::new(
                    "InstanceID",
                    Direction::In,
                    "A_ARG_TYPE_InstanceID",
                )],
            )],
            vec![StateVariable::new(
                "A_ARG_TYPE_InstanceID".to_string(),
                StateVarType::UI4,
                None,
                None,
                None,
                EventPolicy::default(),
            )],
        )
    }

    #[test]
    fn test_related_variable_lookup() {
        let svc = sample();
        let action = svc.action("Stop").unwrap();
        let arg = &action.arguments()[0];
        assert_eq!(
            svc.related_variable(arg).unwrap().name(),
            "A_ARG_TYPE_InstanceID"
        );
    }

    #[test]
    fn test_last_change_detection() {
        let svc = sample();
        assert!(!svc.uses_last_change());

        let lc = Service::new(
            ServiceType::standard("AVTransport", 1),
            ServiceId::standard("AVTransport"),
            vec![],
            vec![StateVariable::new(
                "LastChange".to_string(),
                StateVarType::String,
                None,
                None,
                None,
                EventPolicy {
                    send_events: true,
                    ..Default::default()
                },
            )],
        );
        assert!(lc.uses_last_change());
    }
}
