//! # Binder de services locaux
//!
//! Projette une description déclarative côté hôte en un [`Service`]
//! validé. Toute violation des règles de binding est fatale à
//! l'enregistrement et nomme l'élément fautif.
//!
//! ## Règles
//!
//! - La variable liée d'un argument vaut `A_ARG_TYPE_<Argument>` si elle
//!   n'est pas fournie ; son absence est une erreur.
//! - Valeurs autorisées : type chaîne uniquement ; la valeur par défaut
//!   doit en faire partie.
//! - Plage : types numériques uniquement ; la valeur par défaut doit y
//!   tomber.
//! - `eventMinimumDelta` ne s'applique qu'aux entiers ; sur un autre type
//!   il est ignoré avec un avertissement au binding.
//! - Au plus un argument de sortie peut être marqué valeur de retour.

use thiserror::Error;
use tracing::warn;

use crate::model::{
    Action, Argument, Direction, EventPolicy, Service, ServiceId, ServiceType, StateVariable,
};
use crate::ranges::{AllowedValues, ValueRange, MAX_ALLOWED_VALUE_LEN};
use crate::types::{StateValue, StateVarType};

/// Échec de binding d'un service local.
#[derive(Debug, Clone, Error)]
pub enum LocalServiceBindingError {
    #[error("state variable '{variable}': allowed values require the string datatype")]
    AllowedValuesOnNonString { variable: String },

    #[error("state variable '{variable}': allowed value '{value}' exceeds {MAX_ALLOWED_VALUE_LEN} characters")]
    AllowedValueTooLong { variable: String, value: String },

    #[error("state variable '{variable}': range requires a numeric datatype")]
    RangeOnNonNumeric { variable: String },

    #[error("state variable '{variable}': invalid range: {detail}")]
    InvalidRange { variable: String, detail: String },

    #[error("state variable '{variable}': default value '{value}' is invalid: {detail}")]
    InvalidDefault {
        variable: String,
        value: String,
        detail: String,
    },

    #[error("action '{action}', argument '{argument}': no state variable '{variable}' in this service")]
    MissingRelatedVariable {
        action: String,
        argument: String,
        variable: String,
    },

    #[error("action '{action}': more than one output argument is flagged as return value")]
    MultipleReturnValues { action: String },

    #[error("action '{action}', argument '{argument}': return value flag on an input argument")]
    ReturnValueOnInput { action: String, argument: String },

    #[error("state variable '{variable}': evented variable has no readable current value")]
    MissingAccessor { variable: String },

    #[error("no handler registered for service '{service}'")]
    MissingHandler { service: String },

    #[error("service has no state variable and no action")]
    EmptyService,
}

/// Spécification d'une variable d'état en cours de binding.
#[derive(Debug, Clone)]
pub struct StateVariableSpec {
    name: String,
    var_type: StateVarType,
    default_value: Option<String>,
    allowed_values: Option<Vec<String>>,
    range: Option<(StateValue, StateValue, Option<StateValue>)>,
    send_events: bool,
    max_rate_ms: Option<u64>,
    min_delta: Option<i64>,
}

impl StateVariableSpec {
    pub fn new(name: &str, var_type: StateVarType) -> Self {
        Self {
            name: name.to_string(),
            var_type,
            default_value: None,
            allowed_values: None,
            range: None,
            send_events: false,
            max_rate_ms: None,
            min_delta: None,
        }
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn range(mut self, minimum: StateValue, maximum: StateValue) -> Self {
        self.range = Some((minimum, maximum, None));
        self
    }

    pub fn range_with_step(
        mut self,
        minimum: StateValue,
        maximum: StateValue,
        step: StateValue,
    ) -> Self {
        self.range = Some((minimum, maximum, Some(step)));
        self
    }

    pub fn send_events(mut self, enabled: bool) -> Self {
        self.send_events = enabled;
        self
    }

    /// Écart minimal entre deux événements pour cette variable, en ms.
    pub fn event_maximum_rate_ms(mut self, rate: u64) -> Self {
        self.max_rate_ms = Some(rate);
        self
    }

    /// Delta minimal avant événement (entiers uniquement).
    pub fn event_minimum_delta(mut self, delta: i64) -> Self {
        self.min_delta = Some(delta);
        self
    }

    fn bind(self) -> Result<StateVariable, LocalServiceBindingError> {
        let name = self.name.clone();

        let allowed = match self.allowed_values {
            Some(values) => {
                if !self.var_type.is_string() {
                    return Err(LocalServiceBindingError::AllowedValuesOnNonString {
                        variable: name,
                    });
                }
                if let Some(value) = values.iter().find(|v| v.len() > MAX_ALLOWED_VALUE_LEN) {
                    return Err(LocalServiceBindingError::AllowedValueTooLong {
                        variable: name,
                        value: value.clone(),
                    });
                }
                Some(AllowedValues::new(values).expect("lengths checked above"))
            }
            None => None,
        };

        let range = match self.range {
            Some((minimum, maximum, step)) => {
                if !self.var_type.is_numeric() {
                    return Err(LocalServiceBindingError::RangeOnNonNumeric { variable: name });
                }
                Some(ValueRange::new(minimum, maximum, step).map_err(|e| {
                    LocalServiceBindingError::InvalidRange {
                        variable: name.clone(),
                        detail: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let min_delta = match self.min_delta {
            Some(delta) if !self.var_type.is_integer() => {
                // La sémantique du delta n'est définie que pour les entiers.
                warn!(
                    variable = name.as_str(),
                    "eventMinimumDelta ignored on non-integer datatype"
                );
                None
            }
            other => other,
        };

        let default_value = match self.default_value {
            Some(raw) => {
                let parsed = self.var_type.parse(&raw).map_err(|e| {
                    LocalServiceBindingError::InvalidDefault {
                        variable: name.clone(),
                        value: raw.clone(),
                        detail: e.to_string(),
                    }
                })?;
                if let Some(allowed) = &allowed {
                    if !allowed.contains(&raw) {
                        return Err(LocalServiceBindingError::InvalidDefault {
                            variable: name,
                            value: raw,
                            detail: "not in the allowed value list".to_string(),
                        });
                    }
                }
                if let Some(range) = &range {
                    if !range.is_in_range(&parsed) {
                        return Err(LocalServiceBindingError::InvalidDefault {
                            variable: name,
                            value: raw,
                            detail: "outside the allowed range".to_string(),
                        });
                    }
                }
                Some(parsed)
            }
            None => None,
        };

        Ok(StateVariable::new(
            self.name,
            self.var_type,
            default_value,
            allowed,
            range,
            EventPolicy {
                send_events: self.send_events,
                max_rate_ms: self.max_rate_ms,
                min_delta,
            },
        ))
    }
}

/// Spécification d'un argument d'action.
#[derive(Debug, Clone)]
pub struct ArgumentSpec {
    name: String,
    direction: Direction,
    related: Option<String>,
    retval: bool,
}

impl ArgumentSpec {
    pub fn input(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::In,
            related: None,
            retval: false,
        }
    }

    pub fn output(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::Out,
            related: None,
            retval: false,
        }
    }

    pub fn related_state_variable(mut self, variable: &str) -> Self {
        self.related = Some(variable.to_string());
        self
    }

    pub fn retval(mut self) -> Self {
        self.retval = true;
        self
    }
}

/// Constructeur de [`Service`] appliquant les règles de binding.
#[derive(Debug)]
pub struct ServiceBuilder {
    service_type: ServiceType,
    service_id: ServiceId,
    variables: Vec<StateVariableSpec>,
    actions: Vec<(String, Vec<ArgumentSpec>)>,
}

impl ServiceBuilder {
    pub fn new(service_type: ServiceType, service_id: ServiceId) -> Self {
        Self {
            service_type,
            service_id,
            variables: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn state_variable(mut self, spec: StateVariableSpec) -> Self {
        self.variables.push(spec);
        self
    }

    pub fn action(mut self, name: &str, arguments: Vec<ArgumentSpec>) -> Self {
        self.actions.push((name.to_string(), arguments));
        self
    }

    pub fn build(self) -> Result<Service, LocalServiceBindingError> {
        if self.variables.is_empty() && self.actions.is_empty() {
            return Err(LocalServiceBindingError::EmptyService);
        }

        let variables: Vec<StateVariable> = self
            .variables
            .into_iter()
            .map(StateVariableSpec::bind)
            .collect::<Result<_, _>>()?;

        let mut actions = Vec::new();
        for (action_name, args) in self.actions {
            let mut bound_args = Vec::new();
            let mut retval_seen = false;
            for spec in args {
                if spec.retval {
                    if spec.direction == Direction::In {
                        return Err(LocalServiceBindingError::ReturnValueOnInput {
                            action: action_name,
                            argument: spec.name,
                        });
                    }
                    if retval_seen {
                        return Err(LocalServiceBindingError::MultipleReturnValues {
                            action: action_name,
                        });
                    }
                    retval_seen = true;
                }
                let related = spec
                    .related
                    .unwrap_or_else(|| format!("A_ARG_TYPE_{}", spec.name));
                if !variables.iter().any(|v| v.name() == related) {
                    return Err(LocalServiceBindingError::MissingRelatedVariable {
                        action: action_name,
                        argument: spec.name,
                        variable: related,
                    });
                }
                let mut arg = Argument::new(spec.name, spec.direction, related);
                if spec.retval {
                    arg = arg.as_retval();
                }
                bound_args.push(arg);
            }
            actions.push(Action::new(action_name, bound_args));
        }

        Ok(Service::new(
            self.service_type,
            self.service_id,
            actions,
            variables,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ServiceBuilder {
        ServiceBuilder::new(
            ServiceType::standard("RenderingControl", 1),
            ServiceId::standard("RenderingControl"),
        )
    }

    #[test]
    fn test_related_variable_defaulting() {
        let svc = builder()
            .state_variable(StateVariableSpec::new(
                "A_ARG_TYPE_InstanceID",
                StateVarType::UI4,
            ))
            .action("Stop", vec![ArgumentSpec::input("InstanceID")])
            .build()
            .unwrap();

        let arg = &svc.action("Stop").unwrap().arguments()[0];
        assert_eq!(arg.related_state_variable(), "A_ARG_TYPE_InstanceID");
    }

    #[test]
    fn test_missing_related_variable_names_offender() {
        let err = builder()
            .state_variable(StateVariableSpec::new("Volume", StateVarType::UI2))
            .action("Stop", vec![ArgumentSpec::input("InstanceID")])
            .build()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Stop"));
        assert!(message.contains("InstanceID"));
        assert!(message.contains("A_ARG_TYPE_InstanceID"));
    }

    #[test]
    fn test_default_must_be_allowed() {
        let err = builder()
            .state_variable(
                StateVariableSpec::new("Mode", StateVarType::String)
                    .allowed_values(["NORMAL", "SHUFFLE"])
                    .default_value("RANDOM"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LocalServiceBindingError::InvalidDefault { .. }
        ));
    }

    #[test]
    fn test_default_must_be_in_range() {
        let err = builder()
            .state_variable(
                StateVariableSpec::new("Volume", StateVarType::UI2)
                    .range(StateValue::UI2(0), StateValue::UI2(100))
                    .default_value("150"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LocalServiceBindingError::InvalidDefault { .. }
        ));
    }

    #[test]
    fn test_allowed_values_require_string() {
        let err = builder()
            .state_variable(
                StateVariableSpec::new("Volume", StateVarType::UI2).allowed_values(["10", "20"]),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LocalServiceBindingError::AllowedValuesOnNonString { .. }
        ));
    }

    #[test]
    fn test_min_delta_dropped_on_float() {
        let svc = builder()
            .state_variable(
                StateVariableSpec::new("Level", StateVarType::R8)
                    .send_events(true)
                    .event_minimum_delta(2),
            )
            .build()
            .unwrap();
        assert_eq!(
            svc.state_variable("Level").unwrap().event_policy().min_delta,
            None
        );
    }

    #[test]
    fn test_single_retval() {
        let err = builder()
            .state_variable(StateVariableSpec::new("A_ARG_TYPE_A", StateVarType::String))
            .state_variable(StateVariableSpec::new("A_ARG_TYPE_B", StateVarType::String))
            .action(
                "Get",
                vec![
                    ArgumentSpec::output("A").retval(),
                    ArgumentSpec::output("B").retval(),
                ],
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LocalServiceBindingError::MultipleReturnValues { .. }
        ));
    }
}
