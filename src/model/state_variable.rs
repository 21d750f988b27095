//! Variables d'état d'un service.

use crate::ranges::{AllowedValues, ValueRange};
use crate::types::{StateValue, StateValueError, StateVarType};

/// Politique d'événement d'une variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPolicy {
    /// La variable est-elle événementielle (`sendEvents`) ?
    pub send_events: bool,
    /// Écart minimal entre deux événements pour cette variable, en ms.
    pub max_rate_ms: Option<u64>,
    /// Delta minimal (types entiers uniquement) avant événement.
    pub min_delta: Option<i64>,
}

/// Variable d'état : nom, datatype, valeur par défaut et restrictions.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVariable {
    name: String,
    var_type: StateVarType,
    default_value: Option<StateValue>,
    allowed_values: Option<AllowedValues>,
    allowed_range: Option<ValueRange>,
    event_policy: EventPolicy,
}

impl StateVariable {
    pub(crate) fn new(
        name: String,
        var_type: StateVarType,
        default_value: Option<StateValue>,
        allowed_values: Option<AllowedValues>,
        allowed_range: Option<ValueRange>,
        event_policy: EventPolicy,
    ) -> Self {
        Self {
            name,
            var_type,
            default_value,
            allowed_values,
            allowed_range,
            event_policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn var_type(&self) -> StateVarType {
        self.var_type
    }

    pub fn default_value(&self) -> Option<&StateValue> {
        self.default_value.as_ref()
    }

    pub fn allowed_values(&self) -> Option<&AllowedValues> {
        self.allowed_values.as_ref()
    }

    pub fn allowed_range(&self) -> Option<&ValueRange> {
        self.allowed_range.as_ref()
    }

    pub fn event_policy(&self) -> &EventPolicy {
        &self.event_policy
    }

    pub fn sends_events(&self) -> bool {
        self.event_policy.send_events
    }

    /// Parse une valeur fil pour cette variable, restrictions comprises.
    pub fn parse(&self, raw: &str) -> Result<StateValue, StateValueError> {
        let value = self.var_type.parse(raw)?;
        self.validate(&value)?;
        Ok(value)
    }

    /// Vérifie qu'une valeur respecte le datatype, la liste et la plage.
    pub fn validate(&self, value: &StateValue) -> Result<(), StateValueError> {
        if value.var_type() != self.var_type {
            return Err(StateValueError::TypeMismatch {
                expected: self.var_type,
                found: value.var_type(),
            });
        }
        if let Some(allowed) = &self.allowed_values {
            let formatted = value.format();
            if !allowed.contains(&formatted) {
                return Err(StateValueError::NotAllowed { value: formatted });
            }
        }
        if let Some(range) = &self.allowed_range {
            if !range.is_in_range(value) {
                return Err(StateValueError::OutOfRange {
                    value: value.format(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranges::{AllowedValues, ValueRange};
    use crate::types::StateValue;

    fn transport_state() -> StateVariable {
        StateVariable::new(
            "TransportState".to_string(),
            StateVarType::String,
            Some(StateValue::String("STOPPED".into())),
            Some(AllowedValues::new(["STOPPED", "PLAYING", "PAUSED_PLAYBACK"]).unwrap()),
            None,
            EventPolicy {
                send_events: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_allowed_values_enforced() {
        let var = transport_state();
        assert!(var.parse("PLAYING").is_ok());
        assert!(var.parse("FLYING").is_err());
    }

    #[test]
    fn test_range_enforced_on_parse() {
        let volume = StateVariable::new(
            "Volume".to_string(),
            StateVarType::UI2,
            Some(StateValue::UI2(20)),
            None,
            Some(ValueRange::new(StateValue::UI2(0), StateValue::UI2(100), None).unwrap()),
            EventPolicy::default(),
        );
        assert!(volume.parse("100").is_ok());
        assert!(volume.parse("101").is_err());
        assert!(volume.parse("abc").is_err());
    }
}
