//! Plages et listes de valeurs autorisées.
//!
//! Une variable d'état de type chaîne peut restreindre ses valeurs à une
//! liste ; une variable numérique à une plage `[min, max]` avec un pas
//! facultatif. Le pas est déclaratif : il est émis dans le SCPD mais
//! jamais appliqué à l'affectation des valeurs.

use crate::types::{StateValue, StateValueError};

/// Longueur maximale d'un nom de valeur autorisée (limite UPnP).
pub const MAX_ALLOWED_VALUE_LEN: usize = 32;

/// Plage de valeurs d'une variable numérique.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    minimum: StateValue,
    maximum: StateValue,
    step: Option<StateValue>,
}

impl ValueRange {
    /// Construit une plage après validation : types numériques identiques,
    /// `min ≤ max`, et `step > 0` s'il est fourni.
    pub fn new(
        minimum: StateValue,
        maximum: StateValue,
        step: Option<StateValue>,
    ) -> Result<Self, StateValueError> {
        if !minimum.var_type().is_numeric() {
            return Err(StateValueError::RangeError(format!(
                "range bounds must be numeric, got {:?}",
                minimum.var_type()
            )));
        }
        if minimum.var_type() != maximum.var_type() {
            return Err(StateValueError::RangeError(
                "minimum and maximum do not share the same datatype".to_string(),
            ));
        }
        let (min_f, max_f) = match (minimum.as_f64(), maximum.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(StateValueError::RangeError(
                    "range bounds are not comparable".to_string(),
                ))
            }
        };
        if min_f > max_f {
            return Err(StateValueError::RangeError(
                "minimum cannot be greater than maximum".to_string(),
            ));
        }
        if let Some(step) = &step {
            match step.as_f64() {
                Some(s) if s > 0.0 => {}
                _ => {
                    return Err(StateValueError::RangeError(
                        "step must be strictly positive".to_string(),
                    ))
                }
            }
        }
        Ok(Self {
            minimum,
            maximum,
            step,
        })
    }

    pub fn minimum(&self) -> &StateValue {
        &self.minimum
    }

    pub fn maximum(&self) -> &StateValue {
        &self.maximum
    }

    pub fn step(&self) -> Option<&StateValue> {
        self.step.as_ref()
    }

    /// Teste `min ≤ value ≤ max`. Le pas n'est pas pris en compte.
    pub fn is_in_range(&self, value: &StateValue) -> bool {
        let Some(v) = value.as_f64() else {
            return false;
        };
        let (min, max) = (
            self.minimum.as_f64().unwrap_or(f64::NEG_INFINITY),
            self.maximum.as_f64().unwrap_or(f64::INFINITY),
        );
        min <= v && v <= max
    }
}

/// Liste de valeurs autorisées d'une variable de type chaîne.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllowedValues {
    values: Vec<String>,
}

impl AllowedValues {
    /// Construit la liste après validation de la limite de 32 caractères.
    pub fn new<I, S>(values: I) -> Result<Self, StateValueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        for v in &values {
            if v.len() > MAX_ALLOWED_VALUE_LEN {
                return Err(StateValueError::NotAllowed { value: v.clone() });
            }
        }
        Ok(Self { values })
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
