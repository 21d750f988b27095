use thiserror::Error;

use crate::types::StateVarType;

/// Erreurs de parsing et de validation des valeurs d'état.
#[derive(Debug, Clone, Error)]
pub enum StateValueError {
    #[error("cannot parse '{input}' as {var_type:?}")]
    ParseError { var_type: StateVarType, input: String },

    #[error("value type {found:?} does not match declared type {expected:?}")]
    TypeMismatch {
        expected: StateVarType,
        found: StateVarType,
    },

    #[error("value '{value}' is outside the allowed range")]
    OutOfRange { value: String },

    #[error("value '{value}' is not in the allowed value list")]
    NotAllowed { value: String },

    #[error("invalid range: {0}")]
    RangeError(String),
}
