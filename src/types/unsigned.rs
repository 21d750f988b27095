//! Compteur non signé 4 octets.

use std::fmt;
use std::str::FromStr;

use crate::types::{StateValueError, StateVarType};

/// Entier `ui4` borné à `[0, 2³²−1]`, avec l'incrément GENA.
///
/// GENA réserve la valeur 0 à l'événement initial : l'incrément repasse
/// donc de 2³²−1 à 1, jamais à 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UnsignedIntegerFourBytes(u32);

impl UnsignedIntegerFourBytes {
    pub const ZERO: Self = Self(0);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Addition vérifiée ; `None` en cas de dépassement.
    pub fn checked_add(&self, rhs: u32) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }

    /// Incrément avec le wrap GENA : 2³²−1 → 1.
    pub fn increment_wrapped(&self) -> Self {
        if self.0 == u32::MAX {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for UnsignedIntegerFourBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UnsignedIntegerFourBytes {
    type Err = StateValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| StateValueError::ParseError {
                var_type: StateVarType::UI4,
                input: s.to_string(),
            })
    }
}

impl From<u32> for UnsignedIntegerFourBytes {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
