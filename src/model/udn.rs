//! UDN : identifiant stable d'un device.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::model::ModelError;

/// Unique Device Name, sous la forme canonique `uuid:<UUID>`.
///
/// Clé primaire de l'identité d'un device, localement comme dans le
/// registre des devices distants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Udn(String);

impl Udn {
    /// Génère un UDN aléatoire (UUID v4).
    pub fn random() -> Self {
        Self(format!("uuid:{}", Uuid::new_v4()))
    }

    /// Construit un UDN à partir d'un UUID existant.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(format!("uuid:{uuid}"))
    }

    /// Forme canonique `uuid:<UUID>`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// L'UUID sans le préfixe `uuid:`.
    pub fn bare(&self) -> &str {
        self.0.strip_prefix("uuid:").unwrap_or(&self.0)
    }

    /// Extrait l'UDN d'un USN composite (`uuid:...::<NT>`).
    pub fn from_usn(usn: &str) -> Option<Self> {
        let lower = usn.trim();
        let idx = lower.to_ascii_lowercase().find("uuid:")?;
        let sub = &lower[idx..];
        let udn = match sub.find("::") {
            Some(end) => &sub[..end],
            None => sub,
        };
        udn.parse().ok()
    }
}

impl FromStr for Udn {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bare = s.strip_prefix("uuid:").unwrap_or(s);
        if bare.is_empty() {
            return Err(ModelError::InvalidUdn(s.to_string()));
        }
        Ok(Self(format!("uuid:{bare}")))
    }
}

impl fmt::Display for Udn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
