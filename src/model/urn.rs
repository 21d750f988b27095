//! URN de types de device, de types de service et d'identifiants de service.

use std::fmt;
use std::str::FromStr;

use crate::model::ModelError;

const UPNP_DOMAIN: &str = "schemas-upnp-org";
const SERVICE_ID_DOMAIN: &str = "upnp-org";

/// Type de device : `urn:<domaine>:device:<type>:<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceType {
    domain: String,
    kind: String,
    version: u32,
}

impl DeviceType {
    /// Type standard `urn:schemas-upnp-org:device:<kind>:<version>`.
    pub fn standard(kind: &str, version: u32) -> Self {
        Self {
            domain: UPNP_DOMAIN.to_string(),
            kind: kind.to_string(),
            version,
        }
    }

    /// Type vendeur avec un domaine propre.
    pub fn vendor(domain: &str, kind: &str, version: u32) -> Self {
        Self {
            domain: domain.to_string(),
            kind: kind.to_string(),
            version,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Compatibilité de recherche : même domaine et type, version ≤ la nôtre.
    pub fn implements(&self, other: &DeviceType) -> bool {
        self.domain == other.domain && self.kind == other.kind && other.version <= self.version
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:device:{}:{}", self.domain, self.kind, self.version)
    }
}

impl FromStr for DeviceType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, kind, version) = parse_urn(s, "device")?;
        Ok(Self {
            domain,
            kind,
            version,
        })
    }
}

/// Type de service : `urn:<domaine>:service:<type>:<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType {
    domain: String,
    kind: String,
    version: u32,
}

impl ServiceType {
    pub fn standard(kind: &str, version: u32) -> Self {
        Self {
            domain: UPNP_DOMAIN.to_string(),
            kind: kind.to_string(),
            version,
        }
    }

    pub fn vendor(domain: &str, kind: &str, version: u32) -> Self {
        Self {
            domain: domain.to_string(),
            kind: kind.to_string(),
            version,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn implements(&self, other: &ServiceType) -> bool {
        self.domain == other.domain && self.kind == other.kind && other.version <= self.version
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:service:{}:{}", self.domain, self.kind, self.version)
    }
}

impl FromStr for ServiceType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, kind, version) = parse_urn(s, "service")?;
        Ok(Self {
            domain,
            kind,
            version,
        })
    }
}

/// Identifiant de service : `urn:<domaine>:serviceId:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId {
    domain: String,
    id: String,
}

impl ServiceId {
    pub fn standard(id: &str) -> Self {
        Self {
            domain: SERVICE_ID_DOMAIN.to_string(),
            id: id.to_string(),
        }
    }

    pub fn vendor(domain: &str, id: &str) -> Self {
        Self {
            domain: domain.to_string(),
            id: id.to_string(),
        }
    }

    /// Composant court, utilisé dans les chemins HTTP.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:serviceId:{}", self.domain, self.id)
    }
}

impl FromStr for ServiceId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(':').collect();
        // urn:<domaine>:serviceId:<id...>  (l'id peut contenir des ':')
        if parts.len() < 4 || parts[0] != "urn" || parts[2] != "serviceId" {
            return Err(ModelError::InvalidUrn(s.to_string()));
        }
        Ok(Self {
            domain: parts[1].to_string(),
            id: parts[3..].join(":"),
        })
    }
}

fn parse_urn(s: &str, marker: &str) -> Result<(String, String, u32), ModelError> {
    let s = s.trim();
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 5 || parts[0] != "urn" || parts[2] != marker {
        return Err(ModelError::InvalidUrn(s.to_string()));
    }
    let version = parts[4]
        .parse::<u32>()
        .map_err(|_| ModelError::InvalidUrn(s.to_string()))?;
    Ok((parts[1].to_string(), parts[3].to_string(), version))
}
