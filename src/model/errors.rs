use thiserror::Error;

/// Erreurs structurelles du modèle de métadonnées.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("invalid UDN '{0}'")]
    InvalidUdn(String),

    #[error("invalid URN '{0}'")]
    InvalidUrn(String),

    #[error("service '{0}' already exists on this device")]
    ServiceAlreadyExists(String),

    #[error("embedded device '{0}' already exists on this device")]
    DeviceAlreadyExists(String),

    #[error("device version must be >= 1")]
    InvalidVersion,
}
