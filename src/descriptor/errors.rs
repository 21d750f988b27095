use thiserror::Error;

/// Erreurs du codec de descripteurs.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("XML write error: {0}")]
    Write(xmltree::Error),

    #[error("descriptor is not valid UTF-8")]
    NotUtf8,

    #[error("missing required element '{field}' in <{element}>")]
    MissingField {
        element: &'static str,
        field: &'static str,
    },

    #[error("invalid value for '{field}' in <{element}>: {detail}")]
    InvalidField {
        element: &'static str,
        field: &'static str,
        detail: String,
    },
}
