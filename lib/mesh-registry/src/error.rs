use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coordination-service failures.
///
/// These are contained within the registry layer: agents log them and
/// keep previously cached state authoritative. They never reach
/// call-dispatch code.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("coordination service unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("client is not connected")]
    NotConnected,
}
