//! Error types for the NATS claim registry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// NATS connection or JetStream failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The stored claim record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration error (e.g. missing credentials for the security mode).
    #[error("configuration error: {0}")]
    Config(String),

    /// The bucket does not refuse a second `create` of the same key, so it
    /// cannot hold exclusive claims.
    #[error("claims bucket failed the conditional insert check: {0}")]
    NotExclusive(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
