//! Error types for the broadcast runtime.

use aton_core::{ConfigurationError, StoreError};
use aton_protocol::EncodingError;
use thiserror::Error;

/// Socket or device connection failure.
///
/// The affected message is dropped; the next cycle retries with fresh data.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot resolve address {0}")]
    InvalidAddress(String),

    #[error("Transport is closed")]
    Closed,
}

/// Failure of the signing authority.
///
/// Only the signature leg is suppressed; the primary message stands.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing request failed: {0}")]
    Request(String),

    #[error("Signing service answered with status {0}")]
    Status(u16),

    #[error("Signing service returned an empty signature")]
    EmptySignature,
}

impl From<reqwest::Error> for SigningError {
    fn from(err: reqwest::Error) -> Self {
        SigningError::Request(err.to_string())
    }
}

/// Errors raised by a station advertiser.
#[derive(Debug, Error)]
pub enum AdvertiserError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Advertiser for station {0} is not active")]
    NotActive(u32),
}

/// Errors returned through a [`crate::supervisor::SupervisorHandle`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Broadcast supervisor has stopped")]
    Stopped,
}
