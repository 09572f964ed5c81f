//! Error taxonomy for the payment flow

use thiserror::Error;

use crate::treasurer::Rejection;

/// Errors surfaced to the caller of `PaymentTransport::send`
#[derive(Debug, Error)]
pub enum PaymentError {
    /// 402 body (or header) could not be parsed, or listed no requirements
    #[error("malformed payment challenge: {0}")]
    MalformedChallenge(String),

    /// None of the offered requirements is payable by the configured treasurer
    #[error("no supported payment requirement among offered: {}", offered.join(", "))]
    UnsupportedRequirement { offered: Vec<String> },

    #[error("payment declined: {reason}")]
    PaymentDeclined { reason: Rejection },

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("no treasurer registered for network {0}")]
    NoTreasurerForNetwork(String),

    /// Request body is a stream and cannot be replayed with a payment attached
    #[error("request cannot be retried with payment: body is not cloneable")]
    UnreplayableRequest,

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Errors returned by `Treasurer::authorize`
#[derive(Debug, Error)]
pub enum TreasurerError {
    #[error("payment declined: {0}")]
    Declined(Rejection),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("no treasurer registered for network {0}")]
    NoTreasurerForNetwork(String),
}

impl From<TreasurerError> for PaymentError {
    fn from(err: TreasurerError) -> Self {
        match err {
            TreasurerError::Declined(reason) => PaymentError::PaymentDeclined { reason },
            TreasurerError::Signing(e) => PaymentError::Signing(e),
            TreasurerError::NoTreasurerForNetwork(n) => PaymentError::NoTreasurerForNetwork(n),
        }
    }
}

/// Wallet could not produce an authorization
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("network {0} is not supported by this wallet")]
    UnsupportedNetwork(String),

    #[error("scheme {0} cannot be signed")]
    UnsupportedScheme(String),

    #[error("payment requirement expired before signing")]
    Expired,

    #[error("signer failed: {0}")]
    Signer(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    MissingVar(&'static str),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Wallet(#[from] SigningError),
}
