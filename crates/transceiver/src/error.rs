// Copyright 2025-2026 CEMAXECUTER LLC

use hdx_protocol::PhyError;
use hdx_sdr::RadioError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transceiver.
///
/// `Clone` so the receive loop's terminal error can be reported from
/// [`Transceiver::health`](crate::Transceiver::health) any number of times.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The radio could not be opened, configured or tuned
    #[error("device initialization failed")]
    DeviceInit(#[source] RadioError),

    /// An acquisition attempt failed; retried by the receive loop
    #[error("sample acquisition failed (attempt {attempts})")]
    Acquisition {
        attempts: u32,
        #[source]
        source: RadioError,
    },

    /// The receive loop stopped for good
    #[error("radio lost")]
    DeviceLost(#[source] RadioError),

    #[error("transmit failed")]
    Transmit(#[source] RadioError),

    #[error("unsupported PHY rate: {0}")]
    UnsupportedRate(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("failed to start receive loop: {0}")]
    Spawn(String),

    #[error("receive loop panicked")]
    LoopPanicked,
}

impl From<PhyError> for Error {
    fn from(e: PhyError) -> Self {
        match e {
            PhyError::UnsupportedRate(rate) => Error::UnsupportedRate(rate),
            other => Error::InvalidPayload(other.to_string()),
        }
    }
}
