// Copyright 2025-2026 CEMAXECUTER LLC

/// Errors raised while building or parsing frames.
///
/// Receive-side variants never leave the pipeline; a frame that fails a check
/// is counted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhyError {
    /// The rate name or code is not part of the supported set.
    #[error("unsupported PHY rate: {0}")]
    UnsupportedRate(String),

    /// Payload is empty or longer than the header length field can express.
    #[error("invalid payload length {len} (expected 1..={max} bytes)")]
    InvalidPayload { len: usize, max: usize },

    /// Header CRC-8 mismatch.
    #[error("header check failed")]
    HeaderCheck,
}

pub type Result<T> = std::result::Result<T, PhyError>;
