// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::Duration;

use hdx_protocol::receiver::DEFAULT_DETECTION_THRESHOLD;

/// Samples pulled from the radio per loop iteration
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_MAX_ACQUISITION_RETRIES: u32 = 8;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Receive loop and transmit path tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverConfig {
    pub block_size: usize,
    /// Consecutive transient acquisition failures tolerated before the loop
    /// gives up on the radio
    pub max_acquisition_retries: u32,
    pub retry_backoff: Duration,
    /// Normalized preamble correlation threshold, in (0, 1]
    pub detection_threshold: f32,
    /// Digital TX scale, in (0, 1]
    pub amplitude: f32,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_acquisition_retries: DEFAULT_MAX_ACQUISITION_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            amplitude: 1.0,
        }
    }
}

impl TransceiverConfig {
    /// Default tuning with the TX amplitude taken from the device parameters.
    pub fn for_device(params: &hdx_sdr::DeviceParameters) -> Self {
        Self {
            amplitude: params.amplitude as f32,
            ..Self::default()
        }
    }
}
