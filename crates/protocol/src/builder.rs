// Copyright 2025-2026 CEMAXECUTER LLC

use hdx_dsp::Modulation;
use num_complex::Complex32;

use crate::crc::crc32;
use crate::error::PhyError;
use crate::fec;
use crate::frame::{self, Frame, Header, GUARD_LEN};
use crate::rate::PhyRate;
use crate::scrambler::whiten;

/// Converts payloads into transmit-ready sample bursts.
///
/// Stateless apart from its configuration: the same payload and rate always
/// produce the same burst.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    amplitude: f32,
    preamble: Vec<Complex32>,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::with_amplitude(1.0)
    }

    /// `amplitude` scales the whole burst (digital TX gain, 0 < a <= 1).
    pub fn with_amplitude(amplitude: f32) -> Self {
        Self {
            amplitude,
            preamble: frame::preamble(),
        }
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Build the sample burst for `payload` at `rate`.
    pub fn build(&self, payload: &[u8], rate: PhyRate) -> Result<Vec<Complex32>, PhyError> {
        let header = Header::new(rate, payload.len())?;

        let mut burst = Vec::with_capacity(header.burst_len());
        burst.extend_from_slice(&self.preamble);

        // Header: always BPSK at rate 1/2 so it can be read before the rate is known
        let header_coded = fec::conv_encode(&header.to_bits());
        burst.extend(Modulation::Bpsk.map(&header_coded));

        // Payload: FCS, whitening, coding, puncturing, mapping
        let mut data = Vec::with_capacity(payload.len() + frame::FCS_LEN);
        data.extend_from_slice(payload);
        data.extend_from_slice(&crc32(payload).to_le_bytes());
        let mut bits = frame::bytes_to_bits(&data);
        whiten(&mut bits);
        let coded = fec::conv_encode(&bits);
        let punctured = fec::puncture(&coded, rate.code_rate());
        burst.extend(rate.modulation().map(&punctured));

        burst.extend(std::iter::repeat(Complex32::new(0.0, 0.0)).take(GUARD_LEN));

        if self.amplitude != 1.0 {
            for s in burst.iter_mut() {
                *s *= self.amplitude;
            }
        }

        log::trace!(
            "built {} byte frame at {}: {} samples",
            payload.len(),
            rate,
            burst.len()
        );

        Ok(burst)
    }

    /// Build the sample burst for a queued [`Frame`].
    pub fn build_frame(&self, frame: &Frame) -> Result<Vec<Complex32>, PhyError> {
        self.build(&frame.payload, frame.rate)
    }
}
