// Copyright 2025-2026 CEMAXECUTER LLC

use hdx_dsp::{Detection, Modulation, PreambleCorrelator};
use num_complex::Complex32;

use crate::crc::crc32;
use crate::fec;
use crate::frame::{self, Header, FCS_LEN, HEADER_BITS, HEADER_SYMBOLS};
use crate::scrambler::whiten;

/// Default normalized correlation threshold for preamble detection.
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.6;

/// A decoded payload (MPDU), FCS removed.
pub type DecodedPacket = Vec<u8>;

/// Per-pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub samples: u64,
    pub preambles: u64,
    pub header_errors: u64,
    pub fcs_errors: u64,
    pub frames: u64,
}

/// Synchronization state carried between blocks.
#[derive(Debug, Clone, Copy)]
enum SyncState {
    /// Looking for a preamble
    Search,
    /// Preamble found; `channel` is the complex gain estimated from it
    Header { channel: Complex32 },
    /// Header decoded; waiting for the payload symbols
    Payload { channel: Complex32, header: Header },
}

enum Step {
    Packet(DecodedPacket),
    Continue,
    NeedSamples,
}

/// Detection, synchronization and decoding of bursts produced by
/// [`FrameBuilder`](crate::FrameBuilder).
///
/// Samples that do not complete a frame stay buffered, so frames may span any
/// number of `process` calls. Frames that fail the header or FCS check are
/// dropped and counted, never reported as errors.
pub struct ReceiverPipeline {
    correlator: PreambleCorrelator,
    threshold: f32,
    buffer: Vec<Complex32>,
    state: SyncState,
    stats: PipelineStats,
}

impl Default for ReceiverPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverPipeline {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_DETECTION_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            correlator: PreambleCorrelator::new(frame::preamble()),
            threshold,
            buffer: Vec::new(),
            state: SyncState::Search,
            stats: PipelineStats::default(),
        }
    }

    /// Push a block of samples and return the packets it completes.
    ///
    /// Decoding happens as the iterator is driven. Dropping it early leaves
    /// the remaining samples queued for the next call.
    pub fn process(&mut self, block: &[Complex32]) -> Packets<'_> {
        self.buffer.extend_from_slice(block);
        self.stats.samples += block.len() as u64;
        Packets { pipeline: self }
    }

    /// Forget any partial frame and buffered samples.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = SyncState::Search;
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Samples buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn step(&mut self) -> Step {
        match self.state {
            SyncState::Search => self.search(),
            SyncState::Header { channel } => self.read_header(channel),
            SyncState::Payload { channel, header } => self.read_payload(channel, header),
        }
    }

    fn search(&mut self) -> Step {
        match self.correlator.detect(&self.buffer, self.threshold) {
            Detection::Found {
                offset,
                correlation,
            } => {
                let channel = self.correlator.channel_estimate(&correlation);
                self.buffer.drain(..offset + self.correlator.len());
                self.stats.preambles += 1;
                log::trace!(
                    "preamble: metric {:.3}, gain {:.3}, phase {:.2} rad",
                    correlation.metric,
                    channel.norm(),
                    channel.arg()
                );
                self.state = SyncState::Header { channel };
                Step::Continue
            }
            Detection::Pending { start } => {
                self.buffer.drain(..start);
                Step::NeedSamples
            }
            Detection::None { consumed } => {
                self.buffer.drain(..consumed);
                Step::NeedSamples
            }
        }
    }

    fn read_header(&mut self, channel: Complex32) -> Step {
        if self.buffer.len() < HEADER_SYMBOLS {
            return Step::NeedSamples;
        }
        let symbols = equalize(self.buffer.drain(..HEADER_SYMBOLS), channel);
        let soft = Modulation::Bpsk.demap(&symbols);
        let (bits, _) = fec::viterbi_decode_terminated(&soft);

        match Header::from_bits(&bits[..HEADER_BITS.min(bits.len())]) {
            Ok(header) => {
                log::trace!("header: {} bytes at {}", header.length, header.rate);
                self.state = SyncState::Payload { channel, header };
            }
            Err(e) => {
                self.stats.header_errors += 1;
                log::debug!("dropping frame: {}", e);
                self.state = SyncState::Search;
            }
        }
        Step::Continue
    }

    fn read_payload(&mut self, channel: Complex32, header: Header) -> Step {
        let num_symbols = header.payload_symbols();
        if self.buffer.len() < num_symbols {
            return Step::NeedSamples;
        }
        self.state = SyncState::Search;

        let symbols = equalize(self.buffer.drain(..num_symbols), channel);
        let rate = header.rate;
        let data_bits = header.payload_bits();
        let mut soft = rate.modulation().demap(&symbols);
        soft.truncate(fec::punctured_len(fec::coded_len(data_bits), rate.code_rate()));

        let mut bits = fec::decode(&soft, rate.code_rate(), data_bits);
        whiten(&mut bits);
        let mut data = frame::bits_to_bytes(&bits);

        let fcs_at = data.len() - FCS_LEN;
        let fcs = u32::from_le_bytes([
            data[fcs_at],
            data[fcs_at + 1],
            data[fcs_at + 2],
            data[fcs_at + 3],
        ]);
        data.truncate(fcs_at);

        if crc32(&data) != fcs {
            self.stats.fcs_errors += 1;
            log::debug!("dropping {} byte frame at {}: FCS mismatch", header.length, rate);
            return Step::Continue;
        }

        self.stats.frames += 1;
        log::debug!("decoded {} byte frame at {}", data.len(), rate);
        Step::Packet(data)
    }
}

/// Remove the estimated channel gain and phase.
fn equalize(symbols: impl Iterator<Item = Complex32>, channel: Complex32) -> Vec<Complex32> {
    let inv = if channel.norm_sqr() > 0.0 {
        channel.inv()
    } else {
        Complex32::new(1.0, 0.0)
    };
    symbols.map(|s| s * inv).collect()
}

/// Lazy sequence of packets completed by one [`ReceiverPipeline::process`]
/// call.
pub struct Packets<'a> {
    pipeline: &'a mut ReceiverPipeline,
}

impl Iterator for Packets<'_> {
    type Item = DecodedPacket;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pipeline.step() {
                Step::Packet(packet) => return Some(packet),
                Step::Continue => continue,
                Step::NeedSamples => return None,
            }
        }
    }
}
