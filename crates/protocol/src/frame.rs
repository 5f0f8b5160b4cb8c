// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

use crate::crc::crc8;
use crate::error::PhyError;
use crate::fec;
use crate::rate::PhyRate;

// Burst layout (one sample per symbol):
//
//   | preamble 64 | header 60 (BPSK, rate 1/2) | payload (rate-dependent) | guard 32 |
//
// Header bits (LSB first): rate code (4) | length (12) | CRC-8 over both (8)
// Payload bits: whitened (payload || CRC-32 little-endian), LSB first per byte

pub const PREAMBLE_LEN: usize = 64;
/// Seed of the LFSR that generates the preamble chips
const PREAMBLE_SEED: u8 = 0x5B;
pub const HEADER_BITS: usize = 24;
pub const HEADER_SYMBOLS: usize = 2 * (HEADER_BITS + fec::FEC_MEM);
pub const FCS_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 0x0FFF;
/// Silence appended after each burst so the transmitter ramps down cleanly
pub const GUARD_LEN: usize = 32;

/// A payload queued for transmission at a given rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub rate: PhyRate,
}

impl Frame {
    pub fn new(payload: impl Into<Vec<u8>>, rate: PhyRate) -> Self {
        Self {
            payload: payload.into(),
            rate,
        }
    }
}

/// Preamble: 64 BPSK chips from a 7-bit maximal-length LFSR (x^7 + x^6 + 1).
/// Chip 0 maps to +1, chip 1 to -1.
pub fn preamble() -> Vec<Complex32> {
    let mut state = PREAMBLE_SEED;
    (0..PREAMBLE_LEN)
        .map(|_| {
            let bit = ((state >> 6) ^ (state >> 5)) & 1;
            state = ((state << 1) | bit) & 0x7F;
            Complex32::new(if bit == 1 { -1.0 } else { 1.0 }, 0.0)
        })
        .collect()
}

/// Decoded PHY header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub rate: PhyRate,
    pub length: usize,
}

impl Header {
    pub fn new(rate: PhyRate, length: usize) -> Result<Self, PhyError> {
        check_length(length)?;
        Ok(Self { rate, length })
    }

    fn field_bytes(&self) -> [u8; 2] {
        let word = (self.rate.code() as u16 & 0x0F) | ((self.length as u16 & 0x0FFF) << 4);
        word.to_le_bytes()
    }

    /// Serialize to `HEADER_BITS` bits, LSB first.
    pub fn to_bits(&self) -> Vec<u8> {
        let fields = self.field_bytes();
        let check = crc8(&fields);
        bytes_to_bits(&[fields[0], fields[1], check])
    }

    /// Parse and verify a header. Fails on CRC mismatch, unknown rate code,
    /// or a zero length.
    pub fn from_bits(bits: &[u8]) -> Result<Self, PhyError> {
        if bits.len() < HEADER_BITS {
            return Err(PhyError::HeaderCheck);
        }
        let bytes = bits_to_bytes(&bits[..HEADER_BITS]);
        if crc8(&bytes[..2]) != bytes[2] {
            return Err(PhyError::HeaderCheck);
        }
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        let rate = PhyRate::from_code((word & 0x0F) as u8)?;
        Self::new(rate, (word >> 4) as usize)
    }

    /// Number of payload data bits, FCS included.
    pub fn payload_bits(&self) -> usize {
        8 * (self.length + FCS_LEN)
    }

    /// Number of payload symbols on air for this header.
    pub fn payload_symbols(&self) -> usize {
        let coded = fec::coded_len(self.payload_bits());
        let punctured = fec::punctured_len(coded, self.rate.code_rate());
        self.rate.modulation().symbols_for_bits(punctured)
    }

    /// Total burst length in samples, guard included.
    pub fn burst_len(&self) -> usize {
        PREAMBLE_LEN + HEADER_SYMBOLS + self.payload_symbols() + GUARD_LEN
    }
}

pub fn check_length(length: usize) -> Result<(), PhyError> {
    if length == 0 || length > MAX_PAYLOAD_LEN {
        return Err(PhyError::InvalidPayload {
            len: length,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}

/// Unpack bytes into bits, LSB first within each byte.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte >> i) & 1);
        }
    }
    bits
}

/// Pack bits (LSB first) into bytes. A trailing partial byte is dropped.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        for rate in PhyRate::ALL {
            let header = Header::new(rate, 1234).unwrap();
            let bits = header.to_bits();
            assert_eq!(bits.len(), HEADER_BITS);
            assert_eq!(Header::from_bits(&bits), Ok(header));
        }
    }

    #[test]
    fn test_header_rejects_corruption() {
        let mut bits = Header::new(PhyRate::Qpsk3_4, 11).unwrap().to_bits();
        bits[7] ^= 1;
        assert_eq!(Header::from_bits(&bits), Err(PhyError::HeaderCheck));
    }

    #[test]
    fn test_header_rejects_unknown_rate_code() {
        // Rate code 15 with a valid CRC still fails
        let word: u16 = 0x0F | (20 << 4);
        let fields = word.to_le_bytes();
        let bits = bytes_to_bits(&[fields[0], fields[1], crc8(&fields)]);
        assert!(matches!(
            Header::from_bits(&bits),
            Err(PhyError::UnsupportedRate(_))
        ));
    }

    #[test]
    fn test_length_limits() {
        assert!(Header::new(PhyRate::Bpsk1_2, 0).is_err());
        assert!(Header::new(PhyRate::Bpsk1_2, MAX_PAYLOAD_LEN).is_ok());
        assert!(Header::new(PhyRate::Bpsk1_2, MAX_PAYLOAD_LEN + 1).is_err());
    }

    #[test]
    fn test_bit_packing() {
        let bytes = vec![0x01, 0x80, 0xA5];
        let bits = bytes_to_bits(&bytes);
        assert_eq!(&bits[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bits[8..16], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(bits_to_bytes(&bits), bytes);
    }

    #[test]
    fn test_hello_world_burst_len() {
        // 11 bytes + FCS = 120 bits -> 252 coded bits -> 252 BPSK symbols
        let header = Header::new(PhyRate::Bpsk1_2, 11).unwrap();
        assert_eq!(header.payload_symbols(), 252);
        assert_eq!(header.burst_len(), 64 + 60 + 252 + 32);
    }

    #[test]
    fn test_preamble_is_balanced() {
        let p = preamble();
        assert_eq!(p.len(), PREAMBLE_LEN);
        let sum: f32 = p.iter().map(|c| c.re).sum();
        assert!(sum.abs() <= 8.0, "preamble DC {}", sum);
    }
}
