// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;
use std::str::FromStr;

use hdx_dsp::Modulation;
use serde::{Deserialize, Serialize};

use crate::error::PhyError;

/// Convolutional code rate after puncturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeRate {
    Half,
    TwoThirds,
    ThreeQuarters,
}

impl CodeRate {
    /// Keep (1) / drop (0) pattern applied to the rate-1/2 coded stream
    /// `A0 B0 A1 B1 ...`.
    pub fn puncture_pattern(self) -> &'static [u8] {
        match self {
            CodeRate::Half => &[1, 1],
            CodeRate::TwoThirds => &[1, 1, 1, 0],
            CodeRate::ThreeQuarters => &[1, 1, 1, 0, 0, 1],
        }
    }
}

/// PHY rate: a modulation and code rate pair.
///
/// The set is closed; the 4-bit code carried in the frame header is the
/// position in [`PhyRate::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PhyRate {
    #[default]
    Bpsk1_2,
    Bpsk2_3,
    Bpsk3_4,
    Qpsk1_2,
    Qpsk2_3,
    Qpsk3_4,
    Qam16_1_2,
    Qam16_2_3,
    Qam16_3_4,
    Qam64_2_3,
    Qam64_3_4,
}

impl PhyRate {
    pub const ALL: [PhyRate; 11] = [
        PhyRate::Bpsk1_2,
        PhyRate::Bpsk2_3,
        PhyRate::Bpsk3_4,
        PhyRate::Qpsk1_2,
        PhyRate::Qpsk2_3,
        PhyRate::Qpsk3_4,
        PhyRate::Qam16_1_2,
        PhyRate::Qam16_2_3,
        PhyRate::Qam16_3_4,
        PhyRate::Qam64_2_3,
        PhyRate::Qam64_3_4,
    ];

    pub fn modulation(self) -> Modulation {
        match self {
            PhyRate::Bpsk1_2 | PhyRate::Bpsk2_3 | PhyRate::Bpsk3_4 => Modulation::Bpsk,
            PhyRate::Qpsk1_2 | PhyRate::Qpsk2_3 | PhyRate::Qpsk3_4 => Modulation::Qpsk,
            PhyRate::Qam16_1_2 | PhyRate::Qam16_2_3 | PhyRate::Qam16_3_4 => Modulation::Qam16,
            PhyRate::Qam64_2_3 | PhyRate::Qam64_3_4 => Modulation::Qam64,
        }
    }

    pub fn code_rate(self) -> CodeRate {
        match self {
            PhyRate::Bpsk1_2 | PhyRate::Qpsk1_2 | PhyRate::Qam16_1_2 => CodeRate::Half,
            PhyRate::Bpsk2_3 | PhyRate::Qpsk2_3 | PhyRate::Qam16_2_3 | PhyRate::Qam64_2_3 => {
                CodeRate::TwoThirds
            }
            PhyRate::Bpsk3_4 | PhyRate::Qpsk3_4 | PhyRate::Qam16_3_4 | PhyRate::Qam64_3_4 => {
                CodeRate::ThreeQuarters
            }
        }
    }

    /// Header rate code.
    pub fn code(self) -> u8 {
        Self::ALL.iter().position(|&r| r == self).unwrap_or(0) as u8
    }

    pub fn from_code(code: u8) -> Result<Self, PhyError> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| PhyError::UnsupportedRate(format!("rate code {}", code)))
    }

    /// Canonical name, e.g. `bpsk-1/2`.
    pub fn name(self) -> &'static str {
        match self {
            PhyRate::Bpsk1_2 => "bpsk-1/2",
            PhyRate::Bpsk2_3 => "bpsk-2/3",
            PhyRate::Bpsk3_4 => "bpsk-3/4",
            PhyRate::Qpsk1_2 => "qpsk-1/2",
            PhyRate::Qpsk2_3 => "qpsk-2/3",
            PhyRate::Qpsk3_4 => "qpsk-3/4",
            PhyRate::Qam16_1_2 => "qam16-1/2",
            PhyRate::Qam16_2_3 => "qam16-2/3",
            PhyRate::Qam16_3_4 => "qam16-3/4",
            PhyRate::Qam64_2_3 => "qam64-2/3",
            PhyRate::Qam64_3_4 => "qam64-3/4",
        }
    }
}

impl TryFrom<u8> for PhyRate {
    type Error = PhyError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl fmt::Display for PhyRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PhyRate {
    type Err = PhyError;

    /// Accepts the canonical names case-insensitively, with `_` allowed in
    /// place of `-` and `/` (`QAM16_3_4`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '/'], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.name().replace(['-', '/'], "_") == wanted)
            .ok_or_else(|| PhyError::UnsupportedRate(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for rate in PhyRate::ALL {
            assert_eq!(PhyRate::from_code(rate.code()), Ok(rate));
        }
        assert!(matches!(
            PhyRate::try_from(11u8),
            Err(PhyError::UnsupportedRate(_))
        ));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("bpsk-1/2".parse::<PhyRate>(), Ok(PhyRate::Bpsk1_2));
        assert_eq!("QAM16_3_4".parse::<PhyRate>(), Ok(PhyRate::Qam16_3_4));
        assert_eq!(" qpsk-2/3 ".parse::<PhyRate>(), Ok(PhyRate::Qpsk2_3));
        assert_eq!(
            "qam256-7/8".parse::<PhyRate>(),
            Err(PhyError::UnsupportedRate("qam256-7/8".into()))
        );
    }

    #[test]
    fn test_default_is_robust_rate() {
        assert_eq!(PhyRate::default(), PhyRate::Bpsk1_2);
        assert_eq!(PhyRate::default().modulation(), Modulation::Bpsk);
        assert_eq!(PhyRate::default().code_rate(), CodeRate::Half);
    }
}
