// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

/// Symbol constellation for one PHY rate.
///
/// Bits are stored one per `u8` (0 or 1). Within a symbol the first half of
/// the bits drives the in-phase axis and the second half the quadrature axis,
/// each axis using a Gray-coded PAM ladder. BPSK only uses the in-phase axis.
///
/// All constellations are scaled to unit average power so the receiver can
/// equalize every rate with the same channel estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    pub fn bits_per_symbol(self) -> usize {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }

    fn bits_per_axis(self) -> usize {
        match self {
            Modulation::Bpsk | Modulation::Qpsk => 1,
            Modulation::Qam16 => 2,
            Modulation::Qam64 => 3,
        }
    }

    /// Per-axis scale giving unit average symbol energy.
    fn scale(self) -> f32 {
        match self {
            Modulation::Bpsk => 1.0,
            Modulation::Qpsk => std::f32::consts::FRAC_1_SQRT_2,
            Modulation::Qam16 => 1.0 / 10f32.sqrt(),
            Modulation::Qam64 => 1.0 / 42f32.sqrt(),
        }
    }

    /// Number of symbols needed to carry `num_bits` bits.
    pub fn symbols_for_bits(self, num_bits: usize) -> usize {
        num_bits.div_ceil(self.bits_per_symbol())
    }

    /// Map one symbol's worth of bits (`bits.len() == bits_per_symbol()`).
    pub fn map_symbol(self, bits: &[u8]) -> Complex32 {
        debug_assert_eq!(bits.len(), self.bits_per_symbol());
        let scale = self.scale();
        match self {
            Modulation::Bpsk => Complex32::new(pam_level(bits), 0.0),
            _ => {
                let (i_bits, q_bits) = bits.split_at(self.bits_per_axis());
                Complex32::new(pam_level(i_bits) * scale, pam_level(q_bits) * scale)
            }
        }
    }

    /// Map a bit stream to symbols. The final symbol is zero-padded.
    pub fn map(self, bits: &[u8]) -> Vec<Complex32> {
        let bps = self.bits_per_symbol();
        let mut symbols = Vec::with_capacity(self.symbols_for_bits(bits.len()));
        let mut padded = [0u8; 6];
        for chunk in bits.chunks(bps) {
            let sym_bits = &mut padded[..bps];
            sym_bits.fill(0);
            sym_bits[..chunk.len()].copy_from_slice(chunk);
            symbols.push(self.map_symbol(sym_bits));
        }
        symbols
    }

    /// Max-log soft demapping of equalized symbols.
    ///
    /// Produces `bits_per_symbol()` soft values per symbol, ordered like the
    /// mapper's bits. Positive means the bit is more likely 0, which is the
    /// convention the Viterbi decoder expects.
    pub fn demap(self, symbols: &[Complex32]) -> Vec<f32> {
        let mut soft = Vec::with_capacity(symbols.len() * self.bits_per_symbol());
        let inv = 1.0 / self.scale();
        let n = self.bits_per_axis();
        for &y in symbols {
            match self {
                Modulation::Bpsk => soft.push(y.re),
                _ => {
                    pam_soft(y.re * inv, n, &mut soft);
                    pam_soft(y.im * inv, n, &mut soft);
                }
            }
        }
        soft
    }
}

/// Gray-coded PAM level for one axis: first bit is the sign (0 = positive),
/// the rest select the magnitude.
///
/// 4-PAM magnitudes: `0` -> 3, `1` -> 1.
/// 8-PAM magnitudes: `11` -> 1, `10` -> 3, `00` -> 5, `01` -> 7.
fn pam_level(bits: &[u8]) -> f32 {
    let sign = if bits[0] == 0 { 1.0 } else { -1.0 };
    let magnitude = match bits.len() {
        1 => 1.0,
        2 => {
            if bits[1] == 0 {
                3.0
            } else {
                1.0
            }
        }
        _ => match (bits[1], bits[2]) {
            (1, 1) => 1.0,
            (1, 0) => 3.0,
            (0, 0) => 5.0,
            _ => 7.0,
        },
    };
    sign * magnitude
}

/// Soft values for one PAM axis (unscaled coordinates).
fn pam_soft(x: f32, bits: usize, out: &mut Vec<f32>) {
    out.push(x);
    match bits {
        2 => out.push(x.abs() - 2.0),
        3 => {
            let outer = x.abs() - 4.0;
            out.push(outer);
            out.push(2.0 - outer.abs());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Modulation; 4] = [
        Modulation::Bpsk,
        Modulation::Qpsk,
        Modulation::Qam16,
        Modulation::Qam64,
    ];

    fn index_bits(index: usize, bps: usize) -> Vec<u8> {
        (0..bps).map(|b| ((index >> b) & 1) as u8).collect()
    }

    #[test]
    fn test_hard_decision_every_point() {
        for m in ALL {
            let bps = m.bits_per_symbol();
            for index in 0..(1usize << bps) {
                let bits = index_bits(index, bps);
                let sym = m.map_symbol(&bits);
                let soft = m.demap(&[sym]);
                let hard: Vec<u8> = soft.iter().map(|&s| if s > 0.0 { 0 } else { 1 }).collect();
                assert_eq!(hard, bits, "{:?} point {} demapped wrong", m, index);
            }
        }
    }

    #[test]
    fn test_unit_average_power() {
        for m in ALL {
            let bps = m.bits_per_symbol();
            let points = 1usize << bps;
            let power: f32 = (0..points)
                .map(|i| m.map_symbol(&index_bits(i, bps)).norm_sqr())
                .sum::<f32>()
                / points as f32;
            assert!((power - 1.0).abs() < 1e-4, "{:?} average power {}", m, power);
        }
    }

    #[test]
    fn test_gray_neighbours_differ_by_one_bit() {
        // Adjacent 8-PAM levels must differ in exactly one bit
        let levels: Vec<(f32, Vec<u8>)> = (0..8)
            .map(|i| {
                let bits = index_bits(i, 3);
                (pam_level(&bits), bits)
            })
            .collect();
        let mut sorted = levels.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in sorted.windows(2) {
            let diff = pair[0].1.iter().zip(&pair[1].1).filter(|(a, b)| a != b).count();
            assert_eq!(diff, 1, "levels {} and {} not Gray adjacent", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn test_map_pads_last_symbol() {
        let symbols = Modulation::Qam16.map(&[1, 0, 1, 1, 0, 1]);
        assert_eq!(symbols.len(), 2);
        let soft = Modulation::Qam16.demap(&symbols[1..]);
        let hard: Vec<u8> = soft.iter().map(|&s| if s > 0.0 { 0 } else { 1 }).collect();
        assert_eq!(hard, vec![0, 1, 0, 0]);
    }
}
