// Copyright 2025-2026 CEMAXECUTER LLC

/// Seed used for payload whitening on both ends of the link.
pub const WHITENING_SEED: u8 = 0x5D;

/// 7-bit maximal-length LFSR (x^7 + x^4 + 1, period 127) used to whiten the
/// payload so long runs of identical bits do not reach the modulator.
#[derive(Debug, Clone)]
pub struct Scrambler {
    state: u8,
}

impl Scrambler {
    /// A zero seed would lock the register, so it is replaced with all ones.
    pub fn new(seed: u8) -> Self {
        let state = seed & 0x7F;
        Self {
            state: if state == 0 { 0x7F } else { state },
        }
    }

    #[inline]
    pub fn next_bit(&mut self) -> u8 {
        let bit = ((self.state >> 6) ^ (self.state >> 3)) & 1;
        self.state = ((self.state << 1) | bit) & 0x7F;
        bit
    }

    /// XOR the sequence into `bits` in place. Applying twice with the same
    /// seed restores the input.
    pub fn apply(&mut self, bits: &mut [u8]) {
        for b in bits.iter_mut() {
            *b ^= self.next_bit();
        }
    }
}

/// Whiten or de-whiten a payload bit stream.
pub fn whiten(bits: &mut [u8]) {
    Scrambler::new(WHITENING_SEED).apply(bits);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_127() {
        let mut s = Scrambler::new(1);
        let seq: Vec<u8> = (0..254).map(|_| s.next_bit()).collect();
        assert_eq!(&seq[..127], &seq[127..]);
        assert_eq!(seq[..127].iter().filter(|&&b| b == 1).count(), 64);
    }

    #[test]
    fn test_whiten_is_involution() {
        let original: Vec<u8> = (0..300).map(|i| ((i * 7) % 3 == 0) as u8).collect();
        let mut bits = original.clone();
        whiten(&mut bits);
        assert_ne!(bits, original);
        whiten(&mut bits);
        assert_eq!(bits, original);
    }

    #[test]
    fn test_zero_seed_does_not_lock() {
        let mut s = Scrambler::new(0);
        assert!((0..20).any(|_| s.next_bit() == 1));
    }
}
