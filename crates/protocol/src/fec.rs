// Copyright 2025-2026 CEMAXECUTER LLC

use crate::rate::CodeRate;

/// Forward error correction for header and payload.
///
/// Convolutional code, rate 1/2, constraint length K=7 (6 memory bits, 64
/// trellis states), generators g0 = 133o and g1 = 171o in register layout.
/// Higher rates are obtained by puncturing the rate-1/2 stream; erased
/// positions are re-inserted as zero-confidence soft values before decoding.

/// Number of memory bits in the shift register.
pub const FEC_MEM: usize = 6;
/// Number of trellis states (2^FEC_MEM).
const FEC_STATES: usize = 1 << FEC_MEM;
/// g0 = 133o = 0b1011011
const G0: u8 = 0o133;
/// g1 = 171o = 0b1111001
const G1: u8 = 0o171;

/// Compute parity of a byte (XOR of all bits).
#[inline]
fn parity(x: u8) -> u8 {
    let mut p = x;
    p ^= p >> 4;
    p ^= p >> 2;
    p ^= p >> 1;
    p & 1
}

/// Length of the rate-1/2 coded stream for `data_bits` input bits,
/// including the flush tail.
pub fn coded_len(data_bits: usize) -> usize {
    2 * (data_bits + FEC_MEM)
}

/// Convolutional encode. Produces `coded_len(data.len())` coded bits; the
/// trailing FEC_MEM zero bits terminate the trellis in state 0.
pub fn conv_encode(data: &[u8]) -> Vec<u8> {
    let mut coded = Vec::with_capacity(coded_len(data.len()));
    let mut state: u8 = 0;
    let state_mask = (1u8 << FEC_MEM) - 1;

    for input in data.iter().map(|&b| b & 1).chain(std::iter::repeat(0).take(FEC_MEM)) {
        let reg = (input << FEC_MEM) | state;
        coded.push(parity(reg & G0));
        coded.push(parity(reg & G1));
        state = ((input << (FEC_MEM - 1)) | (state >> 1)) & state_mask;
    }

    coded
}

/// Number of bits that survive puncturing of a `coded` length stream.
pub fn punctured_len(coded: usize, rate: CodeRate) -> usize {
    let pattern = rate.puncture_pattern();
    let kept_per_period = pattern.iter().filter(|&&k| k == 1).count();
    let remainder = pattern[..coded % pattern.len()]
        .iter()
        .filter(|&&k| k == 1)
        .count();
    coded / pattern.len() * kept_per_period + remainder
}

/// Drop coded bits according to the rate's puncture pattern.
pub fn puncture(coded: &[u8], rate: CodeRate) -> Vec<u8> {
    let pattern = rate.puncture_pattern();
    coded
        .iter()
        .zip(pattern.iter().cycle())
        .filter(|(_, &keep)| keep == 1)
        .map(|(&bit, _)| bit)
        .collect()
}

/// Re-insert erased positions as 0.0 so the stream is rate-1/2 again.
/// `coded` is the unpunctured length; missing soft values are also treated
/// as erasures.
pub fn depuncture(soft: &[f32], rate: CodeRate, coded: usize) -> Vec<f32> {
    let pattern = rate.puncture_pattern();
    let mut out = Vec::with_capacity(coded);
    let mut input = soft.iter();
    for &keep in pattern.iter().cycle().take(coded) {
        if keep == 1 {
            out.push(input.next().copied().unwrap_or(0.0));
        } else {
            out.push(0.0);
        }
    }
    out
}

/// Pre-computed branch info for Viterbi decoder.
#[derive(Clone, Copy)]
struct Branch {
    next_state: u8,
    c0: u8,
    c1: u8,
}

/// Build the branch table for the K=7 convolutional code.
/// Returns branches[state][input] for all 64 states x 2 inputs.
fn build_branch_table() -> [[Branch; 2]; FEC_STATES] {
    let mut branches = [[Branch { next_state: 0, c0: 0, c1: 0 }; 2]; FEC_STATES];
    let state_mask = (1u8 << FEC_MEM) - 1;

    for state in 0u8..(FEC_STATES as u8) {
        for input in 0u8..2 {
            let reg = (input << FEC_MEM) | state;
            let c0 = parity(reg & G0);
            let c1 = parity(reg & G1);
            let next_state = ((input << (FEC_MEM - 1)) | (state >> 1)) & state_mask;
            branches[state as usize][input as usize] = Branch { next_state, c0, c1 };
        }
    }
    branches
}

/// Soft-decision Viterbi decoder with forced termination to state 0.
///
/// `soft_coded` holds pairs (c0, c1); positive means the coded bit is more
/// likely 0, zero is an erasure. Returns the decoded bits (including the
/// flush tail) and the path metric of state 0.
pub fn viterbi_decode_terminated(soft_coded: &[f32]) -> (Vec<u8>, f32) {
    let n_pairs = soft_coded.len() / 2;
    if n_pairs == 0 {
        return (Vec::new(), f32::NEG_INFINITY);
    }

    let branches = build_branch_table();

    let mut pm = [f32::NEG_INFINITY; FEC_STATES];
    pm[0] = 0.0;

    // Traceback entry: (prev_state << 1) | input
    let mut traceback = vec![[0u8; FEC_STATES]; n_pairs];

    for step in 0..n_pairs {
        let s0 = soft_coded[step * 2];
        let s1 = soft_coded[step * 2 + 1];

        let mut pm_new = [f32::NEG_INFINITY; FEC_STATES];
        let tb_step = &mut traceback[step];

        for state in 0..(FEC_STATES as u8) {
            if pm[state as usize] == f32::NEG_INFINITY {
                continue;
            }
            for input in 0u8..2 {
                let br = &branches[state as usize][input as usize];
                let bm0 = if br.c0 == 0 { s0 } else { -s0 };
                let bm1 = if br.c1 == 0 { s1 } else { -s1 };
                let metric = pm[state as usize] + bm0 + bm1;

                let ns = br.next_state as usize;
                if metric > pm_new[ns] {
                    pm_new[ns] = metric;
                    tb_step[ns] = (state << 1) | input;
                }
            }
        }

        pm = pm_new;
    }

    let state0_metric = pm[0];

    let mut decoded = vec![0u8; n_pairs];
    let mut state: u8 = 0;
    for step in (0..n_pairs).rev() {
        let entry = traceback[step][state as usize];
        decoded[step] = entry & 1;
        state = entry >> 1;
    }

    (decoded, state0_metric)
}

/// Decode `data_bits` bits from a punctured soft stream.
pub fn decode(soft: &[f32], rate: CodeRate, data_bits: usize) -> Vec<u8> {
    let full = depuncture(soft, rate, coded_len(data_bits));
    let (mut bits, _) = viterbi_decode_terminated(&full);
    bits.truncate(data_bits);
    bits
}
