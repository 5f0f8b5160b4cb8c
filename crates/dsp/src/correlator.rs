// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

/// Samples after a threshold crossing that are searched for a larger peak.
pub const PEAK_SEARCH: usize = 8;

/// Windows with less energy than this are treated as silence.
const MIN_WINDOW_ENERGY: f32 = 1e-12;

/// Correlation of one window against the template.
#[derive(Debug, Clone, Copy)]
pub struct Correlation {
    /// Normalized metric in [0, 1]; 1.0 is a perfect (scaled, rotated) match
    pub metric: f32,
    /// Raw complex correlation sum
    pub value: Complex32,
}

/// Outcome of scanning a sample buffer for the template.
#[derive(Debug, Clone, Copy)]
pub enum Detection {
    /// No match. The first `consumed` samples can never start a match.
    None { consumed: usize },
    /// A threshold crossing at `start`, but not enough lookahead yet to
    /// confirm the peak.
    Pending { start: usize },
    /// Template found starting at `offset`.
    Found { offset: usize, correlation: Correlation },
}

/// Normalized sliding correlator for a known complex preamble.
///
/// metric = |sum(x * conj(p))|^2 / (|p|^2 * |x|^2), which is insensitive to
/// received amplitude and carrier phase.
pub struct PreambleCorrelator {
    template: Vec<Complex32>,
    template_energy: f32,
}

impl PreambleCorrelator {
    pub fn new(template: Vec<Complex32>) -> Self {
        assert!(!template.is_empty(), "correlator template must not be empty");
        let template_energy = template.iter().map(|t| t.norm_sqr()).sum();
        Self {
            template,
            template_energy,
        }
    }

    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// Correlate the template against `window[..len()]`.
    pub fn correlate(&self, window: &[Complex32]) -> Correlation {
        let mut value = Complex32::new(0.0, 0.0);
        let mut energy = 0.0f32;
        for (&x, &p) in window.iter().zip(&self.template) {
            value += x * p.conj();
            energy += x.norm_sqr();
        }
        let metric = if energy > MIN_WINDOW_ENERGY {
            value.norm_sqr() / (self.template_energy * energy)
        } else {
            0.0
        };
        Correlation { metric, value }
    }

    /// Complex channel gain implied by a correlation (amplitude and phase).
    pub fn channel_estimate(&self, correlation: &Correlation) -> Complex32 {
        correlation.value / self.template_energy
    }

    /// Scan `samples` for the first template occurrence above `threshold`.
    ///
    /// After the first crossing the next `PEAK_SEARCH` offsets are checked and
    /// the strongest one wins, so a ramping metric does not trigger early.
    pub fn detect(&self, samples: &[Complex32], threshold: f32) -> Detection {
        let len = self.template.len();
        if samples.len() < len {
            return Detection::None { consumed: 0 };
        }
        let last = samples.len() - len;

        for start in 0..=last {
            let first = self.correlate(&samples[start..start + len]);
            if first.metric < threshold {
                continue;
            }
            if start + PEAK_SEARCH > last {
                return Detection::Pending { start };
            }

            let mut best = (start, first);
            for offset in start + 1..=start + PEAK_SEARCH {
                let c = self.correlate(&samples[offset..offset + len]);
                if c.metric > best.1.metric {
                    best = (offset, c);
                }
            }
            return Detection::Found {
                offset: best.0,
                correlation: best.1,
            };
        }

        Detection::None { consumed: last + 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pn_template(len: usize) -> Vec<Complex32> {
        let mut state: u8 = 0x5B;
        (0..len)
            .map(|_| {
                let bit = ((state >> 6) ^ (state >> 5)) & 1;
                state = ((state << 1) | bit) & 0x7F;
                Complex32::new(if bit == 1 { -1.0 } else { 1.0 }, 0.0)
            })
            .collect()
    }

    #[test]
    fn test_perfect_match_metric() {
        let template = pn_template(64);
        let corr = PreambleCorrelator::new(template.clone());
        let rotated: Vec<Complex32> = template
            .iter()
            .map(|&t| t * Complex32::from_polar(0.3, 1.1))
            .collect();
        let c = corr.correlate(&rotated);
        assert!((c.metric - 1.0).abs() < 1e-4, "metric {}", c.metric);

        let h = corr.channel_estimate(&c);
        assert!((h.norm() - 0.3).abs() < 1e-4);
        assert!((h.arg() - 1.1).abs() < 1e-4);
    }

    #[test]
    fn test_detect_finds_offset() {
        let template = pn_template(64);
        let corr = PreambleCorrelator::new(template.clone());
        let mut samples = vec![Complex32::new(0.0, 0.0); 100];
        samples.extend_from_slice(&template);
        samples.extend(std::iter::repeat(Complex32::new(1.0, 0.0)).take(50));

        match corr.detect(&samples, 0.6) {
            Detection::Found { offset, correlation } => {
                assert_eq!(offset, 100);
                assert!(correlation.metric > 0.99);
            }
            other => panic!("expected detection, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_silence_consumes() {
        let corr = PreambleCorrelator::new(pn_template(64));
        let samples = vec![Complex32::new(0.0, 0.0); 200];
        match corr.detect(&samples, 0.6) {
            Detection::None { consumed } => assert_eq!(consumed, 200 - 64 + 1),
            other => panic!("expected no detection, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_pending_without_lookahead() {
        let template = pn_template(64);
        let corr = PreambleCorrelator::new(template.clone());
        let mut samples = vec![Complex32::new(0.0, 0.0); 10];
        samples.extend_from_slice(&template);
        match corr.detect(&samples, 0.6) {
            Detection::Pending { start } => assert!(start <= 10),
            other => panic!("expected pending, got {:?}", other),
        }
    }
}
