// Copyright 2025-2026 CEMAXECUTER LLC

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::{DeviceParameters, Radio, RadioError};

/// Shared medium between loopback radios. Transmitted bursts are queued here
/// and drained by acquisition.
#[derive(Debug, Clone, Default)]
pub struct Air {
    queue: Arc<Mutex<VecDeque<Complex32>>>,
}

impl Air {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue samples as if they had been received over the air.
    pub fn inject(&self, samples: &[Complex32]) {
        self.lock().extend(samples.iter().copied());
    }

    /// Samples waiting to be acquired.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Complex32>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_into(&self, buf: &mut Vec<Complex32>, count: usize) {
        let mut queue = self.lock();
        let n = queue.len().min(count);
        buf.extend(queue.drain(..n));
    }
}

/// In-process radio: every transmitted burst is received back, preceded and
/// followed by silence (optionally noisy). Acquisition is paced to the
/// configured sample rate so the receive loop behaves like it would on
/// hardware.
pub struct LoopbackRadio {
    air: Air,
    sample_rate: f64,
    center_freq: f64,
    noise: Option<(Normal<f32>, StdRng)>,
    pacing: bool,
    closed: bool,
}

impl LoopbackRadio {
    pub fn new(params: &DeviceParameters) -> Self {
        Self::with_air(params, Air::new())
    }

    /// Loopback sharing `air` with other radios or a test harness.
    pub fn with_air(params: &DeviceParameters, air: Air) -> Self {
        Self {
            air,
            sample_rate: params.sample_rate,
            center_freq: params.center_frequency,
            noise: None,
            pacing: true,
            closed: false,
        }
    }

    /// Add complex Gaussian noise with per-component standard deviation
    /// `std_dev` to every acquired sample.
    pub fn with_noise(mut self, std_dev: f32, seed: u64) -> Result<Self, RadioError> {
        let normal = Normal::new(0.0, std_dev)
            .map_err(|e| RadioError::Config(format!("noise std dev {}: {}", std_dev, e)))?;
        self.noise = Some((normal, StdRng::seed_from_u64(seed)));
        Ok(self)
    }

    /// Sleep for the block duration on each acquisition (default on).
    pub fn with_pacing(mut self, pacing: bool) -> Self {
        self.pacing = pacing;
        self
    }

    /// Handle to the shared medium
    pub fn air(&self) -> Air {
        self.air.clone()
    }
}

impl Radio for LoopbackRadio {
    fn acquire_samples(
        &mut self,
        buf: &mut Vec<Complex32>,
        count: usize,
    ) -> Result<(), RadioError> {
        if self.closed {
            return Err(RadioError::Closed);
        }
        if count == 0 {
            return Err(RadioError::Config("zero-length acquisition".into()));
        }

        buf.clear();
        self.air.drain_into(buf, count);
        buf.resize(count, Complex32::new(0.0, 0.0));

        if let Some((normal, rng)) = self.noise.as_mut() {
            for s in buf.iter_mut() {
                *s += Complex32::new(normal.sample(rng), normal.sample(rng));
            }
        }

        // No pacing without a usable rate
        if self.pacing && self.sample_rate.is_finite() && self.sample_rate > 0.0 {
            thread::sleep(Duration::from_secs_f64(count as f64 / self.sample_rate));
        }
        Ok(())
    }

    fn transmit_burst(&mut self, burst: &[Complex32]) -> Result<(), RadioError> {
        if self.closed {
            return Err(RadioError::Closed);
        }
        self.air.inject(burst);
        log::debug!("loopback: transmitted {} samples", burst.len());
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!("loopback radio closed");
        }
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}
