// Copyright 2025-2026 CEMAXECUTER LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use hdx_protocol::{DecodedPacket, Frame, FrameBuilder, PhyRate, PipelineStats, ReceiverPipeline};
use hdx_sdr::{DeviceParameters, Radio, RadioError};
use num_complex::Complex32;

use crate::config::TransceiverConfig;
use crate::error::{Error, Result};
use crate::gate::{Checkpoint, PauseGate};

/// Receives the packets decoded from each sample block, possibly none.
/// Runs on the receive loop thread once per acquired block.
pub type PacketCallback = Box<dyn FnMut(Vec<DecodedPacket>) + Send>;

#[derive(Debug, Default)]
struct Counters {
    blocks: AtomicU64,
    packets: AtomicU64,
    acquisition_errors: AtomicU64,
    bursts_sent: AtomicU64,
}

/// Snapshot of transceiver activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransceiverStats {
    /// Sample blocks acquired by the receive loop
    pub blocks: u64,
    /// Packets delivered to the callback
    pub packets: u64,
    /// Failed acquisition attempts, retried or not
    pub acquisition_errors: u64,
    pub bursts_sent: u64,
    /// Detector and decoder counters as of the last processed block
    pub pipeline: PipelineStats,
}

/// State shared between the control side and the receive loop.
struct Shared {
    gate: PauseGate,
    radio: Mutex<Box<dyn Radio>>,
    received: Mutex<Vec<DecodedPacket>>,
    failure: Mutex<Option<Error>>,
    pipeline_stats: Mutex<PipelineStats>,
    counters: Counters,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Record the loop's terminal error; the first one wins.
    fn fail(&self, error: Error) {
        let mut slot = lock(&self.failure);
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

/// Marks the loop exited however its thread ends, so `pause` never waits
/// on a dead loop.
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail(Error::LoopPanicked);
        }
        self.0.gate.mark_exited();
    }
}

/// Half-duplex transceiver.
///
/// A background thread continuously acquires samples, decodes them and hands
/// the packets to the callback. [`send_frame`](Self::send_frame) parks that
/// thread, transmits a burst and lets it run again; the radio is never asked
/// to receive and transmit at the same time.
///
/// ```no_run
/// use hdx_sdr::DeviceParameters;
/// use hdx_transceiver::Transceiver;
///
/// let params = DeviceParameters {
///     device_address: "loopback".into(),
///     ..Default::default()
/// };
/// let trx = Transceiver::new(
///     |packets| {
///         for p in packets {
///             println!("{}", String::from_utf8_lossy(&p));
///         }
///     },
///     params,
/// )?;
/// trx.send(b"Hello World")?;
/// # Ok::<(), hdx_transceiver::Error>(())
/// ```
pub struct Transceiver {
    shared: Arc<Shared>,
    builder: FrameBuilder,
    tx_lock: Mutex<()>,
    handle: Option<JoinHandle<()>>,
}

impl Transceiver {
    /// Open the radio described by `params` and start receiving.
    pub fn new<F>(callback: F, params: DeviceParameters) -> Result<Self>
    where
        F: FnMut(Vec<DecodedPacket>) + Send + 'static,
    {
        let config = TransceiverConfig::for_device(&params);
        Self::with_config(callback, params, config)
    }

    pub fn with_config<F>(callback: F, params: DeviceParameters, config: TransceiverConfig) -> Result<Self>
    where
        F: FnMut(Vec<DecodedPacket>) + Send + 'static,
    {
        let radio = hdx_sdr::open(&params).map_err(Error::DeviceInit)?;
        Self::start(radio, Box::new(callback), config)
    }

    /// Start on an already opened radio.
    pub fn with_radio<R, F>(radio: R, callback: F, config: TransceiverConfig) -> Result<Self>
    where
        R: Radio + 'static,
        F: FnMut(Vec<DecodedPacket>) + Send + 'static,
    {
        Self::start(Box::new(radio), Box::new(callback), config)
    }

    fn start(
        mut radio: Box<dyn Radio>,
        callback: PacketCallback,
        config: TransceiverConfig,
    ) -> Result<Self> {
        if let Err(e) = validate(&config) {
            radio.close();
            return Err(Error::DeviceInit(e));
        }

        log::info!(
            "starting transceiver: {:.3} MHz, {} S/s, block size {}",
            radio.center_frequency() / 1e6,
            radio.sample_rate(),
            config.block_size
        );

        let shared = Arc::new(Shared {
            gate: PauseGate::new(),
            radio: Mutex::new(radio),
            received: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            pipeline_stats: Mutex::new(PipelineStats::default()),
            counters: Counters::default(),
        });

        let builder = FrameBuilder::with_amplitude(config.amplitude);
        let pipeline = ReceiverPipeline::with_threshold(config.detection_threshold);

        let loop_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("hdx-rx".to_string())
            .spawn(move || receive_loop(&loop_shared, pipeline, callback, &config));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                lock(&shared.radio).close();
                return Err(Error::Spawn(e.to_string()));
            }
        };

        Ok(Self {
            shared,
            builder,
            tx_lock: Mutex::new(()),
            handle: Some(handle),
        })
    }

    /// Park the receive loop. Returns once the loop has stopped touching the
    /// radio, or early if another thread resumes first. No-op if already
    /// paused.
    pub fn pause(&self) {
        if self.shared.gate.pause() {
            log::debug!("receive loop paused");
        }
    }

    /// Let a paused receive loop continue. No-op if running.
    pub fn resume(&self) {
        if self.shared.gate.resume() {
            log::debug!("receive loop resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    /// Send `payload` at the default rate (BPSK 1/2).
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(payload, PhyRate::default())
    }

    /// Transmit one frame and block until the burst has gone out.
    ///
    /// Holds the receive loop parked for the duration of the burst; a
    /// concurrent [`resume`](Self::resume) cannot release it early. The
    /// paused/running state seen by callers is left as it was. Build errors
    /// return before the radio is touched.
    pub fn send_frame(&self, payload: &[u8], rate: PhyRate) -> Result<()> {
        let frame = Frame::new(payload, rate);
        let burst = self.builder.build_frame(&frame)?;

        let _tx = lock(&self.tx_lock);
        let result = {
            let _hold = self.shared.gate.hold();
            self.transmit(&burst)
        };

        match result {
            Ok(()) => {
                self.shared.counters.bursts_sent.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "sent {} byte frame at {} ({} samples)",
                    frame.payload.len(),
                    frame.rate,
                    burst.len()
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("transmit of {} byte frame failed: {}", frame.payload.len(), e);
                Err(Error::Transmit(e))
            }
        }
    }

    fn transmit(&self, burst: &[Complex32]) -> std::result::Result<(), RadioError> {
        lock(&self.shared.radio).transmit_burst(burst)
    }

    /// Every packet decoded so far, in delivery order.
    pub fn received_packets(&self) -> Vec<DecodedPacket> {
        lock(&self.shared.received).clone()
    }

    /// `Err` once the receive loop has stopped on an unrecoverable error.
    pub fn health(&self) -> Result<()> {
        match lock(&self.shared.failure).as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> TransceiverStats {
        let c = &self.shared.counters;
        TransceiverStats {
            blocks: c.blocks.load(Ordering::Relaxed),
            packets: c.packets.load(Ordering::Relaxed),
            acquisition_errors: c.acquisition_errors.load(Ordering::Relaxed),
            bursts_sent: c.bursts_sent.load(Ordering::Relaxed),
            pipeline: *lock(&self.shared.pipeline_stats),
        }
    }

    /// Stop the receive loop, release the radio and report the loop's
    /// terminal error, if any.
    pub fn close(self) -> Result<()> {
        let health = self.health();
        drop(self);
        health
    }
}

impl Drop for Transceiver {
    fn drop(&mut self) {
        self.shared.gate.shutdown();
        if let Some(handle) = self.handle.take() {
            if self.shared.gate.is_loop_thread() {
                // Dropped from inside the callback; the loop exits at its next checkpoint
                log::warn!("transceiver dropped on its receive thread");
            } else if handle.join().is_err() {
                log::error!("receive loop panicked");
            }
        }
        lock(&self.shared.radio).close();
        log::info!("transceiver shut down");
    }
}

fn validate(config: &TransceiverConfig) -> std::result::Result<(), RadioError> {
    if config.block_size == 0 {
        return Err(RadioError::Config("block size must be positive".into()));
    }
    if !(config.amplitude > 0.0 && config.amplitude <= 1.0) {
        return Err(RadioError::Config(format!("amplitude {} outside (0, 1]", config.amplitude)));
    }
    if !(config.detection_threshold > 0.0 && config.detection_threshold <= 1.0) {
        return Err(RadioError::Config(format!(
            "detection threshold {} outside (0, 1]",
            config.detection_threshold
        )));
    }
    Ok(())
}

fn receive_loop(
    shared: &Shared,
    mut pipeline: ReceiverPipeline,
    mut callback: PacketCallback,
    config: &TransceiverConfig,
) {
    shared.gate.register_loop_thread();
    let _exit = ExitGuard(shared);
    let max_failures = config.max_acquisition_retries.max(1);
    let mut samples = Vec::with_capacity(config.block_size);
    let mut failures: u32 = 0;

    log::info!("receive loop started");

    while shared.gate.checkpoint() == Checkpoint::Proceed {
        let acquired = lock(&shared.radio).acquire_samples(&mut samples, config.block_size);

        if let Err(e) = acquired {
            shared.counters.acquisition_errors.fetch_add(1, Ordering::Relaxed);
            if e.is_fatal() {
                log::error!("receive loop stopping: {}", e);
                shared.fail(Error::DeviceLost(e));
                break;
            }

            failures += 1;
            let error = Error::Acquisition { attempts: failures, source: e.clone() };
            if failures >= max_failures {
                log::error!("{}: {}; giving up", error, e);
                shared.fail(Error::DeviceLost(e));
                break;
            }
            log::warn!("{}: {}", error, e);
            thread::sleep(config.retry_backoff);
            continue;
        }
        failures = 0;
        shared.counters.blocks.fetch_add(1, Ordering::Relaxed);

        let packets: Vec<DecodedPacket> = pipeline.process(&samples).collect();
        *lock(&shared.pipeline_stats) = pipeline.stats();

        if !packets.is_empty() {
            shared.counters.packets.fetch_add(packets.len() as u64, Ordering::Relaxed);
            lock(&shared.received).extend(packets.iter().cloned());
        }
        callback(packets);
    }

    log::info!("receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdx_sdr::LoopbackRadio;
    use std::time::Duration;

    fn loopback() -> LoopbackRadio {
        let params = DeviceParameters {
            device_address: hdx_sdr::LOOPBACK_ADDRESS.into(),
            ..Default::default()
        };
        LoopbackRadio::new(&params)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TransceiverConfig { block_size: 0, ..Default::default() };
        let result = Transceiver::with_radio(loopback(), |_| {}, config);
        assert!(matches!(result, Err(Error::DeviceInit(RadioError::Config(_)))));
    }

    #[test]
    fn test_build_error_leaves_loop_running() {
        let trx = Transceiver::with_radio(loopback(), |_| {}, TransceiverConfig::default()).unwrap();
        assert!(matches!(trx.send(&[]), Err(Error::InvalidPayload(_))));
        assert!(!trx.is_paused());
        assert_eq!(trx.stats().bursts_sent, 0);
    }

    #[test]
    fn test_callback_runs_for_every_block() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let trx = Transceiver::with_radio(
            loopback(),
            move |packets| {
                let _ = tx.send(packets.len());
            },
            TransceiverConfig::default(),
        )
        .unwrap();

        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        }
        assert!(trx.stats().blocks >= 3);
        assert!(trx.received_packets().is_empty());
    }

    #[test]
    fn test_loopback_delivery() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let trx = Transceiver::with_radio(
            loopback(),
            move |packets| {
                for p in packets {
                    let _ = tx.send(p);
                }
            },
            TransceiverConfig::default(),
        )
        .unwrap();

        trx.send_frame(b"ping", PhyRate::Qpsk1_2).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"ping".to_vec());
        assert_eq!(trx.received_packets(), vec![b"ping".to_vec()]);
        assert_eq!(trx.stats().bursts_sent, 1);
        assert!(trx.close().is_ok());
    }
}
