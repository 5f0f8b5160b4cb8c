// Copyright 2025-2026 CEMAXECUTER LLC

//! Radio front ends for half-duplex operation.
//!
//! A [`Radio`] either acquires samples or transmits a burst; it never does
//! both at once. Callers serialize access themselves.

pub mod file;
pub mod loopback;
#[cfg(feature = "usrp")]
pub mod usrp;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

pub use file::{FileRadio, SampleFormat};
pub use loopback::{Air, LoopbackRadio};

pub const DEFAULT_CENTER_FREQ: f64 = 5.72e9;
pub const DEFAULT_SAMPLE_RATE: f64 = 5e6;
pub const DEFAULT_TX_GAIN: f64 = 20.0;
pub const DEFAULT_RX_GAIN: f64 = 20.0;
pub const DEFAULT_AMPLITUDE: f64 = 1.0;

/// Address that selects the in-process loopback radio.
pub const LOOPBACK_ADDRESS: &str = "loopback";

/// Errors reported by radio backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("failed to open radio: {0}")]
    Open(String),
    #[error("invalid radio configuration: {0}")]
    Config(String),
    /// Recoverable acquisition hiccup (timeout, overflow, short read)
    #[error("transient acquisition error: {0}")]
    Transient(String),
    #[error("radio disconnected: {0}")]
    Disconnected(String),
    #[error("burst transmission failed: {0}")]
    Transmit(String),
    #[error("radio is closed")]
    Closed,
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl RadioError {
    /// Fatal errors mean the radio will not produce samples again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RadioError::Disconnected(_) | RadioError::Closed)
    }
}

/// Front end configuration. Frequencies and rates in Hz, gains in dB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParameters {
    pub center_frequency: f64,
    pub sample_rate: f64,
    pub tx_gain: f64,
    pub rx_gain: f64,
    /// Digital TX scale applied to every burst, in (0, 1]
    pub amplitude: f64,
    /// Backend selector; empty lets UHD pick any attached device
    pub device_address: String,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            center_frequency: DEFAULT_CENTER_FREQ,
            sample_rate: DEFAULT_SAMPLE_RATE,
            tx_gain: DEFAULT_TX_GAIN,
            rx_gain: DEFAULT_RX_GAIN,
            amplitude: DEFAULT_AMPLITUDE,
            device_address: String::new(),
        }
    }
}

impl DeviceParameters {
    /// Receiver-style constructor; TX gain and amplitude keep their defaults.
    pub fn new(
        center_frequency: f64,
        sample_rate: f64,
        rx_gain: f64,
        device_address: impl Into<String>,
    ) -> Self {
        Self {
            center_frequency,
            sample_rate,
            rx_gain,
            device_address: device_address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RadioError> {
        if !(self.center_frequency.is_finite() && self.center_frequency > 0.0) {
            return Err(RadioError::Config(format!(
                "center frequency {} Hz",
                self.center_frequency
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(RadioError::Config(format!(
                "sample rate {} S/s",
                self.sample_rate
            )));
        }
        if !self.tx_gain.is_finite() || !self.rx_gain.is_finite() {
            return Err(RadioError::Config(format!(
                "gains tx={} rx={}",
                self.tx_gain, self.rx_gain
            )));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(RadioError::Config(format!(
                "amplitude {} outside (0, 1]",
                self.amplitude
            )));
        }
        Ok(())
    }
}

/// Common trait for all radio backends
pub trait Radio: Send {
    /// Replace the contents of `buf` with between 1 and `count` samples.
    fn acquire_samples(&mut self, buf: &mut Vec<Complex32>, count: usize)
        -> Result<(), RadioError>;

    /// Transmit one burst, returning once it has left the radio.
    fn transmit_burst(&mut self, burst: &[Complex32]) -> Result<(), RadioError>;

    /// Release the device. Later calls fail with [`RadioError::Closed`].
    fn close(&mut self);

    /// Sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Center frequency in Hz
    fn center_frequency(&self) -> f64;
}

impl<R: Radio + ?Sized> Radio for Box<R> {
    fn acquire_samples(
        &mut self,
        buf: &mut Vec<Complex32>,
        count: usize,
    ) -> Result<(), RadioError> {
        (**self).acquire_samples(buf, count)
    }

    fn transmit_burst(&mut self, burst: &[Complex32]) -> Result<(), RadioError> {
        (**self).transmit_burst(burst)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn sample_rate(&self) -> f64 {
        (**self).sample_rate()
    }

    fn center_frequency(&self) -> f64 {
        (**self).center_frequency()
    }
}

/// Open the radio selected by `params.device_address`:
///
/// - `loopback`: in-process loopback, TX bursts come back as RX samples
/// - `file=<rx path>[,format=cf32|ci16|ci8][,tx=<path>]`: IQ file playback
/// - anything else: UHD device arguments (requires the `usrp` feature)
pub fn open(params: &DeviceParameters) -> Result<Box<dyn Radio>, RadioError> {
    params.validate()?;
    let address = params.device_address.trim();

    if address == LOOPBACK_ADDRESS {
        log::info!("opening loopback radio at {} S/s", params.sample_rate);
        return Ok(Box::new(LoopbackRadio::new(params)));
    }

    if address.starts_with("file=") {
        return Ok(Box::new(FileRadio::from_address(address, params)?));
    }

    open_uhd(params)
}

#[cfg(feature = "usrp")]
fn open_uhd(params: &DeviceParameters) -> Result<Box<dyn Radio>, RadioError> {
    Ok(Box::new(usrp::UsrpRadio::open(params)?))
}

#[cfg(not(feature = "usrp"))]
fn open_uhd(params: &DeviceParameters) -> Result<Box<dyn Radio>, RadioError> {
    Err(RadioError::Open(format!(
        "no backend for device address '{}' (USRP support not compiled in)",
        params.device_address
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = DeviceParameters::default();
        assert_eq!(p.center_frequency, 5.72e9);
        assert_eq!(p.sample_rate, 5e6);
        assert_eq!(p.tx_gain, 20.0);
        assert_eq!(p.rx_gain, 20.0);
        assert_eq!(p.amplitude, 1.0);
        assert!(p.device_address.is_empty());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_raw_constructor_keeps_tx_defaults() {
        let p = DeviceParameters::new(2.4e9, 1e6, 30.0, "addr=192.168.10.2");
        assert_eq!(p.center_frequency, 2.4e9);
        assert_eq!(p.sample_rate, 1e6);
        assert_eq!(p.rx_gain, 30.0);
        assert_eq!(p.tx_gain, DEFAULT_TX_GAIN);
        assert_eq!(p.device_address, "addr=192.168.10.2");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            DeviceParameters { sample_rate: 0.0, ..Default::default() },
            DeviceParameters { center_frequency: f64::NAN, ..Default::default() },
            DeviceParameters { rx_gain: f64::INFINITY, ..Default::default() },
            DeviceParameters { amplitude: 1.5, ..Default::default() },
            DeviceParameters { amplitude: 0.0, ..Default::default() },
        ];
        for p in bad {
            assert!(matches!(p.validate(), Err(RadioError::Config(_))), "{:?}", p);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let p: DeviceParameters =
            serde_json::from_str(r#"{"center_frequency": 915e6, "device_address": "loopback"}"#)
                .unwrap();
        assert_eq!(p.center_frequency, 915e6);
        assert_eq!(p.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(p.device_address, LOOPBACK_ADDRESS);
    }

    #[test]
    fn test_open_routes_by_address() {
        let params = DeviceParameters {
            device_address: LOOPBACK_ADDRESS.into(),
            ..Default::default()
        };
        let radio = open(&params).unwrap();
        assert_eq!(radio.sample_rate(), DEFAULT_SAMPLE_RATE);

        let missing = DeviceParameters {
            device_address: "file=/nonexistent/hdx.cf32".into(),
            ..Default::default()
        };
        assert!(matches!(open(&missing), Err(RadioError::Open(_))));
    }

    #[cfg(not(feature = "usrp"))]
    #[test]
    fn test_open_without_uhd_fails() {
        let params = DeviceParameters::default();
        assert!(matches!(open(&params), Err(RadioError::Open(_))));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RadioError::Disconnected("usb".into()).is_fatal());
        assert!(RadioError::Closed.is_fatal());
        assert!(!RadioError::Transient("timeout".into()).is_fatal());
    }
}
