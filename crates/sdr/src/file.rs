// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use num_complex::Complex32;

use crate::{DeviceParameters, Radio, RadioError};

/// IQ sample format for file input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Complex int8 (CS8): pairs of i8
    Ci8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Ci16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    #[default]
    Cf32,
}

impl SampleFormat {
    /// Bytes per complex sample
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::Ci8 => 2,
            SampleFormat::Ci16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }

    fn decode(self, raw: &[u8]) -> Complex32 {
        match self {
            SampleFormat::Ci8 => Complex32::new(
                raw[0] as i8 as f32 / 128.0,
                raw[1] as i8 as f32 / 128.0,
            ),
            SampleFormat::Ci16 => Complex32::new(
                i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
                i16::from_le_bytes([raw[2], raw[3]]) as f32 / 32768.0,
            ),
            SampleFormat::Cf32 => Complex32::new(
                f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            ),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ci8" | "cs8" => Ok(SampleFormat::Ci8),
            "ci16" | "cs16" => Ok(SampleFormat::Ci16),
            "cf32" | "fc32" => Ok(SampleFormat::Cf32),
            other => Err(RadioError::Config(format!("unknown sample format '{}'", other))),
        }
    }
}

/// IQ file radio: acquisition plays back a capture, transmitted bursts are
/// appended as CF32 to an optional output file.
///
/// Reaching the end of the capture disconnects the radio.
pub struct FileRadio {
    path: PathBuf,
    format: SampleFormat,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    sample_rate: f64,
    center_freq: f64,
    raw: Vec<u8>,
}

impl FileRadio {
    pub fn open(
        path: impl AsRef<Path>,
        format: SampleFormat,
        tx_path: Option<&Path>,
        params: &DeviceParameters,
    ) -> Result<Self, RadioError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| RadioError::Open(format!("failed to open {}: {}", path.display(), e)))?;

        let writer = match tx_path {
            Some(tx) => {
                let out = File::create(tx).map_err(|e| {
                    RadioError::Open(format!("failed to create {}: {}", tx.display(), e))
                })?;
                Some(BufWriter::new(out))
            }
            None => None,
        };

        log::info!(
            "reading IQ from {} ({:?}, {} S/s, {:.3} MHz)",
            path.display(),
            format,
            params.sample_rate,
            params.center_frequency / 1e6
        );

        Ok(Self {
            path,
            format,
            reader: Some(BufReader::with_capacity(1024 * 1024, file)),
            writer,
            sample_rate: params.sample_rate,
            center_freq: params.center_frequency,
            raw: Vec::new(),
        })
    }

    /// Parse `file=<path>[,format=<fmt>][,tx=<path>]`.
    pub fn from_address(address: &str, params: &DeviceParameters) -> Result<Self, RadioError> {
        let mut path = None;
        let mut format = SampleFormat::default();
        let mut tx_path = None;

        for part in address.split(',') {
            let part = part.trim();
            match part.split_once('=') {
                Some(("file", v)) => path = Some(PathBuf::from(v.trim())),
                Some(("format", v)) => format = v.trim().parse()?,
                Some(("tx", v)) => tx_path = Some(PathBuf::from(v.trim())),
                _ => {
                    return Err(RadioError::Config(format!(
                        "unexpected field '{}' in file address",
                        part
                    )))
                }
            }
        }

        let path = path.ok_or_else(|| RadioError::Config("file address without path".into()))?;
        Self::open(path, format, tx_path.as_deref(), params)
    }

    /// Fill `raw` from the reader; short only at end of file.
    fn read_raw(reader: &mut BufReader<File>, raw: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < raw.len() {
            match reader.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Radio for FileRadio {
    fn acquire_samples(
        &mut self,
        buf: &mut Vec<Complex32>,
        count: usize,
    ) -> Result<(), RadioError> {
        let reader = self.reader.as_mut().ok_or(RadioError::Closed)?;
        let size = self.format.sample_size();

        self.raw.resize(count * size, 0);
        let n = Self::read_raw(reader, &mut self.raw)
            .map_err(|e| RadioError::Transient(format!("read error: {}", e)))?;

        let samples = n / size;
        if samples == 0 {
            log::info!("end of file: {}", self.path.display());
            return Err(RadioError::Disconnected(format!(
                "end of file {}",
                self.path.display()
            )));
        }

        buf.clear();
        buf.extend(self.raw[..samples * size].chunks_exact(size).map(|raw| self.format.decode(raw)));
        Ok(())
    }

    fn transmit_burst(&mut self, burst: &[Complex32]) -> Result<(), RadioError> {
        if self.reader.is_none() {
            return Err(RadioError::Closed);
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RadioError::Transmit("no tx file configured".into()))?;

        let write_cf32 = |w: &mut BufWriter<File>| -> io::Result<()> {
            for s in burst {
                w.write_all(&s.re.to_le_bytes())?;
                w.write_all(&s.im.to_le_bytes())?;
            }
            w.flush()
        };
        write_cf32(writer).map_err(|e| RadioError::Transmit(e.to_string()))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            if let Some(mut w) = self.writer.take() {
                if let Err(e) = w.flush() {
                    log::warn!("flushing tx file: {}", e);
                }
            }
            log::info!("closed IQ file {}", self.path.display());
        }
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hdx-sdr-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_ci16_playback_until_eof() {
        let path = temp_path("ci16.iq");
        let mut bytes = Vec::new();
        for v in [16384i16, -16384, 0, 32767, -32768, 8192] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();

        let params = DeviceParameters::default();
        let address = format!("file={},format=ci16", path.display());
        let mut radio = FileRadio::from_address(&address, &params).unwrap();

        let mut buf = Vec::new();
        radio.acquire_samples(&mut buf, 2).unwrap();
        assert_eq!(buf, vec![Complex32::new(0.5, -0.5), Complex32::new(0.0, 32767.0 / 32768.0)]);
        radio.acquire_samples(&mut buf, 8).unwrap();
        assert_eq!(buf, vec![Complex32::new(-1.0, 0.25)]);
        assert!(matches!(
            radio.acquire_samples(&mut buf, 8),
            Err(RadioError::Disconnected(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_transmit_writes_cf32() {
        let rx = temp_path("rx.cf32");
        let tx = temp_path("tx.cf32");
        std::fs::write(&rx, [0u8; 16]).unwrap();

        let params = DeviceParameters::default();
        let mut radio = FileRadio::open(&rx, SampleFormat::Cf32, Some(&tx), &params).unwrap();
        radio
            .transmit_burst(&[Complex32::new(1.0, -0.5), Complex32::new(0.25, 0.0)])
            .unwrap();
        radio.close();

        let written = std::fs::read(&tx).unwrap();
        assert_eq!(written.len(), 16);
        assert_eq!(f32::from_le_bytes([written[4], written[5], written[6], written[7]]), -0.5);
        assert_eq!(radio.transmit_burst(&[]), Err(RadioError::Closed));

        std::fs::remove_file(&rx).ok();
        std::fs::remove_file(&tx).ok();
    }

    #[test]
    fn test_transmit_without_output_fails() {
        let rx = temp_path("notx.cf32");
        std::fs::write(&rx, [0u8; 8]).unwrap();
        let mut radio =
            FileRadio::open(&rx, SampleFormat::Cf32, None, &DeviceParameters::default()).unwrap();
        assert!(matches!(radio.transmit_burst(&[]), Err(RadioError::Transmit(_))));
        std::fs::remove_file(&rx).ok();
    }

    #[test]
    fn test_bad_addresses() {
        let params = DeviceParameters::default();
        assert!(matches!(
            FileRadio::from_address("file=/tmp/x,format=ci12", &params),
            Err(RadioError::Config(_))
        ));
        assert!(matches!(
            FileRadio::from_address("file=/tmp/x,gain=3", &params),
            Err(RadioError::Config(_))
        ));
    }
}
