// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;

use num_complex::Complex32;

use crate::{DeviceParameters, Radio, RadioError};

// UHD C API FFI bindings (manual, minimal)

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;

// Opaque handle types
type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdTxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;
type UhdTxMetadataHandle = *mut c_void;
type UhdAsyncMetadataHandle = *mut c_void;

// Tune request policy
const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;

// Stream modes
const UHD_STREAM_MODE_NUM_SAMPS_AND_DONE: c_int = 100;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;

// RX metadata error codes
const UHD_RX_METADATA_ERROR_CODE_NONE: c_int = 0x0;
const UHD_RX_METADATA_ERROR_CODE_TIMEOUT: c_int = 0x1;
const UHD_RX_METADATA_ERROR_CODE_OVERFLOW: c_int = 0x8;

// Async TX event codes
const UHD_ASYNC_METADATA_EVENT_CODE_BURST_ACK: c_int = 0x1;

/// Seconds to wait for samples or for a burst acknowledgement
const RECV_TIMEOUT: f64 = 1.0;
const SEND_TIMEOUT: f64 = 1.0;
/// Per-read timeout while flushing an aborted RX command
const DRAIN_TIMEOUT: f64 = 0.05;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
#[derive(Default)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    // USRP
    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_set_tx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_set_rx_gain(
        h: UhdUsrpHandle,
        gain: c_double,
        chan: usize,
        gain_name: *const c_char,
    ) -> UhdError;
    fn uhd_usrp_set_tx_gain(
        h: UhdUsrpHandle,
        gain: c_double,
        chan: usize,
        gain_name: *const c_char,
    ) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_set_tx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_get_rx_stream(
        h: UhdUsrpHandle,
        stream_args: *mut UhdStreamArgs,
        h_out: UhdRxStreamerHandle,
    ) -> UhdError;
    fn uhd_usrp_get_tx_stream(
        h: UhdUsrpHandle,
        stream_args: *mut UhdStreamArgs,
        h_out: UhdTxStreamerHandle,
    ) -> UhdError;

    // RX Streamer
    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(
        h: UhdRxStreamerHandle,
        stream_cmd: *const UhdStreamCmd,
    ) -> UhdError;

    // TX Streamer
    fn uhd_tx_streamer_make(h: *mut UhdTxStreamerHandle) -> UhdError;
    fn uhd_tx_streamer_free(h: *mut UhdTxStreamerHandle) -> UhdError;
    fn uhd_tx_streamer_max_num_samps(
        h: UhdTxStreamerHandle,
        max_num_samps_out: *mut usize,
    ) -> UhdError;
    fn uhd_tx_streamer_send(
        h: UhdTxStreamerHandle,
        buffs: *mut *const c_void,
        samps_per_buff: usize,
        md: *mut UhdTxMetadataHandle,
        timeout: c_double,
        items_sent: *mut usize,
    ) -> UhdError;
    fn uhd_tx_streamer_recv_async_msg(
        h: UhdTxStreamerHandle,
        md: *mut UhdAsyncMetadataHandle,
        timeout: c_double,
        valid: *mut bool,
    ) -> UhdError;

    // Metadata
    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_error_code(
        h: UhdRxMetadataHandle,
        error_code_out: *mut c_int,
    ) -> UhdError;
    fn uhd_tx_metadata_make(
        handle: *mut UhdTxMetadataHandle,
        has_time_spec: bool,
        full_secs: i64,
        frac_secs: c_double,
        start_of_burst: bool,
        end_of_burst: bool,
    ) -> UhdError;
    fn uhd_tx_metadata_free(handle: *mut UhdTxMetadataHandle) -> UhdError;
    fn uhd_async_metadata_make(handle: *mut UhdAsyncMetadataHandle) -> UhdError;
    fn uhd_async_metadata_free(handle: *mut UhdAsyncMetadataHandle) -> UhdError;
    fn uhd_async_metadata_event_code(
        h: UhdAsyncMetadataHandle,
        event_code_out: *mut c_int,
    ) -> UhdError;
}

fn check(err: UhdError, what: &str) -> Result<(), RadioError> {
    if err == UHD_ERROR_NONE {
        Ok(())
    } else {
        Err(RadioError::Config(format!("{} failed: error {}", what, err)))
    }
}

fn cstring(s: &str) -> Result<CString, RadioError> {
    CString::new(s).map_err(|e| RadioError::Config(format!("CString error: {}", e)))
}

/// Half-duplex USRP using the UHD C API, fc32 on the host side.
///
/// Acquisition issues a finite stream command per block, so nothing streams
/// while the radio is transmitting or idle.
pub struct UsrpRadio {
    usrp: UhdUsrpHandle,
    rx_handle: UhdRxStreamerHandle,
    tx_handle: UhdTxStreamerHandle,
    rx_md: UhdRxMetadataHandle,
    async_md: UhdAsyncMetadataHandle,
    max_tx_samps: usize,
    sample_rate: f64,
    center_freq: f64,
    overflow_count: u64,
    closed: bool,
}

// UHD handles are only used through &mut self
unsafe impl Send for UsrpRadio {}

impl UsrpRadio {
    /// Open the device named by `params.device_address` (UHD device
    /// arguments, empty for any device) and configure both chains.
    pub fn open(params: &DeviceParameters) -> Result<Self, RadioError> {
        let dev_args = cstring(&params.device_address)?;
        let empty = cstring("")?;
        let cpu_fmt = cstring("fc32")?;
        let otw_fmt = cstring("sc16")?;

        let mut radio = Self {
            usrp: ptr::null_mut(),
            rx_handle: ptr::null_mut(),
            tx_handle: ptr::null_mut(),
            rx_md: ptr::null_mut(),
            async_md: ptr::null_mut(),
            max_tx_samps: 0,
            sample_rate: params.sample_rate,
            center_freq: params.center_frequency,
            overflow_count: 0,
            closed: false,
        };

        log::info!("opening USRP args='{}'", params.device_address);

        unsafe {
            let err = uhd_usrp_make(&mut radio.usrp, dev_args.as_ptr());
            if err != UHD_ERROR_NONE {
                radio.usrp = ptr::null_mut();
                return Err(RadioError::Open(format!("uhd_usrp_make failed: error {}", err)));
            }

            // From here on, Drop releases whatever was created
            check(uhd_usrp_set_rx_rate(radio.usrp, params.sample_rate, 0), "set_rx_rate")?;
            check(uhd_usrp_set_tx_rate(radio.usrp, params.sample_rate, 0), "set_tx_rate")?;
            check(
                uhd_usrp_set_rx_gain(radio.usrp, params.rx_gain, 0, empty.as_ptr()),
                "set_rx_gain",
            )?;
            check(
                uhd_usrp_set_tx_gain(radio.usrp, params.tx_gain, 0, empty.as_ptr()),
                "set_tx_gain",
            )?;

            let mut tune_req = UhdTuneRequest {
                target_freq: params.center_frequency,
                rf_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
                rf_freq: 0.0,
                dsp_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
                dsp_freq: 0.0,
                args: ptr::null_mut(),
            };
            let mut rx_tune = UhdTuneResult::default();
            check(
                uhd_usrp_set_rx_freq(radio.usrp, &mut tune_req, 0, &mut rx_tune),
                "set_rx_freq",
            )?;
            let mut tx_tune = UhdTuneResult::default();
            check(
                uhd_usrp_set_tx_freq(radio.usrp, &mut tune_req, 0, &mut tx_tune),
                "set_tx_freq",
            )?;

            log::info!(
                "USRP tuned: RX RF={:.1} MHz, TX RF={:.1} MHz",
                rx_tune.actual_rf_freq / 1e6,
                tx_tune.actual_rf_freq / 1e6,
            );

            let mut channel: usize = 0;
            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu_fmt.as_ptr() as *mut c_char,
                otw_format: otw_fmt.as_ptr() as *mut c_char,
                args: empty.as_ptr() as *mut c_char,
                channel_list: &mut channel,
                n_channels: 1,
            };

            check(uhd_rx_streamer_make(&mut radio.rx_handle), "uhd_rx_streamer_make")?;
            check(
                uhd_usrp_get_rx_stream(radio.usrp, &mut stream_args, radio.rx_handle),
                "uhd_usrp_get_rx_stream",
            )?;
            check(uhd_rx_metadata_make(&mut radio.rx_md), "uhd_rx_metadata_make")?;

            check(uhd_tx_streamer_make(&mut radio.tx_handle), "uhd_tx_streamer_make")?;
            check(
                uhd_usrp_get_tx_stream(radio.usrp, &mut stream_args, radio.tx_handle),
                "uhd_usrp_get_tx_stream",
            )?;
            check(
                uhd_tx_streamer_max_num_samps(radio.tx_handle, &mut radio.max_tx_samps),
                "uhd_tx_streamer_max_num_samps",
            )?;
            check(uhd_async_metadata_make(&mut radio.async_md), "uhd_async_metadata_make")?;
        }

        log::info!(
            "USRP ready ({:.3} MHz, {} S/s, rx gain {} dB, tx gain {} dB)",
            params.center_frequency / 1e6,
            params.sample_rate,
            params.rx_gain,
            params.tx_gain,
        );

        Ok(radio)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn send_chunk(&mut self, chunk: &[Complex32], sob: bool, eob: bool) -> Result<(), RadioError> {
        let mut md: UhdTxMetadataHandle = ptr::null_mut();
        unsafe {
            let err = uhd_tx_metadata_make(&mut md, false, 0, 0.0, sob, eob);
            if err != UHD_ERROR_NONE {
                return Err(RadioError::Transmit(format!("uhd_tx_metadata_make: error {}", err)));
            }

            let mut buf_ptr = chunk.as_ptr() as *const c_void;
            let mut sent: usize = 0;
            let err = uhd_tx_streamer_send(
                self.tx_handle,
                &mut buf_ptr,
                chunk.len(),
                &mut md,
                SEND_TIMEOUT,
                &mut sent,
            );
            uhd_tx_metadata_free(&mut md);

            if err != UHD_ERROR_NONE {
                return Err(RadioError::Transmit(format!("uhd_tx_streamer_send: error {}", err)));
            }
            if sent != chunk.len() {
                return Err(RadioError::Transmit(format!(
                    "sent {} of {} samples",
                    sent,
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    /// Wait until the device reports the end of the burst.
    fn wait_burst_ack(&mut self) -> Result<(), RadioError> {
        loop {
            let mut valid = false;
            let mut event: c_int = 0;
            unsafe {
                let err = uhd_tx_streamer_recv_async_msg(
                    self.tx_handle,
                    &mut self.async_md,
                    SEND_TIMEOUT,
                    &mut valid,
                );
                if err != UHD_ERROR_NONE {
                    return Err(RadioError::Transmit(format!("recv_async_msg: error {}", err)));
                }
                if !valid {
                    return Err(RadioError::Transmit("no burst acknowledgement".into()));
                }
                uhd_async_metadata_event_code(self.async_md, &mut event);
            }
            if event == UHD_ASYNC_METADATA_EVENT_CODE_BURST_ACK {
                return Ok(());
            }
            log::warn!("USRP async TX event 0x{:x}", event);
        }
    }

    /// Stop the current RX command and discard up to `pending` samples still
    /// in flight from it.
    fn abort_rx(&mut self, pending: usize) {
        let stop = UhdStreamCmd {
            stream_mode: UHD_STREAM_MODE_STOP_CONTINUOUS,
            num_samps: 0,
            stream_now: true,
            time_spec_full_secs: 0,
            time_spec_frac_secs: 0.0,
        };
        let mut scratch = vec![Complex32::new(0.0, 0.0); pending.clamp(1, 8192)];
        let mut drained = 0usize;
        unsafe {
            let err = uhd_rx_streamer_issue_stream_cmd(self.rx_handle, &stop);
            if err != UHD_ERROR_NONE {
                log::warn!("USRP: stopping RX stream failed: error {}", err);
            }
            while drained < pending {
                let mut buf_ptr = scratch.as_mut_ptr() as *mut c_void;
                let mut num_rx: usize = 0;
                let err = uhd_rx_streamer_recv(
                    self.rx_handle,
                    &mut buf_ptr,
                    scratch.len(),
                    &mut self.rx_md,
                    DRAIN_TIMEOUT,
                    false,
                    &mut num_rx,
                );
                if err != UHD_ERROR_NONE || num_rx == 0 {
                    break;
                }
                drained += num_rx;
            }
        }
        log::debug!("USRP: discarded {} samples of an aborted RX command", drained);
    }
}

impl Radio for UsrpRadio {
    fn acquire_samples(
        &mut self,
        buf: &mut Vec<Complex32>,
        count: usize,
    ) -> Result<(), RadioError> {
        if self.closed {
            return Err(RadioError::Closed);
        }

        buf.clear();
        buf.resize(count, Complex32::new(0.0, 0.0));

        let stream_cmd = UhdStreamCmd {
            stream_mode: UHD_STREAM_MODE_NUM_SAMPS_AND_DONE,
            num_samps: count,
            stream_now: true,
            time_spec_full_secs: 0,
            time_spec_frac_secs: 0.0,
        };

        let mut received = 0usize;
        unsafe {
            let err = uhd_rx_streamer_issue_stream_cmd(self.rx_handle, &stream_cmd);
            if err != UHD_ERROR_NONE {
                return Err(RadioError::Disconnected(format!(
                    "uhd_rx_streamer_issue_stream_cmd: error {}",
                    err
                )));
            }

            while received < count {
                let mut buf_ptr = buf[received..].as_mut_ptr() as *mut c_void;
                let mut num_rx: usize = 0;
                let err = uhd_rx_streamer_recv(
                    self.rx_handle,
                    &mut buf_ptr,
                    count - received,
                    &mut self.rx_md,
                    RECV_TIMEOUT,
                    false,
                    &mut num_rx,
                );
                if err != UHD_ERROR_NONE {
                    return Err(RadioError::Disconnected(format!(
                        "uhd_rx_streamer_recv: error {}",
                        err
                    )));
                }

                let mut error_code: c_int = 0;
                uhd_rx_metadata_error_code(self.rx_md, &mut error_code);
                let failure = match error_code {
                    UHD_RX_METADATA_ERROR_CODE_NONE => None,
                    UHD_RX_METADATA_ERROR_CODE_OVERFLOW => {
                        self.overflow_count += 1;
                        Some(RadioError::Transient("overflow".into()))
                    }
                    UHD_RX_METADATA_ERROR_CODE_TIMEOUT => {
                        Some(RadioError::Transient("receive timeout".into()))
                    }
                    other => Some(RadioError::Transient(format!("rx metadata error 0x{:x}", other))),
                };
                if let Some(e) = failure {
                    // Whatever is left of this command must not lead the next block
                    self.abort_rx(count - received);
                    return Err(e);
                }

                if num_rx == 0 {
                    break;
                }
                received += num_rx;
            }
        }

        if received == 0 {
            return Err(RadioError::Transient("no samples received".into()));
        }
        buf.truncate(received);
        Ok(())
    }

    fn transmit_burst(&mut self, burst: &[Complex32]) -> Result<(), RadioError> {
        if self.closed {
            return Err(RadioError::Closed);
        }
        if burst.is_empty() {
            return Ok(());
        }

        let chunk_len = self.max_tx_samps.max(1);
        let chunks = burst.len().div_ceil(chunk_len);
        for (i, chunk) in burst.chunks(chunk_len).enumerate() {
            self.send_chunk(chunk, i == 0, i + 1 == chunks)?;
        }
        self.wait_burst_ack()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        unsafe {
            if !self.async_md.is_null() {
                uhd_async_metadata_free(&mut self.async_md);
            }
            if !self.rx_md.is_null() {
                uhd_rx_metadata_free(&mut self.rx_md);
            }
            if !self.tx_handle.is_null() {
                uhd_tx_streamer_free(&mut self.tx_handle);
            }
            if !self.rx_handle.is_null() {
                uhd_rx_streamer_free(&mut self.rx_handle);
            }
            if !self.usrp.is_null() {
                uhd_usrp_free(&mut self.usrp);
            }
        }

        if self.overflow_count > 0 {
            log::warn!("USRP: {} overflows during capture", self.overflow_count);
        }
        log::info!("USRP closed");
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

impl Drop for UsrpRadio {
    fn drop(&mut self) {
        self.close();
    }
}
