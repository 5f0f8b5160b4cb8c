// Copyright 2025-2026 CEMAXECUTER LLC

//! Half-duplex transceiver: a pausable background receive loop and a
//! blocking transmit path sharing one radio.

pub mod config;
pub mod error;
pub mod gate;
pub mod transceiver;

pub use config::TransceiverConfig;
pub use error::{Error, Result};
pub use gate::{Checkpoint, GateState, Hold, PauseGate};
pub use transceiver::{PacketCallback, Transceiver, TransceiverStats};

pub use hdx_protocol::{DecodedPacket, PhyRate};
pub use hdx_sdr::DeviceParameters;
