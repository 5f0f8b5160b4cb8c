// Copyright 2025-2026 CEMAXECUTER LLC

//! Burst PHY: frame construction on the transmit side and the detection and
//! decoding pipeline on the receive side.

pub mod builder;
pub mod crc;
pub mod error;
pub mod fec;
pub mod frame;
pub mod rate;
pub mod receiver;
pub mod scrambler;

pub use builder::FrameBuilder;
pub use error::PhyError;
pub use frame::{Frame, Header, MAX_PAYLOAD_LEN};
pub use rate::{CodeRate, PhyRate};
pub use receiver::{DecodedPacket, Packets, PipelineStats, ReceiverPipeline};
