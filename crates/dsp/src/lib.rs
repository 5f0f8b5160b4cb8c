// Copyright 2025-2026 CEMAXECUTER LLC

pub mod correlator;
pub mod modulation;

pub use correlator::{Correlation, Detection, PreambleCorrelator};
pub use modulation::Modulation;
