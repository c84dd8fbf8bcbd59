//! Daisy-chain addressing interface of a bus.
//!
//! Fans on a bus are addressed one after another: the daemon raises an
//! output line into the first fan and the last addressed fan answers on an
//! input line. [`AddressingCoordinator`] watches that input for level
//! changes and drives the output.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::bus::BusId;

/// Bit addressable digital I/O.
#[cfg_attr(test, mockall::automock)]
pub trait DigitalIo: Send + Sync {
    fn get_bit(&self, bit: u8) -> bool;

    fn set_bit(&self, bit: u8, on: bool);
}

/// Digital I/O image held in memory.
///
/// Stands in for the I/O card when none is attached. Clones share the
/// same image, so a test can flip inputs the coordinator reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryIo {
    bits: Arc<Mutex<u64>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    fn mask(bit: u8) -> u64 {
        1u64.checked_shl(u32::from(bit)).unwrap_or(0)
    }
}

impl DigitalIo for MemoryIo {
    fn get_bit(&self, bit: u8) -> bool {
        let bits = self.bits.lock().unwrap_or_else(|p| p.into_inner());
        *bits & Self::mask(bit) != 0
    }

    fn set_bit(&self, bit: u8, on: bool) {
        let mut bits = self.bits.lock().unwrap_or_else(|p| p.into_inner());
        if on {
            *bits |= Self::mask(bit);
        } else {
            *bits &= !Self::mask(bit);
        }
    }
}

/// Edge detector on the input of one daisy chain plus its output driver.
pub struct AddressingCoordinator {
    chain: BusId,
    io: Arc<dyn DigitalIo>,
    input_bit: u8,
    output_bit: u8,
    previous: bool,
}

impl AddressingCoordinator {
    pub fn new(chain: BusId, io: Arc<dyn DigitalIo>, input_bit: u8, output_bit: u8) -> Self {
        Self {
            chain,
            io,
            input_bit,
            output_bit,
            previous: false,
        }
    }

    pub fn chain(&self) -> BusId {
        self.chain
    }

    /// Samples the input and reports its new level if it changed since the
    /// previous sample. The level before the first sample is low.
    pub fn poll(&mut self) -> Option<bool> {
        let level = self.io.get_bit(self.input_bit);
        if level == self.previous {
            return None;
        }
        self.previous = level;
        debug!("Daisy chain {}: input went {}", self.chain, if level { "high" } else { "low" });
        Some(level)
    }

    pub fn set_output(&self, on: bool) {
        self.io.set_bit(self.output_bit, on);
    }
}
