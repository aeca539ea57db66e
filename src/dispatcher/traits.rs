//! Collaborators of the run loop
//!
//! The run loop owns the link protocol. Everything board-specific sits
//! behind these traits: the transducer application, the flash store for
//! the hardware ID and bootstrap password, and the supply measurement.

use crate::config::protocol::{BSL_PASSWORD_LEN, LABEL_LEN, MAX_PAYLOAD_LEN};
use core::future::Future;
use heapless::Vec;

/// Board serial number, four 16-bit words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareId(pub [u16; 4]);

impl HardwareId {
    /// Wire form, each word little-endian
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        for (chunk, word) in out.chunks_exact_mut(2).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let mut words = [0u16; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self(words)
    }
}

/// Errors from the flash store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Erase or program did not complete
    WriteFailed,
    /// The backing store cannot be written
    ReadOnly,
}

/// Non-volatile storage for identity data
pub trait Flash {
    fn hardware_id(&mut self) -> HardwareId;

    fn store_hardware_id(&mut self, id: &HardwareId) -> Result<(), FlashError>;

    fn bsl_password(&mut self) -> [u8; BSL_PASSWORD_LEN];
}

/// Supply voltage measurement
pub trait SupplyMonitor {
    /// Supply in hundredths of a volt
    fn supply_voltage(&mut self) -> u16;
}

/// Board application the run loop dispatches into
pub trait Application {
    /// Run transducer `id` with `params`. Non-zero is an error code.
    fn dispatch(&mut self, id: u8, params: &[u8]) -> impl Future<Output = u16>;

    /// Append `[slot, len, data...]` records for fresh data
    fn fetch_readings(&mut self, out: &mut Vec<u8, MAX_PAYLOAD_LEN>);

    fn fetch_label(&self, index: u8) -> [u8; LABEL_LEN];

    fn shutdown_allowed(&self) -> bool;

    fn num_transducers(&self) -> u8;

    fn transducer_type(&self, id: u8) -> u8;

    fn sample_duration(&self, id: u8) -> u8;

    /// Probe which sensor family sits on a channel
    fn request_sensor_type(&mut self, channel: u8) -> impl Future<Output = ()>;

    fn sensor_type(&self, channel: u8) -> u8;

    /// Woken by something other than the CP starting a transfer
    fn event_trigger(&mut self);
}
