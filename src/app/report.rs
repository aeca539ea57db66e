//! Report slots
//!
//! Each data generator owns one slot. Slot 0 is the test generator; sensor
//! channel `n` writes soil moisture to slot `2n - 1` and temperature to
//! slot `2n`. A slot is reported while its `NEW_DATA` flag is set.

use crate::config::protocol::MAX_PAYLOAD_LEN;
use crate::stm::parser::SensorReading;
use crate::stm::sensor::MeasureOutcome;
use crate::stm::traits::Channel;
use heapless::Vec;

/// Number of data generators
pub const SLOT_COUNT: usize = 9;

/// Widest value a slot holds
pub const SLOT_DATA_LEN: usize = 4;

/// Slot flag: holds data not yet reported
pub const NEW_DATA: u8 = 0x01;

/// One data generator's latest value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSlot {
    /// Value bytes, big-endian, valid up to `len`
    pub data: [u8; SLOT_DATA_LEN],
    pub len: u8,
    /// `NEW_DATA` while unreported
    pub flags: u8,
}

impl ReportSlot {
    /// Valid bytes of `data`
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// True until the slot has been fetched
    pub fn is_new(&self) -> bool {
        self.flags & NEW_DATA != 0
    }
}

/// Soil moisture big-endian with redundant leading bytes dropped
///
/// A leading byte is dropped only while it is zero and the next byte's
/// top bit is clear, so the value keeps its sign when sign-extended.
fn trimmed(value: i32) -> ([u8; SLOT_DATA_LEN], u8) {
    let raw = value as u32;
    let mut len = 4u8;
    if raw & 0xFF80_0000 == 0 {
        len -= 1;
        if raw & 0x00FF_8000 == 0 {
            len -= 1;
            if raw & 0x0000_FF80 == 0 {
                len -= 1;
            }
        }
    }

    let shifted = raw << (8 * (4 - len as u32));
    (shifted.to_be_bytes(), len)
}

/// All report slots
#[derive(Debug, Clone, Default)]
pub struct ReportTable {
    slots: [ReportSlot; SLOT_COUNT],
}

impl ReportTable {
    /// Empty table, nothing to report
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot by generator index, `None` past the last slot
    pub fn slot(&self, index: usize) -> Option<&ReportSlot> {
        self.slots.get(index)
    }

    /// Overwrite a slot with up to four bytes and mark it new
    pub fn store(&mut self, index: usize, data: &[u8]) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        let len = data.len().min(SLOT_DATA_LEN);
        slot.data = [0; SLOT_DATA_LEN];
        slot.data[..len].copy_from_slice(&data[..len]);
        slot.len = len as u8;
        slot.flags = NEW_DATA;
    }

    /// Test pattern from transducer 0
    pub fn record_test(&mut self) {
        self.store(0, &[0xBE, 0xEF]);
    }

    /// Result of a measurement on `channel`
    ///
    /// A failed measurement puts its outcome code in both slots.
    pub fn record_measurement(
        &mut self,
        channel: Channel,
        outcome: MeasureOutcome,
        reading: SensorReading,
    ) {
        let soil = 2 * channel.number() as usize - 1;
        let temperature = soil + 1;

        match outcome {
            MeasureOutcome::Success => {
                let (data, len) = trimmed(reading.soil_moisture);
                self.store(soil, &data[..len as usize]);
                self.store(temperature, &reading.temperature.to_be_bytes());
            }
            failed => {
                self.store(soil, &[failed.code()]);
                self.store(temperature, &[failed.code()]);
            }
        }
    }

    /// Append `[slot, len, data...]` for every new slot and clear its flag
    ///
    /// Returns the number of bytes appended.
    pub fn fetch(&mut self, out: &mut Vec<u8, MAX_PAYLOAD_LEN>) -> usize {
        let start = out.len();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_new() {
                continue;
            }
            if out.len() + 2 + slot.len as usize > MAX_PAYLOAD_LEN {
                log::warn!("No room to report slot {}", index);
                break;
            }
            let _ = out.push(index as u8);
            let _ = out.push(slot.len);
            let _ = out.extend_from_slice(slot.bytes());
            slot.flags &= !NEW_DATA;
        }
        out.len() - start
    }
}
