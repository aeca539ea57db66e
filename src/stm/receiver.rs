//! Software UART receive state machine
//!
//! Driven from outside: `start_bit()` on the falling edge that opens a
//! frame, then `on_tick()` with the sampled line level at each bit centre.
//! Eight data bits arrive LSB first, each landing in bit 7 before the byte
//! shifts right. The ninth tick is the stop bit and completes the byte.

use crate::config::sensor::RX_BUFFER_SIZE;
use heapless::Vec;

/// Receiver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Waiting for a start bit
    Idle,
    /// Sampling; `bits_left` counts down to the stop bit at 0
    Receiving { bits_left: u8 },
}

/// Bit-level receiver with its reply buffer
pub struct SoftUartRx {
    state: RxState,
    shift: u8,
    buffer: Vec<u8, RX_BUFFER_SIZE>,
}

impl SoftUartRx {
    pub fn new() -> Self {
        Self {
            state: RxState::Idle,
            shift: 0,
            buffer: Vec::new(),
        }
    }

    /// Current bit-level state
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Start a new reply
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.shift = 0;
        self.buffer.clear();
    }

    /// A start bit was seen
    pub fn start_bit(&mut self) {
        self.state = RxState::Receiving { bits_left: 8 };
    }

    /// Feed one sample. Returns the byte when its stop bit is reached.
    pub fn on_tick(&mut self, level: bool) -> Option<u8> {
        let RxState::Receiving { bits_left } = self.state else {
            return None;
        };

        if bits_left == 0 {
            self.state = RxState::Idle;
            let byte = self.shift;
            if self.buffer.push(byte).is_err() {
                log::warn!("Sensor reply overflow, dropped {:#04x}", byte);
            }
            return Some(byte);
        }

        if level {
            self.shift |= 0x80;
        } else {
            self.shift &= 0x7F;
        }
        if bits_left > 1 {
            self.shift >>= 1;
        }
        self.state = RxState::Receiving {
            bits_left: bits_left - 1,
        };
        None
    }

    /// Bytes received since the last reset
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// True once further bytes would be dropped
    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    /// Most recently stored byte
    pub fn last_byte(&self) -> Option<u8> {
        self.buffer.last().copied()
    }
}

impl Default for SoftUartRx {
    fn default() -> Self {
        Self::new()
    }
}
