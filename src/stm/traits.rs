//! Soil sensor bus trait for abstraction and testability
//!
//! Each channel has an excitation output that powers the sensor and a
//! serial input it answers on. The timer and edge interrupt behind the
//! software UART are reduced to the waits below.

use crate::config::sensor::CHANNELS;
use core::future::Future;

/// Sensor channel, numbered 1 to 4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(u8);

impl Channel {
    /// Channel `number`, if the board has it
    pub fn new(number: u8) -> Option<Self> {
        if (1..=CHANNELS as u8).contains(&number) {
            Some(Self(number))
        } else {
            None
        }
    }

    /// Channel number as printed on the board
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Zero-based index for per-channel tables
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// Every channel in order
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNELS as u8).map(Channel)
    }
}

/// Why a sleeping measurement woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEvent {
    /// Falling edge on the armed input
    StartBit,
    /// Wake-up timer rolled over
    Rollover,
}

/// Abstract sensor bus interface
pub trait SensorBus {
    /// Power a sensor on or off
    fn set_excitation(&mut self, channel: Channel, on: bool);

    /// Arm or disarm the start-bit edge interrupt on a channel input
    fn set_rx_interrupt(&mut self, channel: Channel, enabled: bool);

    /// Wait for the level shifter to settle after excitation
    fn settle(&mut self) -> impl Future<Output = ()>;

    /// Sleep until a start bit or a timer rollover
    fn sleep(&mut self) -> impl Future<Output = SensorEvent>;

    /// Wait for the next mid-bit sample point after a start bit
    fn wait_bit_tick(&mut self) -> impl Future<Output = ()>;

    /// Sample a channel input
    fn rx_is_high(&mut self, channel: Channel) -> bool;
}
