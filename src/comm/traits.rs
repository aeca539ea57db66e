//! Link pin trait for abstraction and testability
//!
//! The CP drives the clock. The SP only ever waits on clock edges, and
//! shares the open-drain data line with the CP. This trait covers exactly
//! those primitives so the byte engine can run against real GPIO or a mock.

use core::future::Future;

/// Clock edge to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Data line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Released, the CP or the pull-up sets the level
    Input,
    /// Driven by the SP
    Output,
}

/// Why the board woke from low-power sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Data fell while the clock was high
    StartCondition,
    /// Any other wake source, such as the CP event line
    Event,
}

/// Errors raised by the pins themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The CP stopped clocking mid-transfer
    ClockTimeout,
}

/// Abstract link pin interface
pub trait LinkPins {
    /// Sleep until a start condition or another wake source
    fn sleep_until_wake(&mut self) -> impl Future<Output = Wake>;

    /// Wait for the next clock edge of the given polarity
    ///
    /// Clears any pending edge and re-arms the edge select before waiting.
    fn wait_for_clock(&mut self, edge: Edge) -> impl Future<Output = Result<(), BusError>>;

    /// Drive or release the data line
    fn set_data_direction(&mut self, direction: Direction);

    /// Level to drive while the data line is an output
    fn set_data(&mut self, high: bool);

    /// Sample the data line
    fn data_is_high(&mut self) -> bool;
}
