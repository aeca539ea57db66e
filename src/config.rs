//! Hardware configuration constants for the SP-STM sensor board on an ESP32-S3

/// Two-wire link to the CP board
pub mod link_pins {
    /// Bidirectional open-drain data line
    pub const SDA: u8 = 4;
    /// Clock, always driven by the CP
    pub const SCL: u8 = 5;
    /// Event line from the CP
    pub const INT: u8 = 6;
}

/// Soil sensor channels (index 0 is channel 1)
pub mod sensor_pins {
    /// Excitation outputs powering each sensor
    pub const EXCITE: [u8; 4] = [10, 11, 12, 13];
    /// Serial data inputs from each sensor
    pub const RX: [u8; 4] = [14, 15, 16, 17];
}

/// Link timing
pub mod link {
    /// Give up on a clock edge after this long without one
    pub const CLOCK_TIMEOUT_MS: u64 = 50;
}

/// Soil sensor timing and buffering
pub mod sensor {
    /// Number of sensor channels on the board
    pub const CHANNELS: usize = 4;

    /// Sensor serial baud rate
    pub const BAUD: u32 = 1200;

    /// One bit period at `BAUD`, rounded down
    pub const BIT_PERIOD_US: u64 = 1_000_000 / BAUD as u64;

    /// Level shifter warm-up after excitation
    pub const SETTLE_US: u64 = 12_500;

    /// Period of the wake-up timer rollover used as a timeout tick
    pub const ROLLOVER_MS: u64 = 16;

    /// Rollovers without a start bit before a measurement times out
    pub const MEASURE_TIMEOUT_ROLLOVERS: u8 = 10;

    /// Rollovers without a start bit before a type probe times out
    pub const TYPE_PROBE_TIMEOUT_ROLLOVERS: u8 = 3;

    /// Sensor reply buffer size
    pub const RX_BUFFER_SIZE: usize = 20;

    /// Registry value for a channel that has not been probed
    pub const UNKNOWN_SENSOR_TYPE: u8 = b'R';
}

/// Protocol constants
pub mod protocol {
    /// Largest frame on the wire, CRC included
    pub const MAX_MESSAGE_LEN: usize = 64;

    /// Type, length, version and flags bytes
    pub const HEADER_SIZE: usize = 4;

    /// Trailing CRC bytes
    pub const CRC_SIZE: usize = 2;

    /// Largest payload that fits a frame
    pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN - HEADER_SIZE - CRC_SIZE;

    /// Version byte on every frame except label reports
    pub const DATA_MESSAGE_VERSION: u8 = 120;

    /// Version byte on label reports
    pub const LABEL_MESSAGE_VERSION: u8 = 102;

    /// Transducer label width
    pub const LABEL_LEN: usize = 16;

    /// Bootstrap loader password width
    pub const BSL_PASSWORD_LEN: usize = 32;

    /// Cumulative byte failures after which a frame is abandoned
    pub const SEND_FAILURE_LIMIT: u8 = 5;

    /// Board name reported by interrogation
    pub const BOARD_NAME: [u8; 8] = [b'S', b'T', b'M', 0, 0, 0, 0, 0];

    /// Lowest supply (in hundredths of a volt) at which the board identifies normally
    pub const MIN_SUPPLY_CENTIVOLTS: u16 = 220;

    /// Error payload sent instead of the ID frame on a low supply
    pub const LOW_SUPPLY_ERROR: [u8; 2] = [0xBA, 0xD1];
}
