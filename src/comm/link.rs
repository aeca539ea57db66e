//! Clock-slave byte engine for the CP link
//!
//! Each byte is nine bits LSB first, the ninth being even parity, followed
//! by an acknowledge bit from the receiver. The CP clocks every bit. The SP
//! puts data on the line while the clock is high and it is latched on the
//! falling edge. Received bits are sampled on the rising edge.

use crate::comm::traits::{BusError, Direction, Edge, LinkPins, Wake};
use crate::config::protocol::{CRC_SIZE, HEADER_SIZE, MAX_MESSAGE_LEN, SEND_FAILURE_LIMIT};
use crate::protocol::crc::{self, CrcMode};
use crate::protocol::frame::{index, MessageBuffer};
use heapless::Vec;

/// Link status bits
pub mod status {
    pub const RUNNING: u8 = 0x01;
    pub const TX_BUSY: u8 = 0x02;
    pub const RX_BUSY: u8 = 0x04;
    /// Sticky until cleared
    pub const PARITY_ERR: u8 = 0x08;
    pub const START_CONDITION: u8 = 0x10;
}

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommError {
    /// A transfer in that direction is already in progress
    Busy,
    /// The peer did not acknowledge a byte
    AckError,
    /// Not enough bytes buffered for the requested message
    BufferUnderflow,
    /// Receive buffer full
    BufferOverflow,
    /// Declared message length outside the frame limits
    LengthOutOfRange,
    /// Message CRC did not match
    CrcMismatch,
    /// The CP stopped clocking
    ClockTimeout,
}

impl CommError {
    /// One-byte code reported to the CP
    pub fn code(&self) -> u8 {
        match self {
            CommError::BufferUnderflow => 0x01,
            CommError::BufferOverflow => 0x02,
            CommError::Busy
            | CommError::LengthOutOfRange
            | CommError::CrcMismatch
            | CommError::ClockTimeout => 0x04,
            CommError::AckError => 0x10,
        }
    }
}

impl From<BusError> for CommError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::ClockTimeout => CommError::ClockTimeout,
        }
    }
}

/// Even parity bit: set when `byte` has an odd number of ones
fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 1
}

/// CP link driver
pub struct CommLink<P: LinkPins> {
    pins: P,
    status: u8,
    rx: Vec<u8, MAX_MESSAGE_LEN>,
}

impl<P: LinkPins> CommLink<P> {
    /// Take over the pins with the data line released
    pub fn new(mut pins: P) -> Self {
        pins.set_data_direction(Direction::Input);
        Self {
            pins,
            status: status::RUNNING,
            rx: Vec::new(),
        }
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status & status::RUNNING != 0
    }

    /// True if any byte since the last clear arrived with bad parity
    pub fn parity_error(&self) -> bool {
        self.status & status::PARITY_ERR != 0
    }

    pub fn clear_parity_error(&mut self) {
        self.status &= !status::PARITY_ERR;
    }

    /// Bytes buffered so far
    pub fn received(&self) -> &[u8] {
        &self.rx
    }

    /// Drop buffered bytes and busy flags left by an abandoned transfer
    pub fn reset(&mut self) {
        self.rx.clear();
        self.status &= !(status::TX_BUSY | status::RX_BUSY);
        self.pins.set_data_direction(Direction::Input);
    }

    /// Stop the link and pull the data line low
    pub fn shutdown(&mut self) {
        self.status &= !status::RUNNING;
        self.pins.set_data(false);
        self.pins.set_data_direction(Direction::Output);
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Sleep until woken. Returns `true` for a start condition, after the
    /// clock has dropped for the first bit; `false` for any other wake.
    pub async fn wait_for_start_condition(&mut self) -> bool {
        self.status &= !status::START_CONDITION;

        if self.pins.sleep_until_wake().await == Wake::Event {
            return false;
        }
        self.status |= status::START_CONDITION;

        if let Err(error) = self.pins.wait_for_clock(Edge::Falling).await {
            log::warn!("Start condition without clock: {:?}", error);
            return false;
        }
        true
    }

    /// Clock one byte out to the CP
    pub async fn send_byte(&mut self, byte: u8) -> Result<(), CommError> {
        if self.status & status::TX_BUSY != 0 {
            return Err(CommError::Busy);
        }
        self.status |= status::TX_BUSY;

        let result = self.clock_out(byte).await;

        self.pins.set_data_direction(Direction::Input);
        self.status &= !status::TX_BUSY;
        result
    }

    async fn clock_out(&mut self, byte: u8) -> Result<(), CommError> {
        self.pins.set_data_direction(Direction::Output);

        for bit in 0..8 {
            self.pins.set_data(byte & (1 << bit) != 0);
            self.pins.wait_for_clock(Edge::Falling).await?;
        }
        self.pins.set_data(parity(byte));
        self.pins.wait_for_clock(Edge::Falling).await?;

        self.pins.set_data_direction(Direction::Input);
        self.pins.wait_for_clock(Edge::Rising).await?;
        let nack = self.pins.data_is_high();
        self.pins.wait_for_clock(Edge::Falling).await?;

        if nack {
            return Err(CommError::AckError);
        }
        Ok(())
    }

    /// Clock one byte in from the CP and append it to the receive buffer
    ///
    /// A parity mismatch is acknowledged negatively and recorded in the
    /// status, but the byte is still stored and the call succeeds.
    pub async fn receive_byte(&mut self) -> Result<(), CommError> {
        if self.status & status::RX_BUSY != 0 {
            return Err(CommError::Busy);
        }
        self.status |= status::RX_BUSY;

        let result = self.clock_in().await;

        self.pins.set_data_direction(Direction::Input);
        self.status &= !status::RX_BUSY;

        let byte = result?;
        self.rx.push(byte).map_err(|_| CommError::BufferOverflow)
    }

    async fn clock_in(&mut self) -> Result<u8, CommError> {
        let mut byte = 0u8;
        for _ in 0..8 {
            self.pins.wait_for_clock(Edge::Rising).await?;
            byte >>= 1;
            if self.pins.data_is_high() {
                byte |= 0x80;
            }
        }

        self.pins.wait_for_clock(Edge::Rising).await?;
        let parity_ok = self.pins.data_is_high() == parity(byte);
        if !parity_ok {
            log::warn!("Parity error on received byte {:#04x}", byte);
            self.status |= status::PARITY_ERR;
        }

        self.pins.wait_for_clock(Edge::Falling).await?;
        self.pins.set_data(!parity_ok);
        self.pins.set_data_direction(Direction::Output);
        self.pins.wait_for_clock(Edge::Falling).await?;

        Ok(byte)
    }

    /// Receive one complete message into the buffer
    ///
    /// Stale bytes are discarded first. Once the header is in, the declared
    /// length is range-checked and reception continues until the CRC bytes
    /// have arrived.
    pub async fn wait_for_message(&mut self) -> Result<(), CommError> {
        self.rx.clear();
        let mut expected = MAX_MESSAGE_LEN;

        while self.rx.len() < expected {
            self.receive_byte().await?;

            if self.rx.len() == HEADER_SIZE {
                let declared = self.rx[index::LEN] as usize;
                if declared < HEADER_SIZE || declared + CRC_SIZE > MAX_MESSAGE_LEN {
                    log::warn!("Declared length {} out of range", declared);
                    return Err(CommError::LengthOutOfRange);
                }
                expected = declared + CRC_SIZE;
            }
        }

        log::debug!("Received message: {:02x?}", self.rx.as_slice());
        Ok(())
    }

    /// Append a CRC to `msg` and clock it out
    ///
    /// Failed bytes are retried. After `SEND_FAILURE_LIMIT` failures across
    /// the whole message the rest of it is abandoned.
    pub async fn send_message(&mut self, msg: &[u8]) -> Result<(), CommError> {
        let mut out: Vec<u8, MAX_MESSAGE_LEN> = Vec::new();
        out.extend_from_slice(msg)
            .map_err(|_| CommError::BufferOverflow)?;
        out.extend_from_slice(&[0; CRC_SIZE])
            .map_err(|_| CommError::BufferOverflow)?;
        crc::compute_or_check(CrcMode::Send, &mut out);

        log::debug!("Sending message: {:02x?}", out.as_slice());

        let mut failures = 0u8;
        let mut sent = 0;
        while sent < out.len() {
            match self.send_byte(out[sent]).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    failures += 1;
                    log::warn!("Byte {} failed ({:?}), attempt {}", sent, error, failures);
                    if failures >= SEND_FAILURE_LIMIT {
                        log::error!("Abandoning message after {} failures", failures);
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    /// Move a received message into `out` without its CRC
    ///
    /// On any error `out` is left untouched.
    pub fn grab_message_from_buffer(&mut self, out: &mut MessageBuffer) -> Result<(), CommError> {
        if self.rx.len() < HEADER_SIZE {
            return Err(CommError::BufferUnderflow);
        }

        let len = self.rx[index::LEN] as usize;
        if len + CRC_SIZE > MAX_MESSAGE_LEN || len + CRC_SIZE > self.rx.len() {
            return Err(CommError::BufferUnderflow);
        }

        if !crc::compute_or_check(CrcMode::Receive, &mut self.rx[..len + CRC_SIZE]) {
            log::warn!("CRC mismatch on received message");
            return Err(CommError::CrcMismatch);
        }

        out.clear();
        out.extend_from_slice(&self.rx[..len])
            .map_err(|_| CommError::BufferOverflow)?;
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::traits::mock::MockLinkPins;
    use crate::config::protocol::DATA_MESSAGE_VERSION;
    use crate::protocol::frame::{compose, Frame, MessageType};
    use futures::executor::block_on;

    fn link() -> CommLink<MockLinkPins> {
        CommLink::new(MockLinkPins::new())
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CommError::BufferUnderflow.code(), 0x01);
        assert_eq!(CommError::BufferOverflow.code(), 0x02);
        assert_eq!(CommError::CrcMismatch.code(), 0x04);
        assert_eq!(CommError::Busy.code(), 0x04);
        assert_eq!(CommError::AckError.code(), 0x10);
    }

    #[test]
    fn test_send_byte_lsb_first_with_parity() {
        let mut link = link();

        block_on(async {
            for byte in [0x00, 0x01, 0x80, 0xA5, 0xFF, 0x7E] {
                link.send_byte(byte).await.unwrap();
            }
        });

        assert_eq!(link.pins().sent_bytes(), &[0x00, 0x01, 0x80, 0xA5, 0xFF, 0x7E]);
        assert_eq!(link.pins().bad_parity_sent(), 0);
        assert_eq!(link.pins().direction(), Direction::Input);
    }

    #[test]
    fn test_send_byte_nack() {
        let mut link = link();
        link.pins_mut().queue_ack(false);

        let result = block_on(link.send_byte(0x42));

        assert_eq!(result, Err(CommError::AckError));
        assert_eq!(link.status() & status::TX_BUSY, 0);
    }

    #[test]
    fn test_send_byte_busy() {
        let mut link = link();
        link.status |= status::TX_BUSY;

        assert_eq!(block_on(link.send_byte(0x42)), Err(CommError::Busy));
        assert!(link.pins().sent_bytes().is_empty());

        link.reset();
        assert_eq!(block_on(link.send_byte(0x42)), Ok(()));
    }

    #[test]
    fn test_receive_byte() {
        let mut link = link();
        link.pins_mut().queue_rx_bytes(&[0x3C, 0x81]);

        block_on(async {
            link.receive_byte().await.unwrap();
            link.receive_byte().await.unwrap();
        });

        assert_eq!(link.received(), &[0x3C, 0x81]);
        assert_eq!(link.pins().acks(), &[false, false]);
        assert!(!link.parity_error());
    }

    #[test]
    fn test_receive_byte_parity_error_is_sticky() {
        let mut link = link();
        link.pins_mut().queue_rx_byte_with_parity(0x03, true);
        link.pins_mut().queue_rx_byte(0x04);

        block_on(async {
            assert_eq!(link.receive_byte().await, Ok(()));
            assert_eq!(link.receive_byte().await, Ok(()));
        });

        // Byte kept, NACK driven, flag survives the next good byte
        assert_eq!(link.received(), &[0x03, 0x04]);
        assert_eq!(link.pins().acks(), &[true, false]);
        assert!(link.parity_error());

        link.clear_parity_error();
        assert!(!link.parity_error());
    }

    #[test]
    fn test_receive_byte_clock_timeout() {
        let mut link = link();
        link.pins_mut().stall_after(3);

        assert_eq!(block_on(link.receive_byte()), Err(CommError::ClockTimeout));
        assert_eq!(link.status() & status::RX_BUSY, 0);
        assert!(link.received().is_empty());
    }

    #[test]
    fn test_wait_for_start_condition() {
        let mut link = link();
        link.pins_mut().queue_wake(Wake::Event);
        link.pins_mut().queue_wake(Wake::StartCondition);

        block_on(async {
            assert!(!link.wait_for_start_condition().await);
            assert_eq!(link.status() & status::START_CONDITION, 0);
            assert!(link.wait_for_start_condition().await);
            assert_ne!(link.status() & status::START_CONDITION, 0);
        });
    }

    #[test]
    fn test_wait_for_message_and_grab() {
        let mut link = link();
        let mut request = Frame::new(MessageType::RequestLabel as u8, DATA_MESSAGE_VERSION);
        request.push(2).unwrap();
        let wire = compose(&request);
        link.pins_mut().queue_rx_bytes(&wire);
        // Trailing noise must not be consumed
        link.pins_mut().queue_rx_byte(0xEE);

        block_on(link.wait_for_message()).unwrap();
        assert_eq!(link.received(), wire.as_slice());

        let mut out = MessageBuffer::new();
        link.grab_message_from_buffer(&mut out).unwrap();
        assert_eq!(out.as_slice(), &wire[..5]);
        assert!(link.received().is_empty());
        assert_eq!(link.pins().pending_levels(), 9);
    }

    #[test]
    fn test_wait_for_message_rejects_long_length() {
        let mut link = link();
        link.pins_mut().queue_rx_bytes(&[0x01, 63, DATA_MESSAGE_VERSION, 0x00]);

        assert_eq!(block_on(link.wait_for_message()), Err(CommError::LengthOutOfRange));
        assert_eq!(link.received().len(), HEADER_SIZE);
    }

    #[test]
    fn test_wait_for_message_rejects_short_length() {
        let mut link = link();
        link.pins_mut().queue_rx_bytes(&[0x01, 3, DATA_MESSAGE_VERSION, 0x00]);

        assert_eq!(block_on(link.wait_for_message()), Err(CommError::LengthOutOfRange));
    }

    #[test]
    fn test_wait_for_message_accepts_largest() {
        let mut link = link();
        let mut request = Frame::new(MessageType::Command as u8, DATA_MESSAGE_VERSION);
        for i in 0..58 {
            request.push(i).unwrap();
        }
        let wire = compose(&request);
        assert_eq!(wire.len(), MAX_MESSAGE_LEN);
        link.pins_mut().queue_rx_bytes(&wire);

        assert_eq!(block_on(link.wait_for_message()), Ok(()));
        assert_eq!(link.received().len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_receive_overflow() {
        let mut link = link();
        link.pins_mut().queue_rx_bytes(&[0u8; MAX_MESSAGE_LEN + 1]);

        block_on(async {
            for _ in 0..MAX_MESSAGE_LEN {
                link.receive_byte().await.unwrap();
            }
            assert_eq!(link.receive_byte().await, Err(CommError::BufferOverflow));
        });
        assert_eq!(link.received().len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_grab_underflow_leaves_output_untouched() {
        let mut link = link();
        link.pins_mut().queue_rx_bytes(&[0x04, 0x04, DATA_MESSAGE_VERSION]);
        block_on(async {
            for _ in 0..3 {
                link.receive_byte().await.unwrap();
            }
        });

        let mut out = MessageBuffer::new();
        out.extend_from_slice(&[0xAA, 0xBB]).unwrap();

        assert_eq!(link.grab_message_from_buffer(&mut out), Err(CommError::BufferUnderflow));
        assert_eq!(out.as_slice(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_grab_crc_mismatch() {
        let mut link = link();
        let mut wire = compose(&Frame::new(MessageType::RequestData as u8, DATA_MESSAGE_VERSION));
        wire[5] ^= 0x01;
        link.pins_mut().queue_rx_bytes(&wire);

        block_on(link.wait_for_message()).unwrap();
        let mut out = MessageBuffer::new();
        assert_eq!(link.grab_message_from_buffer(&mut out), Err(CommError::CrcMismatch));
        assert!(out.is_empty());
    }

    #[test]
    fn test_send_message_appends_crc() {
        let mut link = link();
        let frame = Frame::new(MessageType::ConfirmCommand as u8, DATA_MESSAGE_VERSION);

        block_on(link.send_message(&frame.to_bytes())).unwrap();

        assert_eq!(link.pins().sent_bytes(), compose(&frame).as_slice());
    }

    #[test]
    fn test_send_message_retries_failed_byte() {
        let mut link = link();
        // First byte acked, second NACKed once then acked
        link.pins_mut().queue_ack(true);
        link.pins_mut().queue_ack(false);

        let msg = [0x07, 0x04, DATA_MESSAGE_VERSION, 0x00];
        block_on(link.send_message(&msg)).unwrap();

        let sent = link.pins().sent_bytes();
        assert_eq!(sent.len(), 7);
        assert_eq!(&sent[..3], &[0x07, 0x04, 0x04]);
    }

    #[test]
    fn test_send_message_abandons_after_five_failures() {
        let mut link = link();
        for _ in 0..5 {
            link.pins_mut().queue_ack(false);
        }

        let msg = [0x07, 0x04, DATA_MESSAGE_VERSION, 0x00];
        assert_eq!(block_on(link.send_message(&msg)), Err(CommError::AckError));

        // Five attempts at the first byte, nothing after it
        assert_eq!(link.pins().sent_bytes(), &[0x07; 5]);
    }

    #[test]
    fn test_failures_are_cumulative_across_message() {
        let mut link = link();
        // Alternate NACK/ACK so no single byte fails twice in a row
        for _ in 0..5 {
            link.pins_mut().queue_ack(false);
            link.pins_mut().queue_ack(true);
        }

        let msg = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        assert_eq!(block_on(link.send_message(&msg)), Err(CommError::AckError));
        assert_eq!(link.pins().sent_bytes(), &[0x01, 0x01, 0x02, 0x02, 0x03, 0x03, 0x04, 0x04, 0x05]);
    }

    #[test]
    fn test_shutdown() {
        let mut link = link();
        link.shutdown();

        assert!(!link.is_running());
        assert_eq!(link.pins().direction(), Direction::Output);
        assert!(!link.pins().driven_level());
    }
}
