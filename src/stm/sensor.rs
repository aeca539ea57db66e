//! Soil sensor measurement cycle
//!
//! A measurement powers the sensor, waits for the level shifter, then
//! sleeps collecting reply bytes until a line feed arrives or the timer
//! rolls over too many times without a start bit. Power and the edge
//! interrupt are always removed before returning.

use crate::config::sensor::{
    CHANNELS, MEASURE_TIMEOUT_ROLLOVERS, TYPE_PROBE_TIMEOUT_ROLLOVERS, UNKNOWN_SENSOR_TYPE,
};
use crate::stm::parser::{self, ChecksumStatus, SensorReading, LF};
use crate::stm::receiver::SoftUartRx;
use crate::stm::traits::{Channel, SensorBus, SensorEvent};

/// How a sensor exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeasureOutcome {
    Success = 0,
    ChecksumFail = 1,
    Timeout = 2,
}

impl MeasureOutcome {
    /// Code stored in the report slots
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Where the measurement cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Sensor powered, level shifter settling
    Exciting(Channel),
    /// Waiting for a start bit
    Armed(Channel),
    /// Clocking in a byte
    Receiving(Channel),
    Done(MeasureOutcome),
}

/// Measurement engine for the four sensor channels
pub struct SoilSensors<B: SensorBus> {
    bus: B,
    rx: SoftUartRx,
    reading: SensorReading,
    types: [u8; CHANNELS],
    phase: Phase,
}

impl<B: SensorBus> SoilSensors<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            rx: SoftUartRx::new(),
            reading: SensorReading::default(),
            types: [UNKNOWN_SENSOR_TYPE; CHANNELS],
            phase: Phase::Idle,
        }
    }

    /// Most recent successful reading from any channel
    pub fn reading(&self) -> SensorReading {
        self.reading
    }

    /// Registered family byte for a channel, `'R'` until probed
    pub fn sensor_type(&self, channel: Channel) -> u8 {
        self.types[channel.index()]
    }

    /// Where the last or current cycle stands
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Raw bytes of the last reply
    pub fn reply(&self) -> &[u8] {
        self.rx.bytes()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Take one sample from a channel
    ///
    /// On success the reading is updated if the reply's family is known.
    pub async fn measure(&mut self, channel: Channel) -> MeasureOutcome {
        let outcome = if !self.acquire(channel, MEASURE_TIMEOUT_ROLLOVERS).await {
            log::warn!("Sensor {} timed out", channel.number());
            MeasureOutcome::Timeout
        } else if parser::test_checksum(self.rx.bytes()) == ChecksumStatus::Fail {
            log::warn!("Sensor {} checksum failed", channel.number());
            MeasureOutcome::ChecksumFail
        } else {
            match parser::parse_reading(self.rx.bytes()) {
                Some(reading) => {
                    log::debug!("Sensor {}: {:?}", channel.number(), reading);
                    self.reading = reading;
                }
                None => log::warn!("Sensor {} sent an unknown family", channel.number()),
            }
            MeasureOutcome::Success
        };

        self.phase = Phase::Done(outcome);
        outcome
    }

    /// Probe a channel and record the family byte it answers with
    pub async fn request_sensor_type(&mut self, channel: Channel) -> MeasureOutcome {
        let outcome = if !self.acquire(channel, TYPE_PROBE_TIMEOUT_ROLLOVERS).await {
            MeasureOutcome::Timeout
        } else if parser::test_checksum(self.rx.bytes()) == ChecksumStatus::Fail {
            MeasureOutcome::ChecksumFail
        } else {
            if let Some(family) = parser::discriminator(self.rx.bytes()) {
                self.types[channel.index()] = family;
            }
            MeasureOutcome::Success
        };

        log::debug!(
            "Sensor {} type probe: {:?}, type {:#04x}",
            channel.number(),
            outcome,
            self.types[channel.index()]
        );
        self.phase = Phase::Done(outcome);
        outcome
    }

    /// Run one excite-listen-release cycle. True if a full reply arrived.
    ///
    /// At most `RX_BUFFER_SIZE + budget` wakes are taken, however busy the
    /// line is.
    async fn acquire(&mut self, channel: Channel, budget: u8) -> bool {
        self.phase = Phase::Exciting(channel);
        self.bus.set_excitation(channel, true);
        self.bus.settle().await;

        self.rx.reset();
        self.bus.set_rx_interrupt(channel, true);
        self.phase = Phase::Armed(channel);

        let mut rollovers = 0u8;
        let mut complete = false;
        while rollovers < budget {
            if self.bus.sleep().await == SensorEvent::StartBit {
                // Once the reply buffer is full, more bytes no longer extend the wait
                if !self.rx.is_full() {
                    rollovers = 0;
                }
                self.receive_byte(channel).await;
            }
            rollovers += 1;

            if self.rx.last_byte() == Some(LF) {
                complete = true;
                break;
            }
        }

        self.bus.set_rx_interrupt(channel, false);
        self.bus.set_excitation(channel, false);
        complete
    }

    async fn receive_byte(&mut self, channel: Channel) {
        self.phase = Phase::Receiving(channel);
        self.bus.set_rx_interrupt(channel, false);
        self.rx.start_bit();

        loop {
            self.bus.wait_bit_tick().await;
            let level = self.bus.rx_is_high(channel);
            if self.rx.on_tick(level).is_some() {
                break;
            }
        }

        self.bus.set_rx_interrupt(channel, true);
        self.phase = Phase::Armed(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sensor::RX_BUFFER_SIZE;
    use crate::stm::parser::{checksum_char, CR};
    use crate::stm::traits::mock::MockSensorBus;
    use futures::executor::block_on;

    fn reply(fields: &[u8], family: u8) -> std::vec::Vec<u8> {
        let mut bytes = fields.to_vec();
        bytes.push(CR);
        bytes.push(family);
        bytes.push(checksum_char(&bytes));
        bytes.extend_from_slice(&[CR, LF]);
        bytes
    }

    fn channel(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    #[test]
    fn test_measure_success() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(&reply(b"1234 0 225", b'x'));

        let outcome = block_on(sensors.measure(channel(2)));

        assert_eq!(outcome, MeasureOutcome::Success);
        assert_eq!(sensors.reading().temperature, 225);
        assert_eq!(sensors.reading().soil_moisture, 1234);
        assert_eq!(sensors.phase(), Phase::Done(MeasureOutcome::Success));
        assert_eq!(sensors.bus().settles(), 1);
        assert_eq!(sensors.bus().missed(), 0);
    }

    #[test]
    fn test_measure_timeout_releases_channel() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());

        let outcome = block_on(sensors.measure(channel(1)));

        assert_eq!(outcome, MeasureOutcome::Timeout);
        assert_eq!(outcome.code(), 2);
        assert!(!sensors.bus().excitation(channel(1)));
        assert!(!sensors.bus().rx_interrupt(channel(1)));
        assert_eq!(sensors.bus().excitation_log(), &[(1, true), (1, false)]);
    }

    #[test]
    fn test_start_bit_restarts_timeout() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_rollovers(9);
        sensors.bus_mut().queue_reply(b"1");
        sensors.bus_mut().queue_rollovers(8);
        let rest = reply(b"1 0 2", b'x');
        sensors.bus_mut().queue_reply(&rest[1..]);

        assert_eq!(block_on(sensors.measure(channel(3))), MeasureOutcome::Success);
        assert_eq!(sensors.bus().pending(), 0);
    }

    #[test]
    fn test_budget_spent_before_reply() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_rollovers(MEASURE_TIMEOUT_ROLLOVERS as usize);
        sensors.bus_mut().queue_reply(&reply(b"1234 0 225", b'x'));

        assert_eq!(block_on(sensors.measure(channel(1))), MeasureOutcome::Timeout);
        assert!(sensors.bus().pending() > 0);
    }

    #[test]
    fn test_partial_reply_times_out() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(b"1234 0");

        assert_eq!(block_on(sensors.measure(channel(1))), MeasureOutcome::Timeout);
        assert_eq!(sensors.reply(), b"1234 0");
    }

    #[test]
    fn test_measure_checksum_fail_keeps_reading() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(&reply(b"1234 0 225", b'x'));
        block_on(sensors.measure(channel(1)));

        let mut bad = reply(b"99 0 11", b'x');
        bad[0] = b'8';
        sensors.bus_mut().queue_reply(&bad);

        assert_eq!(block_on(sensors.measure(channel(1))), MeasureOutcome::ChecksumFail);
        assert_eq!(sensors.reading().soil_moisture, 1234);
        assert!(!sensors.bus().excitation(channel(1)));
    }

    #[test]
    fn test_unknown_family_is_success_without_update() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(&reply(b"5 6 7", b'q'));

        assert_eq!(block_on(sensors.measure(channel(4))), MeasureOutcome::Success);
        assert_eq!(sensors.reading(), SensorReading::default());
    }

    #[test]
    fn test_chattering_sensor_still_times_out() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(&[b'A'; 60]);

        assert_eq!(block_on(sensors.measure(channel(1))), MeasureOutcome::Timeout);

        // Every byte up to a full buffer restarts the budget, later ones spend it
        let taken = RX_BUFFER_SIZE + MEASURE_TIMEOUT_ROLLOVERS as usize - 1;
        assert_eq!(sensors.bus().pending(), 60 - taken);
        assert_eq!(sensors.reply().len(), RX_BUFFER_SIZE);
        assert!(!sensors.bus().excitation(channel(1)));
        assert!(!sensors.bus().rx_interrupt(channel(1)));
    }

    #[test]
    fn test_chattering_sensor_type_probe_times_out() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_reply(&[b'A'; 60]);

        assert_eq!(
            block_on(sensors.request_sensor_type(channel(2))),
            MeasureOutcome::Timeout
        );
        let taken = RX_BUFFER_SIZE + TYPE_PROBE_TIMEOUT_ROLLOVERS as usize - 1;
        assert_eq!(sensors.bus().pending(), 60 - taken);
        assert_eq!(sensors.sensor_type(channel(2)), b'R');
    }

    #[test]
    fn test_request_sensor_type() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        assert_eq!(sensors.sensor_type(channel(2)), b'R');

        sensors.bus_mut().queue_reply(&reply(b"-12.0 21.5", b'l'));
        assert_eq!(block_on(sensors.request_sensor_type(channel(2))), MeasureOutcome::Success);
        assert_eq!(sensors.sensor_type(channel(2)), b'l');
        assert_eq!(sensors.sensor_type(channel(1)), b'R');
    }

    #[test]
    fn test_request_sensor_type_short_budget() {
        let mut sensors = SoilSensors::new(MockSensorBus::new());
        sensors.bus_mut().queue_rollovers(TYPE_PROBE_TIMEOUT_ROLLOVERS as usize);
        sensors.bus_mut().queue_reply(&reply(b"1 0 2", b'z'));

        assert_eq!(block_on(sensors.request_sensor_type(channel(1))), MeasureOutcome::Timeout);
        assert_eq!(sensors.sensor_type(channel(1)), b'R');
        assert!(!sensors.bus().excitation(channel(1)));
    }
}
