//! SP-STM board application
//!
//! Transducer 0 is a test generator. Transducers 1 to 4 are the soil
//! sensor channels of the same number.

use crate::app::report::ReportTable;
use crate::config::protocol::{LABEL_LEN, MAX_PAYLOAD_LEN};
use crate::config::sensor::{CHANNELS, UNKNOWN_SENSOR_TYPE};
use crate::dispatcher::traits::Application;
use crate::stm::sensor::SoilSensors;
use crate::stm::traits::{Channel, SensorBus};
use heapless::Vec;

/// Transducer type byte for a sensor
pub const TYPE_SENSOR: u8 = b'S';

/// Sample duration reported for every transducer
const SAMPLE_DURATION: u8 = 1;

const LABELS: [&[u8; LABEL_LEN]; CHANNELS + 1] = [
    b"Test Function   ",
    b"STM1            ",
    b"STM2            ",
    b"STM3            ",
    b"STM4            ",
];

const UNKNOWN_LABEL: &[u8; LABEL_LEN] = b"CANNOT COMPUTE!!";

/// Application for the four-channel soil sensor board
pub struct StmBoard<B: SensorBus> {
    sensors: SoilSensors<B>,
    reports: ReportTable,
}

impl<B: SensorBus> StmBoard<B> {
    pub fn new(bus: B) -> Self {
        Self {
            sensors: SoilSensors::new(bus),
            reports: ReportTable::new(),
        }
    }

    pub fn sensors(&self) -> &SoilSensors<B> {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut SoilSensors<B> {
        &mut self.sensors
    }

    pub fn reports(&self) -> &ReportTable {
        &self.reports
    }
}

impl<B: SensorBus> Application for StmBoard<B> {
    async fn dispatch(&mut self, id: u8, _params: &[u8]) -> u16 {
        if id == 0 {
            self.reports.record_test();
            return 0;
        }

        let Some(channel) = Channel::new(id) else {
            log::warn!("No transducer {}", id);
            return 1;
        };

        // Sensor failures travel as codes in the report slots
        let outcome = self.sensors.measure(channel).await;
        self.reports
            .record_measurement(channel, outcome, self.sensors.reading());
        0
    }

    fn fetch_readings(&mut self, out: &mut Vec<u8, MAX_PAYLOAD_LEN>) {
        self.reports.fetch(out);
    }

    fn fetch_label(&self, index: u8) -> [u8; LABEL_LEN] {
        *LABELS.get(index as usize).copied().unwrap_or(UNKNOWN_LABEL)
    }

    fn shutdown_allowed(&self) -> bool {
        true
    }

    fn num_transducers(&self) -> u8 {
        CHANNELS as u8
    }

    fn transducer_type(&self, id: u8) -> u8 {
        match Channel::new(id) {
            Some(_) => TYPE_SENSOR,
            None => 0,
        }
    }

    fn sample_duration(&self, _id: u8) -> u8 {
        SAMPLE_DURATION
    }

    async fn request_sensor_type(&mut self, channel: u8) {
        if let Some(channel) = Channel::new(channel) {
            self.sensors.request_sensor_type(channel).await;
        }
    }

    fn sensor_type(&self, channel: u8) -> u8 {
        Channel::new(channel)
            .map(|channel| self.sensors.sensor_type(channel))
            .unwrap_or(UNKNOWN_SENSOR_TYPE)
    }

    fn event_trigger(&mut self) {
        log::debug!("Event wake ignored");
    }
}
