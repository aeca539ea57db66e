//! ESP32-S3 bindings for the link, sensor and identity traits

pub mod esp;

pub use esp::{EfuseFlash, GpioLinkPins, GpioSensorBus, NominalSupply, SensorPins};
