pub mod parser;
pub mod receiver;
pub mod sensor;
pub mod traits;

pub use parser::{SensorFamily, SensorReading};
pub use sensor::{MeasureOutcome, SoilSensors};
pub use traits::{Channel, SensorBus, SensorEvent};
