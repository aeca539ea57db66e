pub mod handler;
pub mod traits;

pub use handler::{Core, Cycle};
pub use traits::{Application, Flash, FlashError, HardwareId, SupplyMonitor};
