pub mod crc;
pub mod frame;

pub use crc::CrcMode;
pub use frame::{Frame, FrameError, MessageBuffer, MessageType};
