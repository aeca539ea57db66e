pub mod link;
pub mod traits;

pub use link::{CommError, CommLink};
pub use traits::{BusError, Direction, Edge, LinkPins, Wake};
