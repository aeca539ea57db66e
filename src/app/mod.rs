pub mod board;
pub mod report;

pub use board::StmBoard;
pub use report::{ReportSlot, ReportTable};
