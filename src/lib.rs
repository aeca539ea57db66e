#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod comm;
pub mod config;
pub mod dispatcher;
pub mod protocol;
pub mod stm;

// GPIO bindings depend on esp-hal and embassy, only available with embedded feature
#[cfg(feature = "embedded")]
pub mod board;
