//! Repository implementations for database operations

pub mod board;
pub mod calibration;
pub mod ledger;

pub use board::*;
pub use calibration::*;
pub use ledger::*;
