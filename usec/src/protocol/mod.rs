//! Protocol implementations.

pub mod cdb;
pub mod info;
pub mod sense;

// Re-export common types
pub use cdb::{Cdb, DisplayAreaArgs, ImageAreaHeader, Opcode};
pub use info::{InquiryData, SystemInfo};
pub use sense::{Outcome, SenseInfo, SenseKey, interpret};
