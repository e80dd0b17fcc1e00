//! Dead-man's-switch scheduler
//!
//! Holds pre-encrypted messages addressed to named recipients, extends
//! their deadlines on owner check-ins, and releases them when a deadline
//! passes without one.

pub mod records;
pub mod service;

pub use records::{DmsSwitch, SwitchStatus};
pub use service::DmsService;
