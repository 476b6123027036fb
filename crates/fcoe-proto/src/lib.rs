//! # fcoe-proto
//!
//! Wire types, constants, and codec for the FCoE Initialization Protocol
//! (FIP, FC-BB-5 annex C/D).
//!
//! This crate defines the FIP frame header and TLV descriptor formats,
//! the well-known multicast groups and protocol tunables, MAC/WWN
//! address helpers, and a minimal Fibre Channel frame header codec used
//! for ELS encapsulation. The controller engine lives in `fcoe-ctlr`.

pub mod constants;
pub mod defaults;
pub mod error;
pub mod fc;
pub mod mac;
pub mod wire;

// Re-export commonly used types at the crate root
pub use error::{FipError, FipResult};
pub use mac::MacAddr;
pub use wire::{Desc, FipFrame, FrameBuilder};
