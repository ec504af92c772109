//! Minew beacon protocol support.
//!
//! This module contains everything specific to Minew hardware: the
//! advertisement frame definitions, the frame decoder and MAC-address
//! recognition helpers.

pub mod parser;
pub mod protocol;
pub mod recognition;

pub use parser::{decode, is_minew_payload};
pub use protocol::{Acceleration, BeaconReading, FrameType, MINEW_VENDOR_ID, RawBytes};
