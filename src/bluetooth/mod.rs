//! Bluetooth layer for the scanning service.
//!
//! This module provides the hardware seam, the `BlueZ` backend, the
//! per-device throttle/aggregator and the scan session built on top of them.

pub mod adapter;
pub mod bluez;
pub mod session;
pub mod tracker;
