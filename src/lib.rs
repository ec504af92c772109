//! Minew BLE beacon scanning.
//!
//! Decodes Minew sensor-beacon advertisements, throttles and aggregates them
//! per device, and drives scan sessions over a platform Bluetooth adapter
//! behind a permission gate.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod event;
pub mod minew;
pub mod permissions;

pub use bluetooth::{
   adapter::{AdapterState, AdvertisementEvent, BleAdapter, HardwareEvent, ScanOptions},
   session::{ScanSession, ScanState, ScanStatus},
   tracker::RawDevice,
};
pub use error::{Result, ScanError};
pub use event::{Callbacks, Observer, ScanEvent, Subscription};
pub use minew::{BeaconReading, FrameType, decode};
