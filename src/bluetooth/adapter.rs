//! Hardware seam between scan sessions and a platform BLE stack.
//!
//! A platform backend implements [`BleAdapter`] so a session can start and
//! stop discovery, and delivers everything the radio reports as
//! [`HardwareEvent`]s through a single channel.

use std::time::SystemTime;

use serde::Serialize;
use smol_str::SmolStr;

use crate::{error::Result, minew::RawBytes};

/// Power/authorization state of the local Bluetooth adapter.
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdapterState {
   #[default]
   Unknown,
   Resetting,
   Unsupported,
   Unauthorized,
   PoweredOff,
   PoweredOn,
}

/// One advertisement as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
   pub address: SmolStr,
   pub name: Option<SmolStr>,
   pub rssi: i16,
   /// Manufacturer data including the little-endian company id prefix.
   pub manufacturer_data: RawBytes,
   /// Milliseconds since the Unix epoch.
   pub timestamp: u64,
   pub tx_power: Option<i16>,
   pub connectable: Option<bool>,
}

impl AdvertisementEvent {
   pub fn new(address: impl Into<SmolStr>, rssi: i16, manufacturer_data: &[u8]) -> Self {
      Self {
         address: address.into(),
         name: None,
         rssi,
         manufacturer_data: RawBytes::from_slice(manufacturer_data),
         timestamp: unix_now_ms(),
         tx_power: None,
         connectable: None,
      }
   }

   #[must_use]
   pub const fn at(mut self, timestamp: u64) -> Self {
      self.timestamp = timestamp;
      self
   }
}

/// Everything a backend can report to a session.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
   AdapterState(AdapterState),
   Advertisement(AdvertisementEvent),
   /// The stack aborted a running discovery.
   DiscoveryFailed(SmolStr),
}

/// Options for a scan session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanOptions {
   /// Drop advertisements that do not carry the Minew vendor id.
   pub minew_only: bool,
}

impl ScanOptions {
   /// Combines two option sets; any filter enabled in either stays enabled.
   #[must_use]
   pub const fn union(self, other: Self) -> Self {
      Self {
         minew_only: self.minew_only || other.minew_only,
      }
   }
}

/// Discovery control over a platform Bluetooth adapter.
///
/// Implementations must not block and must not call back into the session
/// synchronously; results arrive later as [`HardwareEvent`]s.
pub trait BleAdapter: Send + Sync {
   /// Current adapter state, as last reported by the platform.
   fn state(&self) -> AdapterState;

   /// Begins continuous discovery.
   fn start_discovery(&self, options: &ScanOptions) -> Result<()>;

   /// Halts discovery. Halting an idle adapter is not an error.
   fn stop_discovery(&self) -> Result<()>;
}

/// Milliseconds since the Unix epoch.
pub fn unix_now_ms() -> u64 {
   SystemTime::UNIX_EPOCH
      .elapsed()
      .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
