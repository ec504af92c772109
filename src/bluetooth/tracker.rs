//! Per-device throttling and the live device set.
//!
//! Radios report the same peripheral many times per second. [`Throttle`]
//! lets at most one report per address through each window, and
//! [`Aggregator`] keeps the newest accepted record per address.

use std::{cmp::Ordering, collections::HashMap, time::Duration};

use serde::Serialize;
use smol_str::SmolStr;

use crate::{
   bluetooth::adapter::AdvertisementEvent,
   minew::{BeaconReading, RawBytes, protocol::serialize_hex},
};

/// Default minimum interval between accepted reports of one device.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Record of the latest accepted advertisement of any device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawDevice {
   pub address: SmolStr,
   pub name: Option<SmolStr>,
   pub rssi: i16,
   #[serde(serialize_with = "serialize_hex")]
   pub manufacturer_data: RawBytes,
   pub tx_power: Option<i16>,
   pub connectable: Option<bool>,
   pub last_seen: u64,
}

impl From<&AdvertisementEvent> for RawDevice {
   fn from(event: &AdvertisementEvent) -> Self {
      Self {
         address: event.address.clone(),
         name: event.name.clone(),
         rssi: event.rssi,
         manufacturer_data: event.manufacturer_data.clone(),
         tx_power: event.tx_power,
         connectable: event.connectable,
         last_seen: event.timestamp,
      }
   }
}

impl RawDevice {
   pub fn to_json(&self) -> serde_json::Value {
      serde_json::to_value(self).unwrap_or_default()
   }
}

/// Drops reports of an address seen less than `min_interval` ago.
#[derive(Debug)]
pub struct Throttle {
   min_interval_ms: u64,
   last_accepted: HashMap<SmolStr, u64>,
}

impl Default for Throttle {
   fn default() -> Self {
      Self::new(DEFAULT_MIN_INTERVAL)
   }
}

impl Throttle {
   pub fn new(min_interval: Duration) -> Self {
      Self {
         min_interval_ms: u64::try_from(min_interval.as_millis()).unwrap_or(u64::MAX),
         last_accepted: HashMap::new(),
      }
   }

   pub const fn min_interval_ms(&self) -> u64 {
      self.min_interval_ms
   }

   /// Returns whether the event should be processed, recording it if so.
   ///
   /// The event's own timestamp is the clock. A timestamp older than the last
   /// accepted one (clock adjustment) is accepted and restarts the window.
   pub fn accept(&mut self, event: &AdvertisementEvent) -> bool {
      let now = event.timestamp;
      if let Some(&last) = self.last_accepted.get(&event.address)
         && now >= last
         && now - last < self.min_interval_ms
      {
         return false;
      }
      self.last_accepted.insert(event.address.clone(), now);
      true
   }

   pub fn clear(&mut self) {
      self.last_accepted.clear();
   }

   pub fn len(&self) -> usize {
      self.last_accepted.len()
   }

   pub fn is_empty(&self) -> bool {
      self.last_accepted.is_empty()
   }
}

/// Newest record per address, for decoded beacons and for raw devices.
#[derive(Debug, Default)]
pub struct Aggregator {
   beacons: HashMap<SmolStr, BeaconReading>,
   devices: HashMap<SmolStr, RawDevice>,
}

impl Aggregator {
   pub fn new() -> Self {
      Self::default()
   }

   /// Stores a reading, replacing any earlier one from the same address.
   pub fn upsert(&mut self, reading: BeaconReading) -> Option<BeaconReading> {
      self.beacons.insert(reading.address.clone(), reading)
   }

   /// Stores a raw device record, replacing any earlier one.
   pub fn upsert_device(&mut self, device: RawDevice) -> Option<RawDevice> {
      self.devices.insert(device.address.clone(), device)
   }

   pub fn remove_all(&mut self) {
      self.beacons.clear();
      self.devices.clear();
   }

   pub fn reading(&self, address: &str) -> Option<&BeaconReading> {
      self.beacons.get(address)
   }

   /// Current readings, in no particular order.
   pub fn snapshot(&self) -> Vec<BeaconReading> {
      self.beacons.values().cloned().collect()
   }

   /// Current raw devices, in no particular order.
   pub fn device_snapshot(&self) -> Vec<RawDevice> {
      self.devices.values().cloned().collect()
   }

   pub fn beacon_count(&self) -> usize {
      self.beacons.len()
   }

   pub fn device_count(&self) -> usize {
      self.devices.len()
   }
}

/// Strongest signal first, ties broken by address.
fn signal_order(a: (i16, &str), b: (i16, &str)) -> Ordering {
   b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1))
}

/// Sorts readings strongest signal first.
pub fn sort_by_signal(readings: &mut [BeaconReading]) {
   readings.sort_unstable_by(|a, b| {
      signal_order((a.rssi, a.address.as_str()), (b.rssi, b.address.as_str()))
   });
}

/// Sorts raw devices in the same order as [`sort_by_signal`].
pub fn sort_devices_by_signal(devices: &mut [RawDevice]) {
   devices.sort_unstable_by(|a, b| {
      signal_order((a.rssi, a.address.as_str()), (b.rssi, b.address.as_str()))
   });
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::minew::FrameType;

   fn event(address: &str, timestamp: u64) -> AdvertisementEvent {
      AdvertisementEvent::new(address, -60, &[0xE1, 0xFF, 0xA8, 0x01, 90]).at(timestamp)
   }

   fn reading(address: &str, rssi: i16, battery: u8) -> BeaconReading {
      let mut r = BeaconReading::bare(address, rssi, FrameType::Battery, 1, &[], 0);
      r.battery_level = Some(battery);
      r
   }

   #[test]
   fn test_throttle_window() {
      let mut throttle = Throttle::new(Duration::from_millis(1000));

      assert!(throttle.accept(&event("AA", 10_000)));
      assert!(!throttle.accept(&event("AA", 10_400)));
      assert!(!throttle.accept(&event("AA", 10_999)));
      assert!(throttle.accept(&event("AA", 11_000)));
      // Window restarts from the last accepted report
      assert!(!throttle.accept(&event("AA", 11_500)));
   }

   #[test]
   fn test_throttle_is_per_address() {
      let mut throttle = Throttle::default();
      assert!(throttle.accept(&event("AA", 0)));
      assert!(throttle.accept(&event("BB", 1)));
      assert!(!throttle.accept(&event("AA", 2)));
      assert_eq!(throttle.len(), 2);

      throttle.clear();
      assert!(throttle.is_empty());
      assert!(throttle.accept(&event("AA", 3)));
   }

   #[test]
   fn test_throttle_accepts_clock_going_backwards() {
      let mut throttle = Throttle::default();
      assert!(throttle.accept(&event("AA", 50_000)));
      assert!(throttle.accept(&event("AA", 20_000)));
      assert!(!throttle.accept(&event("AA", 20_500)));
   }

   #[test]
   fn test_upsert_replaces() {
      let mut agg = Aggregator::new();
      assert!(agg.upsert(reading("AA", -70, 80)).is_none());
      let prev = agg.upsert(reading("AA", -50, 79)).unwrap();
      assert_eq!(prev.battery_level, Some(80));

      assert_eq!(agg.beacon_count(), 1);
      assert_eq!(agg.reading("AA").unwrap().rssi, -50);
      assert_eq!(agg.snapshot().len(), 1);
   }

   #[test]
   fn test_remove_all_clears_both_maps() {
      let mut agg = Aggregator::new();
      agg.upsert(reading("AA", -70, 80));
      agg.upsert_device(RawDevice::from(&event("AA", 1)));
      agg.upsert_device(RawDevice::from(&event("BB", 1)));
      assert_eq!(agg.device_count(), 2);

      agg.remove_all();
      assert_eq!(agg.beacon_count(), 0);
      assert_eq!(agg.device_count(), 0);
      assert!(agg.snapshot().is_empty());
      assert!(agg.device_snapshot().is_empty());
   }

   #[test]
   fn test_sort_by_signal() {
      let mut readings = vec![reading("AA", -80, 1), reading("BB", -40, 1), reading("CC", -60, 1)];
      sort_by_signal(&mut readings);
      let order: Vec<_> = readings.iter().map(|r| r.address.as_str()).collect();
      assert_eq!(order, ["BB", "CC", "AA"]);
   }

   #[test]
   fn test_devices_sort_like_readings() {
      let mut devices: Vec<RawDevice> = [("AA", -80), ("CC", -40), ("BB", -40)]
         .into_iter()
         .map(|(address, rssi)| {
            let mut advert = event(address, 0);
            advert.rssi = rssi;
            RawDevice::from(&advert)
         })
         .collect();
      sort_devices_by_signal(&mut devices);
      let order: Vec<_> = devices.iter().map(|d| d.address.as_str()).collect();
      assert_eq!(order, ["BB", "CC", "AA"]);
   }

   #[test]
   fn test_raw_device_json() {
      let device = RawDevice::from(&event("C3:00:00:38:89:BB", 42));
      let json = serde_json::to_value(&device).unwrap();
      assert_eq!(json["manufacturer_data"], "e1ffa8015a");
      assert_eq!(json["last_seen"], 42);
   }
}
