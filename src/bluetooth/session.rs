//! Scan session state machine.
//!
//! A [`ScanSession`] gates discovery on permissions and adapter state, runs
//! every advertisement through the throttle, decoder and aggregator, and
//! publishes the results to its observers.
//!
//! State moves `Idle -> Scanning -> {Stopped, Error}`, `Stopped -> Scanning`
//! on restart and `Error -> Idle` once the adapter powers back on.

use std::{sync::Arc, time::Duration};

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;
use smol_str::{SmolStr, format_smolstr};

use crate::{
   bluetooth::{
      adapter::{
         AdapterState, AdvertisementEvent, BleAdapter, HardwareEvent, ScanOptions, unix_now_ms,
      },
      tracker::{Aggregator, RawDevice, Throttle, sort_by_signal, sort_devices_by_signal},
   },
   error::{Result, ScanError},
   event::{EventBus, Observer, Observers, ScanEvent, Subscription},
   minew::{self, BeaconReading},
   permissions::{PermissionGate, PermissionState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanState {
   #[default]
   Idle,
   Scanning,
   Stopped,
   Error,
}

/// Snapshot of a session, as handed to observers and callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
   pub state: ScanState,
   pub is_scanning: bool,
   pub error: Option<SmolStr>,
   /// Devices seen since the last start or clear.
   pub device_count: usize,
   /// Milliseconds since the Unix epoch.
   pub last_update: Option<u64>,
}

impl ScanStatus {
   pub fn to_json(&self) -> serde_json::Value {
      serde_json::to_value(self).unwrap_or_default()
   }
}

#[derive(Debug)]
struct Inner {
   state: ScanState,
   error: Option<SmolStr>,
   last_update: Option<u64>,
   /// When the current scan began; older advertisements belong to a previous one.
   started_at: u64,
   options: ScanOptions,
   throttle: Throttle,
   aggregator: Aggregator,
}

impl Inner {
   fn status(&self) -> ScanStatus {
      ScanStatus {
         state: self.state,
         is_scanning: self.state == ScanState::Scanning,
         error: self.error.clone(),
         device_count: self.aggregator.device_count(),
         last_update: self.last_update,
      }
   }

   fn transition(&mut self, state: ScanState) {
      if self.state != state {
         info!("Scan state: {} -> {state}", self.state);
      }
      self.state = state;
      self.last_update = Some(unix_now_ms());
   }

   fn reset(&mut self) {
      self.throttle.clear();
      self.aggregator.remove_all();
   }
}

/// One scanning session over a BLE adapter.
pub struct ScanSession {
   adapter: Arc<dyn BleAdapter>,
   permissions: Arc<dyn PermissionGate>,
   observers: Arc<Observers>,
   inner: Mutex<Inner>,
}

impl ScanSession {
   pub fn new(
      adapter: Arc<dyn BleAdapter>,
      permissions: Arc<dyn PermissionGate>,
      min_report_interval: Duration,
   ) -> Self {
      Self {
         adapter,
         permissions,
         observers: Observers::new(),
         inner: Mutex::new(Inner {
            state: ScanState::Idle,
            error: None,
            last_update: None,
            started_at: 0,
            options: ScanOptions::default(),
            throttle: Throttle::new(min_report_interval),
            aggregator: Aggregator::new(),
         }),
      }
   }

   /// Registers an observer for this session's events.
   pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
      self.observers.subscribe(observer)
   }

   pub fn status(&self) -> ScanStatus {
      self.inner.lock().status()
   }

   pub fn is_scanning(&self) -> bool {
      self.inner.lock().state == ScanState::Scanning
   }

   /// Latest reading of every decoded beacon, strongest signal first.
   pub fn readings(&self) -> Vec<BeaconReading> {
      let mut readings = self.inner.lock().aggregator.snapshot();
      sort_by_signal(&mut readings);
      readings
   }

   /// Latest record of every device, decoded or not, strongest signal first.
   pub fn devices(&self) -> Vec<RawDevice> {
      let mut devices = self.inner.lock().aggregator.device_snapshot();
      sort_devices_by_signal(&mut devices);
      devices
   }

   pub fn reading(&self, address: &str) -> Option<BeaconReading> {
      self.inner.lock().aggregator.reading(address).cloned()
   }

   /// Current permission grants, without prompting.
   pub fn check_permissions(&self) -> PermissionState {
      self.permissions.check()
   }

   /// Prompts for any missing permission.
   pub fn request_permissions(&self) -> PermissionState {
      self.permissions.request()
   }

   /// Starts discovery.
   ///
   /// Fails without touching the session when permissions are missing, the
   /// adapter is not powered on, or the platform refuses to scan. Starting a
   /// running session succeeds without doing anything.
   pub fn start(&self, options: ScanOptions) -> Result<()> {
      if self.is_scanning() {
         debug!("Scan already running");
         return Ok(());
      }

      let permissions = self.permissions.check();
      if !permissions.all_granted {
         warn!("Cannot start scan: permissions not granted ({permissions:?})");
         return Err(if permissions.can_ask_again {
            ScanError::PermissionDenied
         } else {
            ScanError::PermissionDeniedPermanently
         });
      }

      let adapter_state = self.adapter.state();
      if adapter_state != AdapterState::PoweredOn {
         warn!("Cannot start scan: adapter is {adapter_state}");
         return Err(ScanError::HardwareUnavailable(adapter_state));
      }

      let status = {
         let mut inner = self.inner.lock();
         if inner.state == ScanState::Scanning {
            return Ok(());
         }

         self.adapter.start_discovery(&options).map_err(|e| {
            warn!("Failed to start discovery: {e}");
            match e {
               failure @ ScanError::ScanStartFailure(_) => failure,
               other => ScanError::ScanStartFailure(other.to_string()),
            }
         })?;

         inner.reset();
         inner.started_at = unix_now_ms();
         inner.options = options;
         inner.error = None;
         inner.transition(ScanState::Scanning);
         inner.status()
      };

      self.observers.emit(ScanEvent::StateChanged(status));
      Ok(())
   }

   /// Stops discovery. Stopping a session that is not scanning does nothing.
   ///
   /// The session is `Stopped` as soon as this returns; advertisements the
   /// platform delivers afterwards are ignored.
   pub fn stop(&self) {
      let status = {
         let mut inner = self.inner.lock();
         if inner.state != ScanState::Scanning {
            return;
         }
         inner.transition(ScanState::Stopped);
         inner.status()
      };

      if let Err(e) = self.adapter.stop_discovery() {
         warn!("Failed to stop discovery: {e}");
      }
      self.observers.emit(ScanEvent::StateChanged(status));
   }

   /// Forgets every device seen so far without changing the scan state.
   pub fn clear(&self) {
      let status = {
         let mut inner = self.inner.lock();
         inner.reset();
         inner.last_update = Some(unix_now_ms());
         inner.status()
      };
      debug!("Cleared device list");
      self.observers.emit(ScanEvent::StateChanged(status));
   }

   /// Stops discovery and drops every subscriber.
   pub fn shutdown(&self) {
      self.stop();
      self.observers.clear();
   }

   /// Feeds one event from the platform backend into the session.
   pub fn handle_event(&self, event: HardwareEvent) {
      match event {
         HardwareEvent::AdapterState(state) => self.handle_adapter_state(state),
         HardwareEvent::Advertisement(advertisement) => self.handle_advertisement(advertisement),
         HardwareEvent::DiscoveryFailed(reason) => {
            self.fail(format_smolstr!("Discovery failed: {reason}"), true);
         },
      }
   }

   fn handle_adapter_state(&self, state: AdapterState) {
      match state {
         AdapterState::PoweredOff => {
            self.fail(SmolStr::new_static("Bluetooth is powered off"), false);
         },
         AdapterState::Unauthorized => {
            self.fail(SmolStr::new_static("Bluetooth access is not authorized"), false);
         },
         AdapterState::PoweredOn => {
            let status = {
               let mut inner = self.inner.lock();
               if inner.state != ScanState::Error {
                  return;
               }
               info!("Adapter powered on, recovering from error");
               inner.error = None;
               inner.transition(ScanState::Idle);
               inner.status()
            };
            self.observers.emit(ScanEvent::StateChanged(status));
         },
         other => debug!("Adapter state: {other}"),
      }
   }

   /// Moves to `Error`, halting discovery before anyone is told.
   ///
   /// With `only_if_scanning`, a session that is not scanning is left alone.
   fn fail(&self, message: SmolStr, only_if_scanning: bool) {
      let (was_scanning, status) = {
         let mut inner = self.inner.lock();
         let was_scanning = inner.state == ScanState::Scanning;
         if only_if_scanning && !was_scanning {
            debug!("Ignoring outside a scan: {message}");
            return;
         }
         if inner.state == ScanState::Error && inner.error.as_ref() == Some(&message) {
            return;
         }
         inner.error = Some(message.clone());
         inner.transition(ScanState::Error);
         (was_scanning, inner.status())
      };

      warn!("{message}");
      if was_scanning && let Err(e) = self.adapter.stop_discovery() {
         warn!("Failed to stop discovery: {e}");
      }

      self.observers.emit(ScanEvent::StateChanged(status));
      self.observers.emit(ScanEvent::Error(message));
   }

   fn handle_advertisement(&self, event: AdvertisementEvent) {
      let mut events = SmallVec::<[ScanEvent; 2]>::new();
      {
         let mut inner = self.inner.lock();
         if inner.state != ScanState::Scanning {
            trace!("Ignoring advertisement from {} outside a scan", event.address);
            return;
         }
         if event.timestamp < inner.started_at {
            trace!("Ignoring advertisement from {} queued before this scan", event.address);
            return;
         }
         if !inner.throttle.accept(&event) {
            trace!("Throttled {}", event.address);
            return;
         }
         if inner.options.minew_only && !minew::is_minew_payload(&event.manufacturer_data) {
            return;
         }

         let device = RawDevice::from(&event);
         inner.aggregator.upsert_device(device.clone());
         events.push(ScanEvent::RawDeviceFound(device));

         if let Some(reading) =
            minew::decode(&event.address, event.rssi, &event.manufacturer_data, event.timestamp)
         {
            trace!("{}: {} frame", reading.address, reading.frame_type);
            inner.aggregator.upsert(reading.clone());
            events.push(ScanEvent::ReadingFound(reading));
         }

         inner.last_update = Some(event.timestamp);
      }

      for event in events {
         self.observers.emit(event);
      }
   }
}

impl Drop for ScanSession {
   fn drop(&mut self) {
      if self.inner.get_mut().state == ScanState::Scanning
         && let Err(e) = self.adapter.stop_discovery()
      {
         warn!("Failed to stop discovery on drop: {e}");
      }
   }
}
