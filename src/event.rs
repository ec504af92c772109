//! Event delivery from scan sessions to their observers.
//!
//! Sessions publish [`ScanEvent`]s through an [`EventBus`]. The stock bus,
//! [`Observers`], fans every event out to any number of subscribers; each
//! subscription lives as long as its [`Subscription`] handle.

use std::sync::{
   Arc, Weak,
   atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::{
   bluetooth::{session::ScanStatus, tracker::RawDevice},
   minew::BeaconReading,
};

/// Events emitted by a scan session.
#[derive(Debug, Clone)]
pub enum ScanEvent {
   ReadingFound(BeaconReading),
   RawDeviceFound(RawDevice),
   Error(SmolStr),
   StateChanged(ScanStatus),
}

impl ScanEvent {
   /// Whether the session's device count may have moved.
   pub const fn changes_device_count(&self) -> bool {
      matches!(self, Self::RawDeviceFound(_) | Self::StateChanged(_))
   }
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: ScanEvent);
}

/// Receiver of scan events. Every callback defaults to doing nothing.
pub trait Observer: Send + Sync {
   fn on_reading_found(&self, _reading: &BeaconReading) {}
   fn on_raw_device_found(&self, _device: &RawDevice) {}
   fn on_error(&self, _message: &str) {}
   fn on_state_change(&self, _status: &ScanStatus) {}

   fn notify(&self, event: &ScanEvent) {
      match event {
         ScanEvent::ReadingFound(reading) => self.on_reading_found(reading),
         ScanEvent::RawDeviceFound(device) => self.on_raw_device_found(device),
         ScanEvent::Error(message) => self.on_error(message),
         ScanEvent::StateChanged(status) => self.on_state_change(status),
      }
   }
}

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Observer assembled from closures.
#[derive(Default)]
pub struct Callbacks {
   reading_found: Option<Callback<BeaconReading>>,
   raw_device_found: Option<Callback<RawDevice>>,
   error: Option<Box<dyn Fn(&str) + Send + Sync>>,
   state_change: Option<Callback<ScanStatus>>,
}

impl Callbacks {
   pub fn new() -> Self {
      Self::default()
   }

   #[must_use]
   pub fn on_reading_found(mut self, f: impl Fn(&BeaconReading) + Send + Sync + 'static) -> Self {
      self.reading_found = Some(Box::new(f));
      self
   }

   #[must_use]
   pub fn on_raw_device_found(mut self, f: impl Fn(&RawDevice) + Send + Sync + 'static) -> Self {
      self.raw_device_found = Some(Box::new(f));
      self
   }

   #[must_use]
   pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
      self.error = Some(Box::new(f));
      self
   }

   #[must_use]
   pub fn on_state_change(mut self, f: impl Fn(&ScanStatus) + Send + Sync + 'static) -> Self {
      self.state_change = Some(Box::new(f));
      self
   }
}

impl Observer for Callbacks {
   fn on_reading_found(&self, reading: &BeaconReading) {
      if let Some(f) = &self.reading_found {
         f(reading);
      }
   }

   fn on_raw_device_found(&self, device: &RawDevice) {
      if let Some(f) = &self.raw_device_found {
         f(device);
      }
   }

   fn on_error(&self, message: &str) {
      if let Some(f) = &self.error {
         f(message);
      }
   }

   fn on_state_change(&self, status: &ScanStatus) {
      if let Some(f) = &self.state_change {
         f(status);
      }
   }
}

/// Subscriber registry.
#[derive(Default)]
pub struct Observers {
   next_id: AtomicU64,
   entries: RwLock<Vec<(u64, Arc<dyn Observer>)>>,
}

impl Observers {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   /// Registers an observer until the returned handle is dropped or
   /// [`Subscription::unsubscribe`] is called.
   pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn Observer>) -> Subscription {
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      self.entries.write().push((id, observer));
      Subscription {
         id,
         registry: Arc::downgrade(self),
      }
   }

   fn remove(&self, id: u64) {
      self.entries.write().retain(|(entry_id, _)| *entry_id != id);
   }

   pub fn clear(&self) {
      self.entries.write().clear();
   }

   pub fn len(&self) -> usize {
      self.entries.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.read().is_empty()
   }
}

impl EventBus for Observers {
   fn emit(&self, event: ScanEvent) {
      // Observers run unlocked so they can subscribe or unsubscribe.
      let targets: Vec<Arc<dyn Observer>> =
         self.entries.read().iter().map(|(_, o)| o.clone()).collect();
      for observer in targets {
         observer.notify(&event);
      }
   }
}

/// Handle to a registered observer.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
   id: u64,
   registry: Weak<Observers>,
}

impl Subscription {
   pub fn unsubscribe(self) {
      drop(self);
   }
}

impl Drop for Subscription {
   fn drop(&mut self) {
      if let Some(registry) = self.registry.upgrade() {
         registry.remove(self.id);
      }
   }
}
