//! Minew beacon scanner D-Bus service.
//!
//! This service scans for Minew sensor beacons over `BlueZ` and exposes the
//! live readings, scan control and permission state on the session bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use minewd::{
   Observer, ScanEvent, ScanSession,
   bluetooth::bluez::BluezAdapter,
   config::Config,
   error::Result,
   permissions::{ImplicitBackend, PermissionGate, PermissionNegotiator, store::MemoryStore},
};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use dbus::ScannerService;

mod dbus;

use crate::dbus::ScannerServiceSignals;

const BUS_NAME: &str = "org.minew.scanner";
const OBJECT_PATH: &str = "/org/minew/scanner";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting minewd...");

   let config = Config::load()?;
   info!(
      "Loaded configuration (report interval {}ms, minew_only={})",
      config.min_report_interval_ms, config.minew_only
   );

   let permissions = open_permission_gate(&config);
   let (adapter, mut hardware_rx) = BluezAdapter::open(&config).await?;
   let session = Arc::new(ScanSession::new(
      Arc::new(adapter),
      permissions,
      config.min_report_interval(),
   ));

   // Queue session events for D-Bus dispatch
   let event_bus = EventProcessor::new();
   let subscription = session.subscribe(event_bus.clone());

   let connection = connection::Builder::session()?
      .name(BUS_NAME)?
      .serve_at(OBJECT_PATH, ScannerService::new(session.clone(), config.scan_options()))?
      .build()
      .await?;

   info!("minewd D-Bus service started at {BUS_NAME}");

   event_bus.spawn_dispatcher(connection).await?;

   // Hardware events reach the session through a single task
   let pump_session = session.clone();
   tokio::spawn(async move {
      while let Some(event) = hardware_rx.recv().await {
         pump_session.handle_event(event);
      }
      debug!("Hardware event channel closed");
   });

   signal::ctrl_c().await?;
   info!("Shutting down minewd...");

   drop(subscription);
   session.shutdown();
   Ok(())
}

fn open_permission_gate(config: &Config) -> Arc<dyn PermissionGate> {
   match config.open_permission_store() {
      Ok(store) => PermissionNegotiator::new(ImplicitBackend, store).into_gate(),
      Err(e) => {
         warn!("Permission store unavailable, denials will not persist: {e}");
         PermissionNegotiator::new(ImplicitBackend, MemoryStore::new()).into_gate()
      },
   }
}

struct EventProcessor {
   queue: SegQueue<ScanEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   async fn recv(self: &Arc<Self>) -> Option<ScanEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(&self, iface: &InterfaceRef<ScannerService>, event: ScanEvent) -> Result<()> {
      let count_changed = event.changes_device_count();
      match event {
         ScanEvent::ReadingFound(reading) => {
            iface
               .reading_found(&reading.address, &reading.to_json().to_string())
               .await?;
         },
         ScanEvent::RawDeviceFound(device) => {
            iface
               .raw_device_found(&device.address, &device.to_json().to_string())
               .await?;
         },
         ScanEvent::Error(message) => {
            iface.scan_error(&message).await?;
         },
         ScanEvent::StateChanged(status) => {
            iface.state_changed(&status.to_json().to_string()).await?;
         },
      }

      if count_changed {
         iface
            .get()
            .await
            .device_count_changed(iface.signal_emitter())
            .await?;
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, ScannerService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl Observer for EventProcessor {
   fn notify(&self, event: &ScanEvent) {
      self.queue.push(event.clone());
      self.notifier.notify_waiters();
   }
}
