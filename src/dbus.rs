use std::sync::Arc;

use log::info;
use minewd::{ScanOptions, ScanSession, permissions::PermissionState};
use zbus::{interface, object_server::SignalEmitter};

pub struct ScannerService {
   session: Arc<ScanSession>,
   /// Configured filters, merged into every StartScan request.
   defaults: ScanOptions,
}

impl ScannerService {
   pub const fn new(session: Arc<ScanSession>, defaults: ScanOptions) -> Self {
      Self { session, defaults }
   }
}

fn to_json_string(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
   serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn permissions_json(state: PermissionState) -> String {
   state.to_json().to_string()
}

#[interface(name = "org.minew.Scanner")]
impl ScannerService {
   async fn start_scan(&self, minew_only: bool) -> bool {
      match self.session.start(self.defaults.union(ScanOptions { minew_only })) {
         Ok(()) => true,
         Err(e) => {
            info!("StartScan refused: {e}");
            false
         },
      }
   }

   async fn stop_scan(&self) {
      self.session.stop();
   }

   async fn clear_devices(&self) {
      self.session.clear();
   }

   async fn get_status(&self) -> String {
      self.session.status().to_json().to_string()
   }

   async fn get_readings(&self) -> zbus::fdo::Result<String> {
      // Already strongest first
      let values: Vec<serde_json::Value> =
         self.session.readings().iter().map(|r| r.to_json()).collect();
      to_json_string(&values)
   }

   async fn get_devices(&self) -> zbus::fdo::Result<String> {
      // Already strongest first
      to_json_string(&self.session.devices())
   }

   async fn check_permissions(&self) -> String {
      permissions_json(self.session.check_permissions())
   }

   async fn request_permissions(&self) -> String {
      permissions_json(self.session.request_permissions())
   }

   // Signals
   #[zbus(signal)]
   pub async fn reading_found(
      emitter: &SignalEmitter<'_>,
      address: &str,
      reading: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn raw_device_found(
      emitter: &SignalEmitter<'_>,
      address: &str,
      device: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn state_changed(emitter: &SignalEmitter<'_>, status: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn scan_error(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;

   #[zbus(property)]
   async fn device_count(&self) -> u32 {
      u32::try_from(self.session.status().device_count).unwrap_or(u32::MAX)
   }
}
