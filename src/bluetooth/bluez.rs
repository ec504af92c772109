//! `BlueZ` backend for scan sessions.
//!
//! [`BluezAdapter`] is a thin handle; the actual D-Bus traffic happens on an
//! actor task that owns the `bluer` session. Commands reach the actor over an
//! mpsc inbox and everything the adapter reports comes back as
//! [`HardwareEvent`]s on the channel returned by [`BluezAdapter::open`].

use std::{collections::HashMap, pin::Pin, sync::Arc};

use bluer::{
   Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::stream::{Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use parking_lot::RwLock;
use smol_str::SmolStr;
use tokio::{
   select,
   sync::mpsc::{self, error::TrySendError},
};

use crate::{
   bluetooth::adapter::{AdapterState, AdvertisementEvent, BleAdapter, HardwareEvent, ScanOptions},
   config::Config,
   error::{Result, ScanError},
   minew::{MINEW_VENDOR_ID, RawBytes},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

type DiscoveryStream = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

#[derive(Debug)]
enum AdapterCommand {
   StartDiscovery,
   StopDiscovery,
}

/// Handle to a `BlueZ` adapter driven by a background actor.
pub struct BluezAdapter {
   name: SmolStr,
   state: Arc<RwLock<AdapterState>>,
   inbox: mpsc::Sender<AdapterCommand>,
}

impl BluezAdapter {
   /// Connects to `bluetoothd` and spawns the adapter actor.
   ///
   /// Must be called from within a tokio runtime.
   pub async fn open(config: &Config) -> Result<(Self, mpsc::Receiver<HardwareEvent>)> {
      let session = Session::new().await?;
      let adapter = match &config.adapter {
         Some(name) => session.adapter(name).map_err(|e| {
            warn!("Adapter {name} unavailable: {e}");
            ScanError::AdapterNotFound
         })?,
         None => session.default_adapter().await?,
      };

      let name = SmolStr::from(adapter.name());
      let initial = if adapter.is_powered().await? {
         AdapterState::PoweredOn
      } else {
         AdapterState::PoweredOff
      };
      info!("Using adapter {name} ({initial})");

      let state = Arc::new(RwLock::new(initial));
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

      tokio::spawn(
         AdapterActor {
            _session: session,
            adapter,
            state: state.clone(),
            command_rx,
            event_tx,
            duplicate_data: config.duplicate_data,
            discovery: None,
         }
         .run(),
      );

      Ok((
         Self {
            name,
            state,
            inbox: command_tx,
         },
         event_rx,
      ))
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   fn send(&self, command: AdapterCommand) -> Result<()> {
      self.inbox.try_send(command).map_err(|e| match e {
         TrySendError::Full(_) => ScanError::ScanStartFailure("adapter command queue full".into()),
         TrySendError::Closed(_) => ScanError::BackendShutdown,
      })
   }
}

impl BleAdapter for BluezAdapter {
   fn state(&self) -> AdapterState {
      *self.state.read()
   }

   fn start_discovery(&self, options: &ScanOptions) -> Result<()> {
      debug!("Requesting discovery on {} ({options:?})", self.name);
      self.send(AdapterCommand::StartDiscovery)
   }

   fn stop_discovery(&self) -> Result<()> {
      self.send(AdapterCommand::StopDiscovery)
   }
}

// === Adapter Actor ===

struct AdapterActor {
   _session: Session,
   adapter: Adapter,
   state: Arc<RwLock<AdapterState>>,
   command_rx: mpsc::Receiver<AdapterCommand>,
   event_tx: mpsc::Sender<HardwareEvent>,
   duplicate_data: bool,
   discovery: Option<DiscoveryStream>,
}

impl AdapterActor {
   async fn run(mut self) {
      let mut adapter_events = match self.adapter.events().await {
         Ok(events) => events,
         Err(e) => {
            error!("Failed to watch adapter {}: {e}", self.adapter.name());
            self.publish(HardwareEvent::AdapterState(AdapterState::Unsupported)).await;
            return;
         },
      };

      loop {
         select! {
            cmd = self.command_rx.recv() => {
               let Some(cmd) = cmd else {
                  debug!("Adapter handle dropped, shutting down");
                  break;
               };
               self.handle_command(cmd).await;
            }
            Some(event) = adapter_events.next() => {
               self.handle_adapter_event(event).await;
            }
            event = next_discovery_event(&mut self.discovery), if self.discovery.is_some() => {
               match event {
                  Some(AdapterEvent::DeviceAdded(addr)) => self.report_device(addr).await,
                  Some(_) => {},
                  None => {
                     self.discovery = None;
                     self
                        .publish(HardwareEvent::DiscoveryFailed("discovery stream ended".into()))
                        .await;
                  },
               }
            }
         }
      }

      // Dropping the stream ends discovery in bluetoothd
      self.discovery = None;
   }

   async fn handle_command(&mut self, cmd: AdapterCommand) {
      match cmd {
         AdapterCommand::StartDiscovery => {
            if self.discovery.is_some() {
               return;
            }
            match self.start_discovery().await {
               Ok(stream) => {
                  info!("Discovery started on {}", self.adapter.name());
                  self.discovery = Some(stream);
               },
               Err(e) => {
                  warn!("Failed to start discovery: {e}");
                  self.publish(HardwareEvent::DiscoveryFailed(e.to_string().into())).await;
               },
            }
         },
         AdapterCommand::StopDiscovery => {
            if self.discovery.take().is_some() {
               info!("Discovery stopped on {}", self.adapter.name());
            }
         },
      }
   }

   async fn start_discovery(&self) -> bluer::Result<DiscoveryStream> {
      let filter = DiscoveryFilter {
         transport: DiscoveryTransport::Le,
         duplicate_data: self.duplicate_data,
         ..Default::default()
      };
      self.adapter.set_discovery_filter(filter).await?;
      let stream = self.adapter.discover_devices_with_changes().await?;
      Ok(Box::pin(stream))
   }

   async fn handle_adapter_event(&mut self, event: AdapterEvent) {
      let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event else {
         return;
      };

      let state = if powered {
         AdapterState::PoweredOn
      } else {
         AdapterState::PoweredOff
      };
      info!("Adapter {} is now {state}", self.adapter.name());
      *self.state.write() = state;

      if !powered {
         self.discovery = None;
      }
      self.publish(HardwareEvent::AdapterState(state)).await;
   }

   async fn report_device(&self, addr: Address) {
      match self.read_advertisement(addr).await {
         Ok(Some(event)) => self.publish(HardwareEvent::Advertisement(event)).await,
         Ok(None) => trace!("{addr}: no RSSI, skipping cached entry"),
         Err(e) => debug!("{addr}: failed to read properties: {e}"),
      }
   }

   async fn read_advertisement(&self, addr: Address) -> bluer::Result<Option<AdvertisementEvent>> {
      let device = self.adapter.device(addr)?;

      // Devices without RSSI are cached entries, not live advertisements
      let Some(rssi) = device.rssi().await? else {
         return Ok(None);
      };

      let manufacturer_data = device
         .manufacturer_data()
         .await?
         .map(|data| with_company_id(&data))
         .unwrap_or_default();

      let mut event = AdvertisementEvent::new(addr.to_string(), rssi, &manufacturer_data);
      event.name = device.name().await.ok().flatten().map(SmolStr::from);
      event.tx_power = device.tx_power().await.ok().flatten();
      Ok(Some(event))
   }

   async fn publish(&self, event: HardwareEvent) {
      if let Err(e) = self.event_tx.send(event).await {
         debug!("Hardware event receiver gone: {e}");
      }
   }
}

async fn next_discovery_event(discovery: &mut Option<DiscoveryStream>) -> Option<AdapterEvent> {
   match discovery {
      Some(stream) => stream.next().await,
      None => None,
   }
}

/// Rebuilds the wire layout of manufacturer data from `BlueZ`'s map.
///
/// `BlueZ` splits off the company id; decoders expect it as a little-endian
/// prefix. When a device advertises several ids the Minew one wins, otherwise
/// the lowest id.
pub fn with_company_id(data: &HashMap<u16, Vec<u8>>) -> RawBytes {
   let Some((id, payload)) = data
      .get_key_value(&MINEW_VENDOR_ID)
      .or_else(|| data.iter().min_by_key(|(id, _)| **id))
   else {
      return RawBytes::new();
   };

   let mut bytes = RawBytes::from_slice(&id.to_le_bytes());
   bytes.extend_from_slice(payload);
   bytes
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::minew;

   #[test]
   fn test_company_id_prefix() {
      let data = HashMap::from([(MINEW_VENDOR_ID, vec![0xA8, 0x01, 55])]);
      let bytes = with_company_id(&data);
      assert_eq!(bytes.as_slice(), [0xE1, 0xFF, 0xA8, 0x01, 55]);

      let reading = minew::decode("C3:00:00:00:00:01", -50, &bytes, 0).unwrap();
      assert_eq!(reading.battery_level, Some(55));
   }

   #[test]
   fn test_minew_id_preferred() {
      let data = HashMap::from([(0x004C, vec![0x02, 0x15]), (MINEW_VENDOR_ID, vec![0xA8])]);
      assert_eq!(with_company_id(&data).as_slice(), [0xE1, 0xFF, 0xA8]);
   }

   #[test]
   fn test_lowest_id_otherwise() {
      let data = HashMap::from([(0x0590, vec![0x01]), (0x004C, vec![0x02, 0x15])]);
      assert_eq!(with_company_id(&data).as_slice(), [0x4C, 0x00, 0x02, 0x15]);
      assert!(with_company_id(&HashMap::new()).is_empty());
   }
}
