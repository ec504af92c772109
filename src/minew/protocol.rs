//! Minew advertisement protocol definitions and data structures.
//!
//! Minew beacons advertise a manufacturer-data payload laid out as
//! `[vendor id (LE u16)] [frame type] [product model] [frame body...]`.
//! This module holds the protocol constants, the frame-type tags and the
//! decoded [`BeaconReading`] value.

use std::fmt;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use smol_str::SmolStr;
use uuid::Uuid;

/// Minew company identifier, read little-endian from the first two payload
/// bytes (`E1 FF` on the wire).
pub const MINEW_VENDOR_ID: u16 = 0xFFE1;

/// Vendor id + frame type + product model.
pub const MIN_FRAME_LEN: usize = 4;

/// Offset of the first frame-body byte.
pub const BODY_OFFSET: usize = 4;

pub const TAG_DEVICE_INFO: u8 = 0xA0;
/// Shared by the info frame and the temperature/humidity frame.
pub const TAG_INFO: u8 = 0xA1;
pub const TAG_TEMPERATURE_HUMIDITY: u8 = 0xA1;
pub const TAG_ACCELERATION: u8 = 0xA2;
pub const TAG_IBEACON: u8 = 0xA7;
pub const TAG_BATTERY: u8 = 0xA8;

/// Raw advertisement payload. Legacy advertisements carry at most 31 bytes,
/// so manufacturer data stays inline.
pub type RawBytes = SmallVec<[u8; 32]>;

/// Layout of a Minew frame, resolved from its tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
   DeviceInfo,
   TemperatureHumidity,
   Acceleration,
   IBeacon,
   Battery,
   Unknown(u8),
}

impl FrameType {
   /// The tag byte this frame type is carried under.
   pub const fn tag(self) -> u8 {
      match self {
         Self::DeviceInfo => TAG_DEVICE_INFO,
         Self::TemperatureHumidity => TAG_TEMPERATURE_HUMIDITY,
         Self::Acceleration => TAG_ACCELERATION,
         Self::IBeacon => TAG_IBEACON,
         Self::Battery => TAG_BATTERY,
         Self::Unknown(tag) => tag,
      }
   }
}

impl fmt::Display for FrameType {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::DeviceInfo => f.write_str("Device Info"),
         Self::TemperatureHumidity => f.write_str("Temp/Humidity"),
         Self::Acceleration => f.write_str("Acceleration"),
         Self::IBeacon => f.write_str("iBeacon"),
         Self::Battery => f.write_str("Battery"),
         Self::Unknown(tag) => write!(f, "Unknown (0x{tag:02x})"),
      }
   }
}

impl Serialize for FrameType {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_u8(self.tag())
   }
}

/// Three-axis acceleration sample, raw signed units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Acceleration {
   pub x: i16,
   pub y: i16,
   pub z: i16,
}

/// A decoded Minew advertisement.
///
/// Optional fields are only set when the frame type carries them and the
/// payload is long enough to hold them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeaconReading {
   pub address: SmolStr,
   pub rssi: i16,
   pub frame_type: FrameType,
   pub product_model: u8,
   pub battery_level: Option<u8>,
   pub temperature: Option<f64>,
   pub humidity: Option<f64>,
   pub accelerometer: Option<Acceleration>,
   #[serde(serialize_with = "serialize_uuid_upper")]
   pub uuid: Option<Uuid>,
   pub major: Option<u16>,
   pub minor: Option<u16>,
   #[serde(rename = "raw_data", serialize_with = "serialize_hex")]
   pub raw_bytes: RawBytes,
   pub timestamp: u64,
}

impl BeaconReading {
   /// A reading with only the header fields populated.
   pub fn bare(
      address: &str,
      rssi: i16,
      frame_type: FrameType,
      product_model: u8,
      raw: &[u8],
      timestamp: u64,
   ) -> Self {
      Self {
         address: SmolStr::new(address),
         rssi,
         frame_type,
         product_model,
         battery_level: None,
         temperature: None,
         humidity: None,
         accelerometer: None,
         uuid: None,
         major: None,
         minor: None,
         raw_bytes: RawBytes::from_slice(raw),
         timestamp,
      }
   }

   /// The iBeacon UUID in the uppercase hyphenated form used by Minew tooling.
   pub fn uuid_string(&self) -> Option<String> {
      self.uuid.map(|u| {
         let mut buf = Uuid::encode_buffer();
         u.hyphenated().encode_upper(&mut buf).to_owned()
      })
   }

   pub fn raw_hex(&self) -> String {
      hex::encode(&self.raw_bytes)
   }

   pub fn to_json(&self) -> serde_json::Value {
      serde_json::to_value(self).unwrap_or_default()
   }
}

pub(crate) fn serialize_hex<S: Serializer>(bytes: &RawBytes, s: S) -> Result<S::Ok, S::Error> {
   s.serialize_str(&hex::encode(bytes))
}

fn serialize_uuid_upper<S: Serializer>(uuid: &Option<Uuid>, s: S) -> Result<S::Ok, S::Error> {
   match uuid {
      Some(u) => {
         let mut buf = Uuid::encode_buffer();
         s.serialize_str(u.hyphenated().encode_upper(&mut buf))
      },
      None => s.serialize_none(),
   }
}
