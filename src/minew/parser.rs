//! Frame decoding for Minew manufacturer data.
//!
//! Decoding is a pure function of its inputs. Payloads from other vendors
//! and payloads shorter than the frame header are not recognized; anything
//! past the header is best-effort, so truncated bodies yield readings with
//! the affected fields left unset.

use log::trace;
use uuid::Uuid;

use crate::minew::protocol::{
   Acceleration, BODY_OFFSET, BeaconReading, FrameType, MIN_FRAME_LEN, MINEW_VENDOR_ID,
   TAG_ACCELERATION, TAG_BATTERY, TAG_DEVICE_INFO, TAG_IBEACON, TAG_TEMPERATURE_HUMIDITY,
};

/// Checks the little-endian vendor id at the start of a manufacturer-data
/// payload.
pub fn is_minew_payload(data: &[u8]) -> bool {
   match data {
      [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) == MINEW_VENDOR_ID,
      _ => false,
   }
}

/// Resolves a tag byte to a frame layout.
///
/// `payload` is the frame body (everything after the product model byte).
/// It is unused today but lets tags shared by several layouts be told apart
/// without touching [`decode`].
pub fn classify(tag: u8, _payload: &[u8]) -> FrameType {
   match tag {
      TAG_DEVICE_INFO => FrameType::DeviceInfo,
      // Shared with the info frame (TAG_INFO); every capture seen so
      // far carries a sensor body, so the sensor layout wins.
      TAG_TEMPERATURE_HUMIDITY => FrameType::TemperatureHumidity,
      TAG_ACCELERATION => FrameType::Acceleration,
      TAG_IBEACON => FrameType::IBeacon,
      TAG_BATTERY => FrameType::Battery,
      other => FrameType::Unknown(other),
   }
}

/// Decodes a Minew advertisement.
///
/// Returns `None` when `data` is shorter than the frame header or carries a
/// different vendor id. Unknown frame types produce a reading with only the
/// header fields set.
pub fn decode(address: &str, rssi: i16, data: &[u8], timestamp: u64) -> Option<BeaconReading> {
   if data.len() < MIN_FRAME_LEN || !is_minew_payload(data) {
      return None;
   }

   let tag = data[2];
   let product_model = data[3];
   let frame_type = classify(tag, &data[BODY_OFFSET..]);

   let mut reading =
      BeaconReading::bare(address, rssi, frame_type, product_model, data, timestamp);

   match frame_type {
      FrameType::DeviceInfo | FrameType::Battery => {
         reading.battery_level = byte_at(data, 4);
      },
      FrameType::TemperatureHumidity => {
         reading.temperature = i16_be_at(data, 4).map(|t| f64::from(t) / 256.0);
         reading.humidity = u16_be_at(data, 6).map(|h| f64::from(h) / 10.0);
         reading.battery_level = byte_at(data, 8);
      },
      FrameType::Acceleration => {
         if let (Some(x), Some(y), Some(z)) =
            (i16_be_at(data, 4), i16_be_at(data, 6), i16_be_at(data, 8))
         {
            reading.accelerometer = Some(Acceleration { x, y, z });
         }
         reading.battery_level = byte_at(data, 10);
      },
      FrameType::IBeacon => {
         if let (Some(uuid), Some(major), Some(minor)) =
            (uuid_at(data, 4), u16_be_at(data, 20), u16_be_at(data, 22))
         {
            reading.uuid = Some(uuid);
            reading.major = Some(major);
            reading.minor = Some(minor);
         }
      },
      FrameType::Unknown(tag) => {
         trace!("Unknown Minew frame 0x{tag:02x} from {address}");
      },
   }

   Some(reading)
}

fn byte_at(data: &[u8], offset: usize) -> Option<u8> {
   data.get(offset).copied()
}

fn u16_be_at(data: &[u8], offset: usize) -> Option<u16> {
   let bytes = data.get(offset..offset + 2)?;
   Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads an unsigned big-endian word and reinterprets it as two's complement.
fn i16_be_at(data: &[u8], offset: usize) -> Option<i16> {
   u16_be_at(data, offset).map(|raw| raw as i16)
}

fn uuid_at(data: &[u8], offset: usize) -> Option<Uuid> {
   let bytes: [u8; 16] = data.get(offset..offset + 16)?.try_into().ok()?;
   Some(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
   use super::*;

   const ADDR: &str = "C3:00:00:38:89:BB";
   const TS: u64 = 1_700_000_000_000;

   #[test]
   fn test_rejects_short_payloads() {
      assert!(decode(ADDR, -60, &[], TS).is_none());
      assert!(decode(ADDR, -60, &[0xE1], TS).is_none());
      assert!(decode(ADDR, -60, &[0xE1, 0xFF, 0xA8], TS).is_none());
   }

   #[test]
   fn test_rejects_other_vendors() {
      // Apple company id
      assert!(decode(ADDR, -60, &[0x4C, 0x00, 0x02, 0x15, 0x00], TS).is_none());
      // Minew id in the wrong byte order
      assert!(decode(ADDR, -60, &[0xFF, 0xE1, 0xA8, 0x01, 55], TS).is_none());
      assert!(!is_minew_payload(&[0xFF, 0xE1]));
      assert!(is_minew_payload(&[0xE1, 0xFF]));
   }

   #[test]
   fn test_battery_frame() {
      let reading = decode(ADDR, -60, &[0xE1, 0xFF, 0xA8, 0x01, 55], TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::Battery);
      assert_eq!(reading.product_model, 0x01);
      assert_eq!(reading.battery_level, Some(55));
      assert!(reading.temperature.is_none());
      assert!(reading.humidity.is_none());
      assert_eq!(reading.address, ADDR);
      assert_eq!(reading.rssi, -60);
      assert_eq!(reading.timestamp, TS);
   }

   #[test]
   fn test_device_info_frame() {
      let reading = decode(ADDR, -70, &[0xE1, 0xFF, 0xA0, 0x08, 92], TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::DeviceInfo);
      assert_eq!(reading.battery_level, Some(92));

      let bare = decode(ADDR, -70, &[0xE1, 0xFF, 0xA0, 0x08], TS).unwrap();
      assert_eq!(bare.battery_level, None);
   }

   #[test]
   fn test_temperature_humidity_frame() {
      let data = [0xE1, 0xFF, 0xA1, 0x01, 0xFF, 0x38, 0x02, 0x1C, 87];
      let reading = decode(ADDR, -55, &data, TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::TemperatureHumidity);
      assert_eq!(reading.temperature, Some(-0.781_25));
      assert_eq!(reading.humidity, Some(54.0));
      assert_eq!(reading.battery_level, Some(87));
   }

   #[test]
   fn test_positive_temperature() {
      // 0x1980 / 256 = 25.5
      let data = [0xE1, 0xFF, 0xA1, 0x01, 0x19, 0x80, 0x01, 0xF4];
      let reading = decode(ADDR, -55, &data, TS).unwrap();
      assert_eq!(reading.temperature, Some(25.5));
      assert_eq!(reading.humidity, Some(50.0));
      assert_eq!(reading.battery_level, None);
   }

   #[test]
   fn test_truncated_sensor_frame_is_degraded() {
      let temp_only = decode(ADDR, -55, &[0xE1, 0xFF, 0xA1, 0x01, 0x19, 0x80, 0x01], TS).unwrap();
      assert_eq!(temp_only.temperature, Some(25.5));
      assert!(temp_only.humidity.is_none());

      let header_only = decode(ADDR, -55, &[0xE1, 0xFF, 0xA1, 0x01, 0x19], TS).unwrap();
      assert_eq!(header_only.frame_type, FrameType::TemperatureHumidity);
      assert!(header_only.temperature.is_none());
      assert!(header_only.humidity.is_none());
      assert!(header_only.battery_level.is_none());
   }

   #[test]
   fn test_acceleration_frame() {
      let data = [
         0xE1, 0xFF, 0xA2, 0x03, // header
         0x00, 0x10, // x = 16
         0xFF, 0xF0, // y = -16
         0x01, 0x00, // z = 256
         64,   // battery
      ];
      let reading = decode(ADDR, -80, &data, TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::Acceleration);
      assert_eq!(reading.accelerometer, Some(Acceleration { x: 16, y: -16, z: 256 }));
      assert_eq!(reading.battery_level, Some(64));

      let truncated = decode(ADDR, -80, &data[..9], TS).unwrap();
      assert!(truncated.accelerometer.is_none());
      assert!(truncated.battery_level.is_none());
   }

   #[test]
   fn test_ibeacon_frame() {
      let mut data = vec![0xE1, 0xFF, 0xA7, 0x02];
      data.extend_from_slice(&[
         0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7, 0x10, 0x96,
         0xE0,
      ]);
      data.extend_from_slice(&[0x27, 0x11, 0x00, 0x2A]);

      let reading = decode(ADDR, -48, &data, TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::IBeacon);
      assert_eq!(
         reading.uuid_string().as_deref(),
         Some("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0")
      );
      assert_eq!(reading.major, Some(10001));
      assert_eq!(reading.minor, Some(42));
      assert!(reading.battery_level.is_none());

      let short = decode(ADDR, -48, &data[..22], TS).unwrap();
      assert!(short.uuid.is_none());
      assert!(short.major.is_none());
   }

   #[test]
   fn test_unknown_frame_keeps_header() {
      let data = [0xE1, 0xFF, 0x5C, 0x07, 1, 2, 3, 4];
      let reading = decode(ADDR, -90, &data, TS).unwrap();
      assert_eq!(reading.frame_type, FrameType::Unknown(0x5C));
      assert_eq!(reading.product_model, 0x07);
      assert_eq!(reading.raw_bytes.as_slice(), &data);
      assert!(reading.battery_level.is_none());
      assert!(reading.temperature.is_none());
      assert!(reading.accelerometer.is_none());
      assert!(reading.uuid.is_none());
   }

   #[test]
   fn test_decode_is_deterministic() {
      let payloads: [&[u8]; 4] = [
         &[0xE1, 0xFF, 0xA1, 0x01, 0xFF, 0x38, 0x02, 0x1C, 87],
         &[0xE1, 0xFF, 0xA8, 0x01, 55],
         &[0xE1, 0xFF, 0x00, 0x00],
         &[0x00, 0x01, 0x02],
      ];
      for data in payloads {
         let copy = data.to_vec();
         assert_eq!(decode(ADDR, -60, data, TS), decode(ADDR, -60, data, TS));
         assert_eq!(data, copy.as_slice());
      }
   }
}
