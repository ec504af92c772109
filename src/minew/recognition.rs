//! Minew device recognition by MAC address.
//!
//! Minew tags ship with MAC addresses under a fixed vendor prefix. The
//! helpers here normalize user- or QR-supplied addresses and check them
//! against that prefix.

use smol_str::SmolStr;
use thiserror::Error;

/// OUI prefixes (cleaned form) assigned to Minew tags.
const MINEW_PREFIXES: &[&str] = &["C30000"];

/// Prefix used by Minew QR labels, e.g. `MINEW:C300003889BB`.
const QR_PREFIX: &str = "MINEW:";

/// Cleaned MAC length: 6 bytes as hex.
const MAC_HEX_LEN: usize = 12;

/// Colon-separated MAC length.
const MAX_MAC_LEN: usize = 17;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacError {
   #[error("MAC must have 12 hexadecimal characters")]
   InvalidFormat,

   #[error("Only Minew beacons are accepted (C30000...)")]
   NotMinew,
}

/// Strips separators and whitespace and uppercases the address.
///
/// `C3:00:00:38:89:BB` becomes `C300003889BB`.
pub fn clean_mac(mac: &str) -> SmolStr {
   mac.chars()
      .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
      .map(|c| c.to_ascii_uppercase())
      .collect()
}

/// Formats a MAC as colon-separated pairs.
///
/// Returns the input unchanged when it does not clean to 12 characters.
pub fn format_mac(mac: &str) -> SmolStr {
   let cleaned = clean_mac(mac);
   if cleaned.len() != MAC_HEX_LEN || !cleaned.is_ascii() {
      return SmolStr::new(mac);
   }

   let mut out = String::with_capacity(17);
   for (i, pair) in cleaned.as_bytes().chunks(2).enumerate() {
      if i > 0 {
         out.push(':');
      }
      out.push(char::from(pair[0]));
      out.push(char::from(pair[1]));
   }
   out.into()
}

/// Checks that the address cleans to 12 hex digits.
pub fn is_valid_mac(mac: &str) -> bool {
   let cleaned = clean_mac(mac);
   cleaned.len() == MAC_HEX_LEN && cleaned.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Checks the address against the known Minew prefixes.
pub fn is_minew_mac(mac: &str) -> bool {
   let cleaned = clean_mac(mac);
   MINEW_PREFIXES.iter().any(|p| cleaned.starts_with(p))
}

/// Validates a Minew MAC and returns it in colon-separated form.
pub fn validate_minew_mac(mac: &str) -> Result<SmolStr, MacError> {
   if !is_valid_mac(mac) {
      return Err(MacError::InvalidFormat);
   }
   if !is_minew_mac(mac) {
      return Err(MacError::NotMinew);
   }
   Ok(format_mac(mac))
}

/// Extracts a cleaned MAC from a scanned QR payload.
///
/// Accepted shapes, in order: a bare MAC, `MINEW:<mac>`, a JSON object with
/// a `mac` field, and a URL with the MAC right after a `/`. A run of MAC
/// characters longer than 17 keeps its first 17.
pub fn extract_mac_from_qr(data: &str) -> Option<SmolStr> {
   let data = data.trim();

   if looks_like_mac(data) {
      return Some(clean_mac(data));
   }

   if let Some(pos) = find_ignore_ascii_case(data, QR_PREFIX)
      && let Some(candidate) = mac_run(&data[pos + QR_PREFIX.len()..])
   {
      return Some(clean_mac(candidate));
   }

   if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(data)
      && let Some(mac) = obj.get("mac").and_then(|v| v.as_str())
   {
      return Some(clean_mac(mac));
   }

   data
      .match_indices('/')
      .find_map(|(pos, _)| mac_run(&data[pos + 1..]))
      .map(clean_mac)
}

/// 12 to 17 characters drawn from hex digits and colons.
fn looks_like_mac(s: &str) -> bool {
   (MAC_HEX_LEN..=MAX_MAC_LEN).contains(&s.len())
      && s.bytes().all(|b| b.is_ascii_hexdigit() || b == b':')
}

/// Leading run of MAC characters, capped at 17, if it holds at least 12.
fn mac_run(s: &str) -> Option<&str> {
   let run = leading_mac_chars(s);
   (run.len() >= MAC_HEX_LEN).then(|| &run[..run.len().min(MAX_MAC_LEN)])
}

fn leading_mac_chars(s: &str) -> &str {
   let end = s
      .bytes()
      .position(|b| !(b.is_ascii_hexdigit() || b == b':'))
      .unwrap_or(s.len());
   &s[..end]
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
   haystack
      .as_bytes()
      .windows(needle.len())
      .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_clean_and_format() {
      assert_eq!(clean_mac("c3:00:00:38:89:bb"), "C300003889BB");
      assert_eq!(clean_mac(" C3-00-00-38-89-BB "), "C300003889BB");
      assert_eq!(format_mac("C300003889BB"), "C3:00:00:38:89:BB");
      // Not a MAC, returned untouched
      assert_eq!(format_mac("C30000"), "C30000");
   }

   #[test]
   fn test_validation() {
      assert!(is_valid_mac("C3:00:00:38:89:BB"));
      assert!(!is_valid_mac("C3:00:00:38:89:BG"));
      assert!(!is_valid_mac("C3:00:00:38:89"));

      assert_eq!(
         validate_minew_mac("c300003889bb").as_deref(),
         Ok("C3:00:00:38:89:BB")
      );
      assert_eq!(validate_minew_mac("AC:23:3F:01:02:03"), Err(MacError::NotMinew));
      assert_eq!(validate_minew_mac("nope"), Err(MacError::InvalidFormat));
   }

   #[test]
   fn test_extract_from_qr() {
      assert_eq!(extract_mac_from_qr("C3:00:00:38:89:BB").as_deref(), Some("C300003889BB"));
      assert_eq!(extract_mac_from_qr("minew:c300003889bb").as_deref(), Some("C300003889BB"));
      assert_eq!(
         extract_mac_from_qr(r#"{"mac":"C3:00:00:38:89:BB","sn":"123"}"#).as_deref(),
         Some("C300003889BB")
      );
      assert_eq!(
         extract_mac_from_qr("https://tags.example.com/t/C300003889BB?src=qr").as_deref(),
         Some("C300003889BB")
      );
      assert_eq!(extract_mac_from_qr("hello world"), None);
      assert_eq!(extract_mac_from_qr(r#"{"serial":"1"}"#), None);
   }

   #[test]
   fn test_extract_from_qr_with_trailing_characters() {
      // Runs longer than a MAC keep their first 17 characters
      assert_eq!(
         extract_mac_from_qr("MINEW:C300003889BB0011").as_deref(),
         Some("C300003889BB0011")
      );
      assert_eq!(
         extract_mac_from_qr("MINEW:C3:00:00:38:89:BB:01").as_deref(),
         Some("C300003889BB")
      );
      assert_eq!(
         extract_mac_from_qr("https://tags.example.com/C3:00:00:38:89:BBx/info").as_deref(),
         Some("C300003889BB")
      );
      assert_eq!(
         extract_mac_from_qr("https://tags.example.com/t/C300003889BBAA11CC").as_deref(),
         Some("C300003889BBAA11C")
      );
      assert_eq!(extract_mac_from_qr("MINEW:C30000"), None);
   }
}
