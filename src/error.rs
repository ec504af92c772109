//! Error types for the Minew scanning service.
//!
//! This module defines the errors surfaced by scan sessions, the permission
//! negotiator, the `BlueZ` backend, configuration and the D-Bus layer.
//! Decoding never produces an error: frames that are not understood are
//! skipped or degraded instead.

use thiserror::Error;

use crate::{bluetooth::adapter::AdapterState, permissions::store};

/// Main error type for the scanning service.
#[derive(Error, Debug)]
pub enum ScanError {
   #[error("Bluetooth hardware unavailable (adapter is {0})")]
   HardwareUnavailable(AdapterState),

   #[error("Bluetooth permissions not granted")]
   PermissionDenied,

   #[error("Bluetooth permissions permanently denied, grant them in system settings")]
   PermissionDeniedPermanently,

   #[error("Failed to start discovery: {0}")]
   ScanStartFailure(String),

   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Permission store error: {0}")]
   Store(#[from] store::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Adapter not found")]
   AdapterNotFound,

   #[error("Adapter backend has been shut down")]
   BackendShutdown,
}

/// Convenience type alias for Results with `ScanError`.
pub type Result<T> = std::result::Result<T, ScanError>;
