//! Error types for the lifecycle service.
//!
//! This module defines the error types that can surface from the lifecycle
//! manager handle, the adapter service binding, persistence, configuration
//! and the D-Bus surface.

use thiserror::Error;

/// Main error type for the lifecycle service.
#[derive(Error, Debug)]
pub enum LifecycleError {
   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("Could not determine data directory")]
   DataDirNotFound,

   #[error("Manager has been shut down")]
   ManagerShutdown,

   #[error("Adapter proxy closed")]
   ProxyClosed,
}

/// Convenience type alias for Results with `LifecycleError`.
pub type Result<T> = std::result::Result<T, LifecycleError>;
