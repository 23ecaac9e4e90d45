//! Lifecycle commands and the line framing spoken with a process-hosted
//! adapter service.
//!
//! Each message is a single JSON object terminated by `\n`. The manager
//! writes [`CommandFrame`]s to the service's stdin and reads
//! [`ServiceMessage`]s from its stdout.

use serde::{Deserialize, Serialize};

use crate::{adapter::state::AdapterState, error::Result};

/// Commands the manager sends to a bound adapter service.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::Display,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleCommand {
   /// Start the BLE-only phase from `Off`.
   OffToBleOn,
   /// Continue from `BleOn` to full classic operation.
   BleOnToOn,
   /// Leave full operation and fall back to `BleOn`.
   OnToBleOn,
   /// Stop the BLE-only phase, ending at `Off`.
   BleOnToOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
   pub command: LifecycleCommand,
}

/// Messages emitted by the adapter service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceMessage {
   /// The service finished initializing and accepts commands.
   Ready,
   /// The service moved between two lifecycle states.
   StateChanged { old: AdapterState, new: AdapterState },
}

pub fn encode_command(command: LifecycleCommand) -> Result<String> {
   let mut line = serde_json::to_string(&CommandFrame { command })?;
   line.push('\n');
   Ok(line)
}

pub fn parse_message(line: &str) -> Result<ServiceMessage> {
   Ok(serde_json::from_str(line.trim())?)
}
