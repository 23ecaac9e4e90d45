//! Canonical adapter states and the transition graph between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the adapter service.
///
/// Bring-up walks `Off -> BleTurningOn -> BleOn -> TurningOn -> On`, and
/// bring-down mirrors it through `TurningOff -> BleOn -> BleTurningOff -> Off`.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterState {
   Off,
   BleTurningOn,
   BleOn,
   TurningOn,
   On,
   TurningOff,
   BleTurningOff,
}

impl AdapterState {
   pub fn to_str(self) -> &'static str {
      self.into()
   }

   /// Returns true if the remote service may move from `self` to `next`.
   pub const fn accepts(self, next: Self) -> bool {
      matches!(
         (self, next),
         (Self::Off, Self::BleTurningOn)
            | (Self::BleTurningOn, Self::BleOn)
            | (Self::BleOn, Self::TurningOn | Self::BleTurningOff)
            | (Self::TurningOn, Self::On)
            | (Self::On, Self::TurningOff)
            | (Self::TurningOff, Self::BleOn)
            | (Self::BleTurningOff, Self::Off)
      )
   }

   /// The state as seen by classic (BR/EDR) listeners, for which the whole
   /// BLE-only phase reads as `Off`.
   pub const fn classic(self) -> Self {
      match self {
         Self::Off | Self::BleTurningOn | Self::BleOn | Self::BleTurningOff => Self::Off,
         Self::TurningOn => Self::TurningOn,
         Self::On => Self::On,
         Self::TurningOff => Self::TurningOff,
      }
   }
}

/// How far an enable request should drive the adapter.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   PartialOrd,
   Ord,
   Hash,
   Serialize,
   Deserialize,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnableMode {
   BleOnly,
   Full,
}

impl EnableMode {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}

/// Broadcast channel a state change is published on.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::Display,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
   Ble,
   Classic,
}

impl Channel {
   pub fn to_str(self) -> &'static str {
      self.into()
   }
}
