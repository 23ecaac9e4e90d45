//! User restriction evaluation.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a user on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
   /// The device-wide user whose restrictions are authoritative.
   pub const SYSTEM: Self = Self(0);
   /// Whoever is in the foreground.
   pub const CURRENT: Self = Self(-2);

   pub const fn is_system(self) -> bool {
      self.0 == Self::SYSTEM.0
   }
}

impl fmt::Display for UserId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match *self {
         Self::CURRENT => f.write_str("current"),
         Self(id) => write!(f, "u{id}"),
      }
   }
}

/// Bluetooth-related restrictions of one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionSnapshot {
   pub disallow_bluetooth: bool,
   pub disallow_bluetooth_sharing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
   Ignore,
   Disable,
}

/// Decides whether a restriction change implies turning the adapter off.
pub const fn evaluate(snapshot: &RestrictionSnapshot) -> Verdict {
   if snapshot.disallow_bluetooth && !snapshot.disallow_bluetooth_sharing {
      Verdict::Disable
   } else {
      Verdict::Ignore
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn snapshot(disallow_bluetooth: bool, disallow_bluetooth_sharing: bool) -> RestrictionSnapshot {
      RestrictionSnapshot {
         disallow_bluetooth,
         disallow_bluetooth_sharing,
      }
   }

   #[test]
   fn test_evaluate_truth_table() {
      assert_eq!(evaluate(&snapshot(false, false)), Verdict::Ignore);
      assert_eq!(evaluate(&snapshot(false, true)), Verdict::Ignore);
      assert_eq!(evaluate(&snapshot(true, false)), Verdict::Disable);
      assert_eq!(evaluate(&snapshot(true, true)), Verdict::Ignore);
   }

   #[test]
   fn test_only_user_zero_is_system() {
      assert!(UserId::SYSTEM.is_system());
      assert!(!UserId::CURRENT.is_system());
      assert!(!UserId(-1).is_system());
      assert!(!UserId(10).is_system());
      assert_eq!(UserId::CURRENT.to_string(), "current");
      assert_eq!(UserId(10).to_string(), "u10");
   }
}
