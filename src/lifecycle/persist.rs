//! Persisted on/off preference, keyed by user.
//!
//! The manager reads the preference of the foreground user once at start
//! (and again on user switch) and writes it whenever an explicit enable or
//! disable is accepted.

use std::{collections::BTreeMap, env, fs, path::PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
   error::{LifecycleError, Result},
   lifecycle::restriction::UserId,
};

/// Desired adapter power state as last chosen by the user.
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
pub enum Preference {
   On,
   Off,
}

impl Preference {
   pub const fn from_enabled(enabled: bool) -> Self {
      if enabled { Self::On } else { Self::Off }
   }

   pub const fn is_on(self) -> bool {
      matches!(self, Self::On)
   }
}

/// Storage for per-user preferences.
pub trait PreferenceStore: Send {
   /// Returns `None` when nothing was persisted for `user`.
   fn load(&self, user: UserId) -> Result<Option<Preference>>;
   fn store(&mut self, user: UserId, preference: Preference) -> Result<()>;
}

#[derive(Serialize, Deserialize, Default, Debug)]
struct StateFile {
   #[serde(default)]
   users: BTreeMap<String, Preference>,
}

/// Preference store backed by a small TOML file.
#[derive(Debug)]
pub struct TomlPreferenceStore {
   path: PathBuf,
}

impl TomlPreferenceStore {
   pub const fn new(path: PathBuf) -> Self {
      Self { path }
   }

   /// Opens the store at its default location under the local data
   /// directory, honoring `BTLIFECYCLE_HOME`.
   pub fn open() -> Result<Self> {
      let base = if let Ok(home) = env::var("BTLIFECYCLE_HOME") {
         PathBuf::from(home)
      } else {
         dirs::data_local_dir().ok_or(LifecycleError::DataDirNotFound)?
      };
      Ok(Self::new(base.join("btlifecycle").join("state.toml")))
   }

   fn read(&self) -> Result<StateFile> {
      if !self.path.exists() {
         return Ok(StateFile::default());
      }
      let contents = fs::read_to_string(&self.path)?;
      Ok(toml::from_str(&contents)?)
   }
}

impl PreferenceStore for TomlPreferenceStore {
   fn load(&self, user: UserId) -> Result<Option<Preference>> {
      Ok(self.read()?.users.get(&user.0.to_string()).copied())
   }

   fn store(&mut self, user: UserId, preference: Preference) -> Result<()> {
      let mut file = self.read()?;
      file.users.insert(user.0.to_string(), preference);

      if let Some(parent) = self.path.parent() {
         fs::create_dir_all(parent)?;
      }
      fs::write(&self.path, toml::to_string_pretty(&file)?)?;
      debug!("Persisted preference {preference} for {user}");
      Ok(())
   }
}
