//! Configuration management for the lifecycle service.
//!
//! This module handles loading and saving configuration from disk,
//! including the adapter service command line and bind timing.

use std::{env, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
   error::{LifecycleError, Result},
   lifecycle::restriction::UserId,
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
   #[serde(default = "default_bind_timeout")]
   pub bind_timeout_sec: u64,

   #[serde(default = "default_adapter_command")]
   pub adapter_command: Vec<String>,

   /// Desired state when nothing has been persisted for the user yet.
   #[serde(default = "default_enabled")]
   pub default_enabled: bool,

   #[serde(default)]
   pub user: i32,

   #[serde(default = "default_history_size")]
   pub history_size: usize,
}

const fn default_bind_timeout() -> u64 {
   120
}

fn default_adapter_command() -> Vec<String> {
   vec!["btadapterd".to_string()]
}

const fn default_enabled() -> bool {
   true
}

const fn default_history_size() -> usize {
   20
}

impl Default for Config {
   fn default() -> Self {
      Self {
         bind_timeout_sec: default_bind_timeout(),
         adapter_command: default_adapter_command(),
         default_enabled: default_enabled(),
         user: 0,
         history_size: default_history_size(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      Ok(config_home()?.join("btlifecycle").join("config.toml"))
   }

   pub const fn bind_timeout(&self) -> Duration {
      Duration::from_secs(self.bind_timeout_sec)
   }

   pub const fn user(&self) -> UserId {
      UserId(self.user)
   }
}

fn config_home() -> Result<PathBuf> {
   if let Ok(home) = env::var("BTLIFECYCLE_HOME") {
      Ok(PathBuf::from(home))
   } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
      Ok(PathBuf::from(config_home))
   } else if let Ok(home) = env::var("HOME") {
      Ok(PathBuf::from(home).join(".config"))
   } else {
      Err(LifecycleError::ConfigDirNotFound)
   }
}
