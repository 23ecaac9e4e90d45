//! Lifecycle supervision for an out-of-process Bluetooth adapter service.
//!
//! The [`LifecycleManager`] serializes enable and disable requests, binds
//! the adapter service, follows its multi-stage bring-up and bring-down, and
//! fans out state changes to observers.

pub mod adapter;
pub mod config;
pub mod dbus;
pub mod error;
pub mod event;
pub mod lifecycle;

pub use crate::{
   adapter::state::{AdapterState, Channel, EnableMode},
   error::{LifecycleError, Result},
   event::{EventBus, EventSender, ManagerEvent},
   lifecycle::manager::{CallerId, LifecycleManager, ManagerStatus},
};
