//! Event handling system for adapter lifecycle notifications.
//!
//! This module provides the event infrastructure for notifying about
//! adapter service availability and state transitions.

use std::sync::Arc;

use crate::adapter::state::{AdapterState, Channel};

/// Events that can be emitted by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
   /// The adapter service has been bound and is reachable.
   ServiceUp,
   /// The binding to the adapter service has been released or lost.
   ServiceDown,
   /// One adopted transition, as published on one channel.
   StateChanged {
      channel: Channel,
      old: AdapterState,
      new: AdapterState,
   },
}

/// Trait for implementing event emission.
///
/// Implementations must not block; the manager calls `emit` from its
/// dispatcher.
pub trait EventBus: Send + Sync {
   fn emit(&self, event: ManagerEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
