//! Observer registry and ordered fan-out of lifecycle events.

use std::{
   collections::HashMap,
   sync::{
      Weak,
      atomic::{AtomicU64, Ordering},
   },
};

use log::debug;

use crate::{
   adapter::state::{AdapterState, Channel},
   event::{EventBus, EventSender, ManagerEvent},
};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque registration identity handed out to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
   pub fn next() -> Self {
      Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
   }
}

/// Fans out events to the system broadcast sink and to every registered
/// observer.
///
/// Observers are held weakly: once the caller drops its last reference the
/// registration is treated as dead and pruned on the next emission.
pub struct NotificationHub {
   broadcast: EventSender,
   observers: HashMap<ObserverId, Weak<dyn EventBus>>,
}

impl NotificationHub {
   pub fn new(broadcast: EventSender) -> Self {
      Self {
         broadcast,
         observers: HashMap::new(),
      }
   }

   pub fn register(&mut self, id: ObserverId, observer: Weak<dyn EventBus>) {
      self.observers.insert(id, observer);
   }

   pub fn unregister(&mut self, id: ObserverId) -> bool {
      self.observers.remove(&id).is_some()
   }

   pub fn observer_count(&self) -> usize {
      self.observers.len()
   }

   /// Sends one event to a single observer, if it is still alive.
   pub fn emit_to(&mut self, id: ObserverId, event: ManagerEvent) {
      if let Some(observer) = self.observers.get(&id).and_then(Weak::upgrade) {
         observer.emit(event);
      }
   }

   /// Publishes an adopted transition. Returns the number of broadcasts.
   ///
   /// The `Ble` channel sees every transition; the `Classic` channel only sees
   /// transitions that change the classic view of the state.
   pub fn broadcast(&mut self, old: AdapterState, new: AdapterState) -> usize {
      self.emit(ManagerEvent::StateChanged {
         channel: Channel::Ble,
         old,
         new,
      });
      if old.classic() == new.classic() {
         return 1;
      }
      self.emit(ManagerEvent::StateChanged {
         channel: Channel::Classic,
         old: old.classic(),
         new: new.classic(),
      });
      2
   }

   pub fn service_up(&mut self) {
      self.emit(ManagerEvent::ServiceUp);
   }

   pub fn service_down(&mut self) {
      self.emit(ManagerEvent::ServiceDown);
   }

   fn emit(&mut self, event: ManagerEvent) {
      self.broadcast.emit(event);
      self.observers.retain(|id, observer| {
         let Some(observer) = observer.upgrade() else {
            debug!("Dropping dead observer {id:?}");
            return false;
         };
         observer.emit(event);
         true
      });
   }
}
