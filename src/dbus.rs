use std::{collections::HashMap, sync::Arc};

use futures::stream::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use zbus::{
   Connection, fdo::DBusProxy, interface, message::Header, names::BusName,
   object_server::SignalEmitter,
};

use crate::{
   adapter::state::EnableMode,
   error::Result,
   event::{EventBus, EventSender, ManagerEvent},
   lifecycle::{
      manager::{CallerId, LifecycleManager},
      notify::ObserverId,
      restriction::{RestrictionSnapshot, UserId},
   },
};

pub const OBJECT_PATH: &str = "/org/btlifecycle/manager";

/// An event addressed to one registered bus peer.
pub type PeerEvent = (SmolStr, ManagerEvent);

struct PeerObserver {
   peer: SmolStr,
   events: mpsc::UnboundedSender<PeerEvent>,
}

impl EventBus for PeerObserver {
   fn emit(&self, event: ManagerEvent) {
      let _ = self.events.send((self.peer.clone(), event));
   }
}

/// Bus peers registered as observers, keyed by unique name.
///
/// The registry owns each observer; the manager only holds it weakly, so
/// removing a peer here is enough to stop its notifications.
pub struct ObserverRegistry {
   peers: Mutex<HashMap<SmolStr, (ObserverId, EventSender)>>,
   events: mpsc::UnboundedSender<PeerEvent>,
}

impl ObserverRegistry {
   pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
      let (events, rx) = mpsc::unbounded_channel();
      let registry = Arc::new(Self {
         peers: Mutex::new(HashMap::new()),
         events,
      });
      (registry, rx)
   }

   /// Registers `peer`. Returns false if it already was.
   pub fn register(&self, manager: &LifecycleManager, peer: &str) -> Result<bool> {
      let mut peers = self.peers.lock();
      if peers.contains_key(peer) {
         return Ok(false);
      }
      let peer = SmolStr::new(peer);
      let observer: EventSender = Arc::new(PeerObserver {
         peer: peer.clone(),
         events: self.events.clone(),
      });
      let id = manager.register_observer(&observer)?;
      debug!("Registered observer {peer} as {id:?}");
      peers.insert(peer, (id, observer));
      Ok(true)
   }

   /// Unregisters `peer`. Returns false if it was not registered.
   pub fn unregister(&self, manager: &LifecycleManager, peer: &str) -> Result<bool> {
      let Some((id, _observer)) = self.peers.lock().remove(peer) else {
         return Ok(false);
      };
      manager.unregister_observer(id)?;
      Ok(true)
   }
}

pub struct LifecycleService {
   manager: LifecycleManager,
   observers: Arc<ObserverRegistry>,
}

impl LifecycleService {
   pub const fn new(manager: LifecycleManager, observers: Arc<ObserverRegistry>) -> Self {
      Self { manager, observers }
   }

   fn request_enable(&self, mode: EnableMode, header: &Header<'_>) -> zbus::fdo::Result<bool> {
      let caller = caller_of(header);
      info!("{caller} asked to enable ({mode})");
      self
         .manager
         .enable(mode, caller)
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }
}

fn caller_of(header: &Header<'_>) -> CallerId {
   header
      .sender()
      .map_or_else(|| CallerId::new("unknown"), |s| CallerId::new(s.as_str()))
}

fn peer_of(header: &Header<'_>) -> zbus::fdo::Result<SmolStr> {
   header
      .sender()
      .map(|s| SmolStr::new(s.as_str()))
      .ok_or_else(|| zbus::fdo::Error::Failed("Message has no sender".to_string()))
}

/// Delivers peer-addressed events as unicast signals.
pub fn spawn_peer_dispatcher(connection: Connection, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
   tokio::spawn(async move {
      while let Some((peer, event)) = events.recv().await {
         if let Err(e) = emit_to_peer(&connection, &peer, event).await {
            warn!("Error notifying observer {peer}: {e}");
         }
      }
   });
}

async fn emit_to_peer(connection: &Connection, peer: &str, event: ManagerEvent) -> zbus::Result<()> {
   let destination = BusName::try_from(peer)?;
   let emitter = SignalEmitter::new(connection, OBJECT_PATH)?.set_destination(destination);
   match event {
      ManagerEvent::ServiceUp => LifecycleService::service_up(&emitter).await,
      ManagerEvent::ServiceDown => LifecycleService::service_down(&emitter).await,
      ManagerEvent::StateChanged { channel, old, new } => {
         LifecycleService::adapter_state_changed(&emitter, channel.to_str(), old.to_str(), new.to_str())
            .await
      },
   }
}

/// Drops the registration of any observer whose connection leaves the bus.
pub async fn watch_peers(
   connection: &Connection,
   manager: LifecycleManager,
   observers: Arc<ObserverRegistry>,
) -> Result<()> {
   let proxy = DBusProxy::new(connection).await?;
   let mut changes = proxy.receive_name_owner_changed().await?;
   tokio::spawn(async move {
      while let Some(change) = changes.next().await {
         let Ok(args) = change.args() else {
            continue;
         };
         if args.new_owner().is_some() {
            continue;
         }
         match observers.unregister(&manager, args.name().as_str()) {
            Ok(true) => info!("Observer {} left the bus", args.name()),
            Ok(false) => {},
            Err(e) => warn!("Failed to drop observer {}: {e}", args.name()),
         }
      }
   });
   Ok(())
}

#[interface(name = "org.btlifecycle.Manager")]
impl LifecycleService {
   async fn enable(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
      self.request_enable(EnableMode::Full, &header)
   }

   async fn enable_ble(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
      self.request_enable(EnableMode::BleOnly, &header)
   }

   async fn disable(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
      let caller = caller_of(&header);
      info!("{caller} asked to disable");
      self
         .manager
         .disable(caller)
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   async fn get_state(&self) -> zbus::fdo::Result<String> {
      let state = self
         .manager
         .state()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(state.to_str().to_string())
   }

   async fn get_status(&self) -> zbus::fdo::Result<String> {
      let status = self
         .manager
         .status()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
   }

   async fn on_user_restrictions_changed(
      &self,
      user: i32,
      disallow_bluetooth: bool,
      disallow_bluetooth_sharing: bool,
   ) -> zbus::fdo::Result<bool> {
      self
         .manager
         .on_user_restrictions_changed(
            UserId(user),
            RestrictionSnapshot {
               disallow_bluetooth,
               disallow_bluetooth_sharing,
            },
         )
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   async fn register_observer(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
      let peer = peer_of(&header)?;
      self
         .observers
         .register(&self.manager, &peer)
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
   }

   async fn unregister_observer(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
      let peer = peer_of(&header)?;
      self
         .observers
         .unregister(&self.manager, &peer)
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
   }

   async fn switch_user(&self, user: i32) -> zbus::fdo::Result<bool> {
      if user < 0 {
         return Err(zbus::fdo::Error::InvalidArgs(format!(
            "Not a concrete user: {user}"
         )));
      }
      self
         .manager
         .switch_user(UserId(user))
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   // Signals
   #[zbus(signal)]
   pub async fn adapter_state_changed(
      emitter: &SignalEmitter<'_>,
      channel: &str,
      old: &str,
      new: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn service_up(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn service_down(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

   #[zbus(property)]
   async fn state(&self) -> String {
      self.get_state().await.unwrap_or_default()
   }
}
