//! Lifecycle manager for the adapter service.
//!
//! This module owns the canonical adapter state. Every input (caller
//! requests, remote service callbacks, bind deadlines, restriction changes)
//! is a [`ManagerCommand`] on one queue, drained by a single actor task in
//! arrival order, so no state is ever touched concurrently.

use core::fmt;
use std::{
   collections::VecDeque,
   mem,
   sync::{Arc, Weak},
   time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};
use serde::Serialize;
use smol_str::SmolStr;
use tokio::sync::{mpsc, oneshot};

use crate::{
   adapter::{
      protocol::LifecycleCommand,
      state::{AdapterState, EnableMode},
   },
   config::Config,
   error::{LifecycleError, Result},
   event::{EventBus, EventSender, ManagerEvent},
   lifecycle::{
      binding::{AdapterProxy, BindRequest, BindingGateway, ServiceLink},
      notify::{NotificationHub, ObserverId},
      persist::{Preference, PreferenceStore},
      restriction::{self, RestrictionSnapshot, UserId, Verdict},
      timeout::{TimeoutScheduler, TimerHandle},
   },
};

// === Callers & history ===

/// Identity of whoever asked for a toggle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CallerId(SmolStr);

impl CallerId {
   pub fn new(name: impl Into<SmolStr>) -> Self {
      Self(name.into())
   }

   /// The manager itself, acting on policy.
   pub const fn system() -> Self {
      Self(SmolStr::new_static("system"))
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }
}

impl fmt::Display for CallerId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

impl From<&str> for CallerId {
   fn from(name: &str) -> Self {
      Self::new(name)
   }
}

/// Why a toggle happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reason {
   Application,
   Restricted,
   SystemBoot,
   UserSwitched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
   Enable(EnableMode),
   Disable,
}

/// One accepted enable or disable request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
   pub timestamp: u64,
   pub caller: CallerId,
   pub action: Action,
   pub reason: Reason,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
   pub state: AdapterState,
   pub target: Option<EnableMode>,
   pub bound: bool,
   pub generation: u64,
   pub user: UserId,
   pub observers: usize,
   pub history: Vec<HistoryEntry>,
}

// === Commands ===

pub(crate) enum ManagerCommand {
   // Caller requests
   Enable {
      mode: EnableMode,
      caller: CallerId,
      reason: Reason,
   },
   Disable {
      caller: CallerId,
      reason: Reason,
   },
   RegisterObserver(ObserverId, Weak<dyn EventBus>),
   UnregisterObserver(ObserverId),
   RestrictionsChanged(UserId, RestrictionSnapshot),
   SwitchUser(UserId),

   // Remote service callbacks
   ServiceConnected {
      generation: u64,
      proxy: Box<dyn AdapterProxy>,
   },
   RemoteStateChanged {
      generation: u64,
      old: AdapterState,
      new: AdapterState,
   },
   ServiceDisconnected {
      generation: u64,
   },

   // Timer expiry
   BindTimeout {
      generation: u64,
   },

   // Queries
   GetState(oneshot::Sender<AdapterState>),
   GetStatus(oneshot::Sender<ManagerStatus>),
   Shutdown(oneshot::Sender<()>),
}

// === Handle ===

/// Handle to the lifecycle manager.
///
/// Every method only enqueues; effects are observed through the event bus
/// and registered observers. This type is cheaply cloneable. The manager
/// tears down once every handle is dropped.
#[derive(Clone)]
pub struct LifecycleManager {
   inbox: mpsc::UnboundedSender<ManagerCommand>,
}

impl LifecycleManager {
   /// Spawns the manager actor on the current tokio runtime.
   pub fn new(
      config: &Config,
      gateway: Box<dyn BindingGateway>,
      store: Box<dyn PreferenceStore>,
      broadcast: EventSender,
   ) -> Self {
      let (command_tx, command_rx) = mpsc::unbounded_channel();
      let actor = ManagerActor::new(
         config,
         gateway,
         store,
         broadcast,
         command_tx.downgrade(),
         command_rx,
      );
      tokio::spawn(actor.run());
      Self { inbox: command_tx }
   }

   fn submit(&self, cmd: ManagerCommand) -> Result<()> {
      self
         .inbox
         .send(cmd)
         .map_err(|_| LifecycleError::ManagerShutdown)
   }

   pub fn enable(&self, mode: EnableMode, caller: impl Into<CallerId>) -> Result<()> {
      self.submit(ManagerCommand::Enable {
         mode,
         caller: caller.into(),
         reason: Reason::Application,
      })
   }

   pub fn disable(&self, caller: impl Into<CallerId>) -> Result<()> {
      self.submit(ManagerCommand::Disable {
         caller: caller.into(),
         reason: Reason::Application,
      })
   }

   /// Registers an observer. It stays registered until unregistered or until
   /// the caller drops every strong reference to it.
   pub fn register_observer(&self, observer: &Arc<dyn EventBus>) -> Result<ObserverId> {
      let id = ObserverId::next();
      self.submit(ManagerCommand::RegisterObserver(id, Arc::downgrade(observer)))?;
      Ok(id)
   }

   pub fn unregister_observer(&self, id: ObserverId) -> Result<()> {
      self.submit(ManagerCommand::UnregisterObserver(id))
   }

   pub fn on_user_restrictions_changed(
      &self,
      user: UserId,
      snapshot: RestrictionSnapshot,
   ) -> Result<()> {
      self.submit(ManagerCommand::RestrictionsChanged(user, snapshot))
   }

   pub fn switch_user(&self, user: UserId) -> Result<()> {
      self.submit(ManagerCommand::SwitchUser(user))
   }

   pub async fn state(&self) -> Result<AdapterState> {
      let (tx, rx) = oneshot::channel();
      self.submit(ManagerCommand::GetState(tx))?;
      rx.await.map_err(|_| LifecycleError::ManagerShutdown)
   }

   pub async fn status(&self) -> Result<ManagerStatus> {
      let (tx, rx) = oneshot::channel();
      self.submit(ManagerCommand::GetStatus(tx))?;
      rx.await.map_err(|_| LifecycleError::ManagerShutdown)
   }

   /// Stops the manager, releasing any binding.
   pub async fn shutdown(&self) -> Result<()> {
      let (tx, rx) = oneshot::channel();
      self.submit(ManagerCommand::Shutdown(tx))?;
      rx.await.map_err(|_| LifecycleError::ManagerShutdown)
   }
}

// === Manager Actor ===

/// The current bind attempt, and once connected, the live binding.
struct Binding {
   generation: u64,
   mode: EnableMode,
   timer: Option<TimerHandle>,
   proxy: Option<Box<dyn AdapterProxy>>,
}

struct ManagerActor {
   bind_timeout: Duration,
   default_enabled: bool,
   history_size: usize,

   gateway: Box<dyn BindingGateway>,
   store: Box<dyn PreferenceStore>,
   hub: NotificationHub,
   timeouts: TimeoutScheduler,
   queue: mpsc::WeakUnboundedSender<ManagerCommand>,
   command_rx: mpsc::UnboundedReceiver<ManagerCommand>,

   // State
   state: AdapterState,
   target: Option<EnableMode>,
   user: UserId,
   generation: u64,
   binding: Option<Binding>,
   issued: Option<LifecycleCommand>,
   history: VecDeque<HistoryEntry>,
}

impl ManagerActor {
   fn new(
      config: &Config,
      gateway: Box<dyn BindingGateway>,
      store: Box<dyn PreferenceStore>,
      broadcast: EventSender,
      queue: mpsc::WeakUnboundedSender<ManagerCommand>,
      command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
   ) -> Self {
      Self {
         bind_timeout: config.bind_timeout(),
         default_enabled: config.default_enabled,
         history_size: config.history_size,
         gateway,
         store,
         hub: NotificationHub::new(broadcast),
         timeouts: TimeoutScheduler::new(queue.clone()),
         queue,
         command_rx,
         state: AdapterState::Off,
         target: None,
         user: config.user(),
         generation: 0,
         binding: None,
         issued: None,
         history: VecDeque::new(),
      }
   }

   async fn run(mut self) {
      info!("Lifecycle manager starting up for {}", self.user);
      self.restore_preference(Reason::SystemBoot);

      while let Some(cmd) = self.command_rx.recv().await {
         if !self.handle_command(cmd) {
            break;
         }
      }

      self.cleanup();
   }

   fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
      match cmd {
         ManagerCommand::Enable {
            mode,
            caller,
            reason,
         } => {
            self.request_enable(mode, caller, reason);
         },
         ManagerCommand::Disable { caller, reason } => {
            self.request_disable(caller, reason);
         },
         ManagerCommand::RegisterObserver(id, observer) => {
            self.register_observer(id, observer);
         },
         ManagerCommand::UnregisterObserver(id) => {
            if !self.hub.unregister(id) {
               debug!("Observer {id:?} was not registered");
            }
         },
         ManagerCommand::RestrictionsChanged(user, snapshot) => {
            self.on_restrictions_changed(user, snapshot);
         },
         ManagerCommand::SwitchUser(user) => {
            self.switch_user(user);
         },
         ManagerCommand::ServiceConnected { generation, proxy } => {
            self.on_service_connected(generation, proxy);
         },
         ManagerCommand::RemoteStateChanged {
            generation,
            old,
            new,
         } => {
            self.on_remote_state_report(generation, old, new);
         },
         ManagerCommand::ServiceDisconnected { generation } => {
            self.on_service_disconnected(generation);
         },
         ManagerCommand::BindTimeout { generation } => {
            self.on_bind_timeout(generation);
         },
         ManagerCommand::GetState(reply) => {
            let _ = reply.send(self.state);
         },
         ManagerCommand::GetStatus(reply) => {
            let _ = reply.send(self.status());
         },
         ManagerCommand::Shutdown(reply) => {
            info!("Lifecycle manager shutting down");
            self.cleanup();
            let _ = reply.send(());
            return false;
         },
      }
      true
   }

   // --- Caller requests ---

   fn request_enable(&mut self, mode: EnableMode, caller: CallerId, reason: Reason) {
      if let Some(target) = self.target
         && target >= mode
      {
         debug!("Enable {mode} from {caller} ignored, already heading to {target}");
         return;
      }

      info!("Enable {mode} requested by {caller} ({reason}) in {}", self.state);
      self.target = Some(mode);
      if mode == EnableMode::Full {
         self.persist(Preference::On);
      }
      self.record(caller, Action::Enable(mode), reason);
      self.drive();
   }

   fn request_disable(&mut self, caller: CallerId, reason: Reason) {
      if self.target.is_none() {
         debug!("Disable from {caller} ignored, adapter not wanted");
         return;
      }

      info!("Disable requested by {caller} ({reason}) in {}", self.state);
      self.target = None;
      self.persist(Preference::Off);
      self.record(caller, Action::Disable, reason);
      self.drive();
   }

   fn register_observer(&mut self, id: ObserverId, observer: Weak<dyn EventBus>) {
      self.hub.register(id, observer);
      if self.binding.as_ref().is_some_and(|b| b.proxy.is_some()) {
         self.hub.emit_to(id, ManagerEvent::ServiceUp);
      }
   }

   fn on_restrictions_changed(&mut self, user: UserId, snapshot: RestrictionSnapshot) {
      if restriction::evaluate(&snapshot) == Verdict::Ignore {
         debug!("Restriction change for {user} does not affect the adapter");
         return;
      }
      if !user.is_system() {
         debug!("Ignoring restriction change scoped to {user}");
         return;
      }
      info!("Bluetooth disallowed for {user}, queueing disable");
      self.enqueue(ManagerCommand::Disable {
         caller: CallerId::system(),
         reason: Reason::Restricted,
      });
   }

   fn switch_user(&mut self, user: UserId) {
      if user == self.user {
         return;
      }
      info!("Switching user {} -> {user}", self.user);
      self.user = user;
      self.restore_preference(Reason::UserSwitched);
   }

   fn restore_preference(&mut self, reason: Reason) {
      let preference = match self.store.load(self.user) {
         Ok(Some(preference)) => preference,
         Ok(None) => Preference::from_enabled(self.default_enabled),
         Err(e) => {
            warn!("Failed to load preference for {}: {e}", self.user);
            Preference::Off
         },
      };
      debug!("Preference of {} is {preference}", self.user);

      if preference.is_on() {
         self.request_enable(EnableMode::Full, CallerId::system(), reason);
      } else {
         self.request_disable(CallerId::system(), reason);
      }
   }

   // --- Remote service callbacks ---

   fn on_service_connected(&mut self, generation: u64, mut proxy: Box<dyn AdapterProxy>) {
      let Some(binding) = self
         .binding
         .as_mut()
         .filter(|b| b.generation == generation && b.proxy.is_none())
      else {
         warn!("Ignoring connection of stale bind {generation}");
         proxy.close();
         return;
      };

      if let Some(timer) = binding.timer.take() {
         self.timeouts.cancel(timer);
      }
      binding.proxy = Some(proxy);
      info!(
         "Adapter service connected (bind {generation}, {})",
         binding.mode
      );

      self.hub.service_up();
      self.drive();
   }

   fn on_remote_state_report(&mut self, generation: u64, old: AdapterState, new: AdapterState) {
      if !self.is_current(generation) {
         warn!("Ignoring report {old} -> {new} from stale or unconnected bind {generation}");
         return;
      }
      if !self.state.accepts(new) {
         warn!(
            "Rejecting report {old} -> {new}: not reachable from {}",
            self.state
         );
         return;
      }
      if old != self.state {
         debug!("Service reported origin {old} while manager is at {}", self.state);
      }
      self.adopt(new);
   }

   fn on_service_disconnected(&mut self, generation: u64) {
      if !self.is_current(generation) {
         debug!("Ignoring disconnection of stale or unconnected bind {generation}");
         return;
      }

      warn!(
         "Adapter service disconnected unexpectedly in {} (bind {generation})",
         self.state
      );
      self.target = None;
      self.release_binding();
   }

   fn on_bind_timeout(&mut self, generation: u64) {
      if !self
         .binding
         .as_ref()
         .is_some_and(|b| b.generation == generation && b.proxy.is_none())
      {
         debug!("Ignoring expired deadline of bind {generation}");
         return;
      }

      warn!(
         "Bind {generation} did not resolve within {:?}, abandoning it",
         self.bind_timeout
      );
      self.target = None;
      self.release_binding();
   }

   // --- Transitions ---

   fn adopt(&mut self, new: AdapterState) {
      let old = mem::replace(&mut self.state, new);
      self.issued = None;
      let sent = self.hub.broadcast(old, new);
      info!("Adapter state {old} -> {new} ({sent} broadcasts)");

      if new == AdapterState::Off {
         self.release_binding();
      }
      self.drive();
   }

   /// Moves the adapter one step toward the target from a stable state.
   fn drive(&mut self) {
      let connected = self.binding.as_ref().map(|b| b.proxy.is_some());
      match (self.state, self.target) {
         (AdapterState::Off, Some(mode)) => match connected {
            None => self.bind(mode),
            Some(true) => self.issue(LifecycleCommand::OffToBleOn),
            Some(false) => {},
         },
         (AdapterState::Off, None) => {
            if connected.is_some() {
               info!("Adapter no longer wanted, releasing binding");
               self.release_binding();
            }
         },
         (AdapterState::BleOn, Some(EnableMode::Full)) => {
            self.issue(LifecycleCommand::BleOnToOn);
         },
         (AdapterState::BleOn, None) => {
            self.issue(LifecycleCommand::BleOnToOff);
         },
         (AdapterState::On, None) => {
            self.issue(LifecycleCommand::OnToBleOn);
         },
         _ => {},
      }
   }

   fn bind(&mut self, mode: EnableMode) {
      self.generation += 1;
      let generation = self.generation;
      info!("Binding adapter service (bind {generation}, {mode})");

      let request = BindRequest {
         generation,
         mode,
         link: ServiceLink::new(generation, self.queue.clone()),
      };
      if !self.gateway.bind(request) {
         warn!("Failed to issue bind {generation}, adapter stays {}", self.state);
         self.gateway.unbind();
         self.target = None;
         return;
      }

      let timer = self.timeouts.arm(generation, self.bind_timeout);
      self.binding = Some(Binding {
         generation,
         mode,
         timer: Some(timer),
         proxy: None,
      });
   }

   fn issue(&mut self, command: LifecycleCommand) {
      if self.issued == Some(command) {
         return;
      }
      let Some(proxy) = self.binding.as_mut().and_then(|b| b.proxy.as_mut()) else {
         warn!("Cannot send {command}: adapter service not bound");
         return;
      };
      match proxy.send(command) {
         Ok(()) => {
            debug!("Sent {command} in {}", self.state);
            self.issued = Some(command);
         },
         Err(e) => warn!("Failed to send {command}: {e}"),
      }
   }

   /// Drops the current binding. Without a service nothing can hold the
   /// adapter up, so any other state is forced back to `OFF`.
   fn release_binding(&mut self) {
      let Some(mut binding) = self.binding.take() else {
         return;
      };
      if let Some(timer) = binding.timer.take() {
         self.timeouts.cancel(timer);
      }
      let was_up = match binding.proxy.take() {
         Some(mut proxy) => {
            proxy.close();
            true
         },
         None => false,
      };
      self.gateway.unbind();
      self.issued = None;
      debug!("Released bind {}", binding.generation);

      if was_up {
         self.hub.service_down();
      }

      if self.state != AdapterState::Off {
         let old = mem::replace(&mut self.state, AdapterState::Off);
         let sent = self.hub.broadcast(old, AdapterState::Off);
         info!("Adapter state forced {old} -> OFF ({sent} broadcasts)");
      }
   }

   /// Whether `generation` is the connected binding. Callbacks of an attempt
   /// that has not resolved yet are not trusted.
   fn is_current(&self, generation: u64) -> bool {
      self
         .binding
         .as_ref()
         .is_some_and(|b| b.generation == generation && b.proxy.is_some())
   }

   // --- Bookkeeping ---

   fn enqueue(&self, cmd: ManagerCommand) {
      match self.queue.upgrade() {
         Some(queue) => {
            let _ = queue.send(cmd);
         },
         None => debug!("Manager queue closed, dropping command"),
      }
   }

   fn persist(&mut self, preference: Preference) {
      if let Err(e) = self.store.store(self.user, preference) {
         warn!("Failed to persist preference for {}: {e}", self.user);
      }
   }

   fn record(&mut self, caller: CallerId, action: Action, reason: Reason) {
      let timestamp = SystemTime::now()
         .duration_since(UNIX_EPOCH)
         .map(|d| d.as_secs())
         .unwrap_or_default();
      self.history.push_back(HistoryEntry {
         timestamp,
         caller,
         action,
         reason,
      });
      while self.history.len() > self.history_size {
         self.history.pop_front();
      }
   }

   fn status(&self) -> ManagerStatus {
      ManagerStatus {
         state: self.state,
         target: self.target,
         bound: self.binding.as_ref().is_some_and(|b| b.proxy.is_some()),
         generation: self.generation,
         user: self.user,
         observers: self.hub.observer_count(),
         history: self.history.iter().cloned().collect(),
      }
   }

   fn cleanup(&mut self) {
      debug!("Cleaning up lifecycle manager");
      self.target = None;
      self.release_binding();
   }
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use parking_lot::Mutex;
   use tokio::time;

   use super::*;
   use crate::{adapter::state::Channel, lifecycle::timeout::DEFAULT_BIND_TIMEOUT};

   #[derive(Default)]
   struct GatewayLog {
      binds: Vec<(u64, EnableMode)>,
      links: Vec<ServiceLink>,
      unbinds: usize,
   }

   struct FakeGateway {
      accept: bool,
      log: Arc<Mutex<GatewayLog>>,
   }

   impl BindingGateway for FakeGateway {
      fn bind(&mut self, request: BindRequest) -> bool {
         let mut log = self.log.lock();
         log.binds.push((request.generation, request.mode));
         log.links.push(request.link);
         self.accept
      }

      fn unbind(&mut self) {
         self.log.lock().unbinds += 1;
      }
   }

   struct FakeProxy(Arc<Mutex<Vec<LifecycleCommand>>>);

   impl AdapterProxy for FakeProxy {
      fn send(&mut self, command: LifecycleCommand) -> Result<()> {
         self.0.lock().push(command);
         Ok(())
      }

      fn close(&mut self) {}
   }

   struct MemoryStore(Arc<Mutex<HashMap<UserId, Preference>>>);

   impl PreferenceStore for MemoryStore {
      fn load(&self, user: UserId) -> Result<Option<Preference>> {
         Ok(self.0.lock().get(&user).copied())
      }

      fn store(&mut self, user: UserId, preference: Preference) -> Result<()> {
         self.0.lock().insert(user, preference);
         Ok(())
      }
   }

   #[derive(Default)]
   struct Recorder(Mutex<Vec<ManagerEvent>>);

   impl EventBus for Recorder {
      fn emit(&self, event: ManagerEvent) {
         self.0.lock().push(event);
      }
   }

   struct Harness {
      actor: ManagerActor,
      gateway: Arc<Mutex<GatewayLog>>,
      prefs: Arc<Mutex<HashMap<UserId, Preference>>>,
      events: Arc<Recorder>,
      // Keeps the queue open; the actor only holds a weak sender.
      _queue: mpsc::UnboundedSender<ManagerCommand>,
   }

   impl Harness {
      fn new(accept_bind: bool) -> Self {
         let gateway = Arc::new(Mutex::new(GatewayLog::default()));
         let prefs = Arc::new(Mutex::new(HashMap::from([(
            UserId::SYSTEM,
            Preference::Off,
         )])));
         let events = Arc::new(Recorder::default());
         let (tx, rx) = mpsc::unbounded_channel();
         let actor = ManagerActor::new(
            &Config::default(),
            Box::new(FakeGateway {
               accept: accept_bind,
               log: gateway.clone(),
            }),
            Box::new(MemoryStore(prefs.clone())),
            events.clone(),
            tx.downgrade(),
            rx,
         );
         Self {
            actor,
            gateway,
            prefs,
            events,
            _queue: tx,
         }
      }

      fn enable(&mut self, mode: EnableMode) {
         self
            .actor
            .handle_command(ManagerCommand::Enable {
               mode,
               caller: CallerId::new("test"),
               reason: Reason::Application,
            });
      }

      fn connect(&mut self) -> Arc<Mutex<Vec<LifecycleCommand>>> {
         let sent = Arc::new(Mutex::new(Vec::new()));
         let generation = self.actor.generation;
         self.actor.handle_command(ManagerCommand::ServiceConnected {
            generation,
            proxy: Box::new(FakeProxy(sent.clone())),
         });
         sent
      }

      fn report(&mut self, old: AdapterState, new: AdapterState) {
         let generation = self.actor.generation;
         self
            .actor
            .handle_command(ManagerCommand::RemoteStateChanged {
               generation,
               old,
               new,
            });
      }

      fn broadcasts(&self) -> Vec<(Channel, AdapterState, AdapterState)> {
         self
            .events
            .0
            .lock()
            .iter()
            .filter_map(|e| match *e {
               ManagerEvent::StateChanged { channel, old, new } => Some((channel, old, new)),
               _ => None,
            })
            .collect()
      }
   }

   #[tokio::test]
   async fn test_enable_binds_once_and_arms_deadline() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::Full);
      h.enable(EnableMode::Full);
      h.enable(EnableMode::BleOnly);

      assert_eq!(h.gateway.lock().binds, vec![(1, EnableMode::Full)]);
      let binding = h.actor.binding.as_ref().unwrap();
      assert_eq!(binding.timer.as_ref().map(TimerHandle::generation), Some(1));
      assert_eq!(h.prefs.lock()[&UserId::SYSTEM], Preference::On);
      assert_eq!(h.actor.history.len(), 1);
   }

   #[tokio::test]
   async fn test_bind_issue_failure_unbinds_without_deadline() {
      let mut h = Harness::new(false);
      h.enable(EnableMode::BleOnly);

      let log = h.gateway.lock();
      assert_eq!(log.binds.len(), 1);
      assert_eq!(log.unbinds, 1);
      assert!(h.actor.binding.is_none());
      assert_eq!(h.actor.state, AdapterState::Off);
      assert_eq!(h.actor.target, None);
   }

   #[tokio::test]
   async fn test_connection_cancels_deadline_and_starts_ble() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::BleOnly);
      let sent = h.connect();

      let binding = h.actor.binding.as_ref().unwrap();
      assert!(binding.timer.is_none());
      assert!(binding.proxy.is_some());
      assert_eq!(*sent.lock(), vec![LifecycleCommand::OffToBleOn]);
      assert_eq!(h.events.0.lock()[0], ManagerEvent::ServiceUp);
   }

   #[tokio::test]
   async fn test_unreachable_report_is_rejected() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::Full);
      h.connect();

      h.report(AdapterState::Off, AdapterState::On);
      h.report(AdapterState::BleOn, AdapterState::TurningOn);
      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.broadcasts().is_empty());

      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      assert_eq!(h.actor.state, AdapterState::BleTurningOn);
      h.report(AdapterState::BleTurningOn, AdapterState::BleTurningOn);
      assert_eq!(h.actor.state, AdapterState::BleTurningOn);
      assert_eq!(h.broadcasts().len(), 1);
   }

   #[tokio::test]
   async fn test_full_bring_up_and_down() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::Full);
      let sent = h.connect();

      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      h.report(AdapterState::BleTurningOn, AdapterState::BleOn);
      assert_eq!(
         *sent.lock(),
         vec![LifecycleCommand::OffToBleOn, LifecycleCommand::BleOnToOn]
      );
      h.report(AdapterState::BleOn, AdapterState::TurningOn);
      h.report(AdapterState::TurningOn, AdapterState::On);
      assert_eq!(h.actor.state, AdapterState::On);
      assert_eq!(h.broadcasts().len(), 6);

      h.actor.handle_command(ManagerCommand::Disable {
         caller: CallerId::new("test"),
         reason: Reason::Application,
      });
      assert_eq!(h.prefs.lock()[&UserId::SYSTEM], Preference::Off);
      h.report(AdapterState::On, AdapterState::TurningOff);
      h.report(AdapterState::TurningOff, AdapterState::BleOn);
      h.report(AdapterState::BleOn, AdapterState::BleTurningOff);
      h.report(AdapterState::BleTurningOff, AdapterState::Off);

      assert_eq!(
         sent.lock()[2..],
         [LifecycleCommand::OnToBleOn, LifecycleCommand::BleOnToOff]
      );
      assert_eq!(h.actor.state, AdapterState::Off);
      assert_eq!(h.broadcasts().len(), 12);
      assert!(h.actor.binding.is_none());
      assert_eq!(h.gateway.lock().unbinds, 1);
      assert_eq!(h.events.0.lock().last(), Some(&ManagerEvent::ServiceDown));
   }

   #[tokio::test]
   async fn test_enable_during_bring_down_rebinds_after_off() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::BleOnly);
      h.connect();
      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      h.report(AdapterState::BleTurningOn, AdapterState::BleOn);
      h.actor.handle_command(ManagerCommand::Disable {
         caller: CallerId::new("test"),
         reason: Reason::Application,
      });
      h.report(AdapterState::BleOn, AdapterState::BleTurningOff);

      h.enable(EnableMode::BleOnly);
      assert_eq!(h.gateway.lock().binds.len(), 1);

      h.report(AdapterState::BleTurningOff, AdapterState::Off);
      assert_eq!(
         h.gateway.lock().binds,
         vec![(1, EnableMode::BleOnly), (2, EnableMode::BleOnly)]
      );
   }

   #[tokio::test]
   async fn test_disconnection_resets_to_off_without_rebind() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::Full);
      h.connect();
      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      h.report(AdapterState::BleTurningOn, AdapterState::BleOn);

      h.actor
         .handle_command(ManagerCommand::ServiceDisconnected { generation: 1 });

      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.actor.binding.is_none());
      assert_eq!(h.gateway.lock().binds.len(), 1);
      assert_eq!(
         h.broadcasts().last(),
         Some(&(Channel::Ble, AdapterState::BleOn, AdapterState::Off))
      );
   }

   #[tokio::test]
   async fn test_stale_generation_is_ignored() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::BleOnly);
      h.connect();

      h.actor.handle_command(ManagerCommand::RemoteStateChanged {
         generation: 7,
         old: AdapterState::Off,
         new: AdapterState::BleTurningOn,
      });
      h.actor
         .handle_command(ManagerCommand::ServiceDisconnected { generation: 7 });
      h.actor.handle_command(ManagerCommand::BindTimeout { generation: 1 });

      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.actor.binding.is_some());
   }

   #[tokio::test(start_paused = true)]
   async fn test_bind_timeout_abandons_attempt_silently() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::BleOnly);

      time::sleep(DEFAULT_BIND_TIMEOUT + Duration::from_secs(1)).await;
      let Ok(cmd) = h.actor.command_rx.try_recv() else {
         panic!("deadline should have been enqueued");
      };
      assert!(matches!(cmd, ManagerCommand::BindTimeout { generation: 1 }));
      h.actor.handle_command(cmd);

      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.actor.binding.is_none());
      assert!(h.events.0.lock().is_empty());
      assert_eq!(h.gateway.lock().unbinds, 1);

      h.enable(EnableMode::BleOnly);
      assert_eq!(h.gateway.lock().binds.len(), 2);
   }

   #[tokio::test]
   async fn test_reports_before_connection_are_not_trusted() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::Full);

      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      h.actor
         .handle_command(ManagerCommand::ServiceDisconnected { generation: 1 });
      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.actor.binding.is_some());
      assert!(h.broadcasts().is_empty());

      h.actor.handle_command(ManagerCommand::BindTimeout { generation: 1 });
      assert_eq!(h.actor.state, AdapterState::Off);
      assert!(h.actor.binding.is_none());

      h.enable(EnableMode::Full);
      h.connect();
      h.report(AdapterState::Off, AdapterState::BleTurningOn);
      assert_eq!(h.gateway.lock().binds.len(), 2);
      assert_eq!(h.actor.state, AdapterState::BleTurningOn);
   }

   #[tokio::test]
   async fn test_release_mid_transition_forces_off() {
      let mut h = Harness::new(true);
      h.enable(EnableMode::BleOnly);
      h.connect();
      h.report(AdapterState::Off, AdapterState::BleTurningOn);

      h.actor.cleanup();

      assert_eq!(h.actor.state, AdapterState::Off);
      assert_eq!(
         h.broadcasts().last(),
         Some(&(Channel::Ble, AdapterState::BleTurningOn, AdapterState::Off))
      );
      assert!(h.events.0.lock().contains(&ManagerEvent::ServiceDown));
   }

   #[tokio::test]
   async fn test_restriction_enqueues_disable_for_system_user_only() {
      let mut h = Harness::new(true);
      let snapshot = RestrictionSnapshot {
         disallow_bluetooth: true,
         disallow_bluetooth_sharing: false,
      };

      h.actor
         .handle_command(ManagerCommand::RestrictionsChanged(UserId::CURRENT, snapshot));
      assert!(h.actor.command_rx.try_recv().is_err());

      h.actor
         .handle_command(ManagerCommand::RestrictionsChanged(UserId::SYSTEM, snapshot));
      assert!(matches!(
         h.actor.command_rx.try_recv(),
         Ok(ManagerCommand::Disable {
            reason: Reason::Restricted,
            ..
         })
      ));
      assert!(h.actor.command_rx.try_recv().is_err());
   }

   #[tokio::test]
   async fn test_switch_user_restores_that_users_preference() {
      let mut h = Harness::new(true);
      h.prefs.lock().insert(UserId(10), Preference::On);

      h.actor.handle_command(ManagerCommand::SwitchUser(UserId(10)));
      assert_eq!(h.actor.target, Some(EnableMode::Full));
      assert_eq!(h.gateway.lock().binds.len(), 1);

      h.actor.handle_command(ManagerCommand::SwitchUser(UserId::SYSTEM));
      assert_eq!(h.actor.target, None);
      assert_eq!(h.gateway.lock().unbinds, 1);
      assert_eq!(
         h.actor.history.back().map(|e| e.reason),
         Some(Reason::UserSwitched)
      );
   }

   #[tokio::test]
   async fn test_history_is_bounded() {
      let mut h = Harness::new(false);
      h.actor.history_size = 3;
      for _ in 0..5 {
         h.enable(EnableMode::Full);
      }
      assert_eq!(h.actor.history.len(), 3);
      assert!(
         h.actor
            .history
            .iter()
            .all(|e| e.action == Action::Enable(EnableMode::Full))
      );
   }
}
