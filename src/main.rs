//! Bluetooth adapter lifecycle D-Bus service
//!
//! This service supervises the out-of-process adapter service: it serializes
//! enable/disable requests, binds and unbinds the service, follows its
//! bring-up and bring-down, and republishes state changes on D-Bus.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use btlifecycle::{
   config::Config,
   dbus::{self, LifecycleService, LifecycleServiceSignals, ObserverRegistry, OBJECT_PATH},
   error::Result,
   event::{EventBus, ManagerEvent},
   lifecycle::{binding::ProcessGateway, manager::LifecycleManager, persist::TomlPreferenceStore},
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting btlifecycle D-Bus service...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Adapter service command: {:?}, bind timeout {:?}",
      config.adapter_command,
      config.bind_timeout()
   );

   // Create event channel
   let event_bus = EventProcessor::new();

   let store = TomlPreferenceStore::open()?;
   let gateway = ProcessGateway::new(config.adapter_command.clone());
   let manager = LifecycleManager::new(
      &config,
      Box::new(gateway),
      Box::new(store),
      event_bus.clone(),
   );

   // Create D-Bus service
   let (observers, peer_events) = ObserverRegistry::new();
   let service = LifecycleService::new(manager.clone(), observers.clone());

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.btlifecycle")?
      .serve_at(OBJECT_PATH, service)?
      .build()
      .await?;

   info!("btlifecycle D-Bus service started at org.btlifecycle");

   // Start event processors
   dbus::spawn_peer_dispatcher(connection.clone(), peer_events);
   dbus::watch_peers(&connection, manager.clone(), observers).await?;
   event_bus.spawn_dispatcher(connection).await?;

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down btlifecycle service...");
   manager.shutdown().await?;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<ManagerEvent>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<ManagerEvent> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<LifecycleService>,
      event: ManagerEvent,
   ) -> Result<()> {
      match event {
         ManagerEvent::ServiceUp => {
            iface.service_up().await?;
         },
         ManagerEvent::ServiceDown => {
            iface.service_down().await?;
         },
         ManagerEvent::StateChanged { channel, old, new } => {
            iface
               .adapter_state_changed(channel.to_str(), old.to_str(), new.to_str())
               .await?;
         },
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, LifecycleService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, event: ManagerEvent) {
      self.queue.push(event);
      self.notifier.notify_waiters();
   }
}
