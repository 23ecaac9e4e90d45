//! Single-shot bind deadlines.
//!
//! Expiry is never handled inline: the timer task only enqueues a
//! `BindTimeout` command on the manager queue.

use std::time::Duration;

use log::debug;
use tokio::{sync::mpsc, task::JoinHandle, time};

use crate::lifecycle::manager::ManagerCommand;

/// Default time allowed for a bind attempt to resolve.
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(120);

/// Arms bind deadlines that report back onto the manager queue.
pub struct TimeoutScheduler {
   queue: mpsc::WeakUnboundedSender<ManagerCommand>,
}

impl TimeoutScheduler {
   pub(crate) const fn new(queue: mpsc::WeakUnboundedSender<ManagerCommand>) -> Self {
      Self { queue }
   }

   /// Arms a deadline for bind attempt `generation`.
   pub fn arm(&self, generation: u64, duration: Duration) -> TimerHandle {
      let queue = self.queue.clone();
      let task = tokio::spawn(async move {
         time::sleep(duration).await;
         debug!("Bind attempt {generation} deadline elapsed");
         if let Some(queue) = queue.upgrade() {
            let _ = queue.send(ManagerCommand::BindTimeout { generation });
         }
      });
      TimerHandle { generation, task }
   }

   pub fn cancel(&self, handle: TimerHandle) {
      handle.cancel();
   }
}

/// An armed deadline. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TimerHandle {
   generation: u64,
   task: JoinHandle<()>,
}

impl TimerHandle {
   pub const fn generation(&self) -> u64 {
      self.generation
   }

   pub fn cancel(self) {
      debug!("Cancelled bind deadline {}", self.generation);
   }
}

impl Drop for TimerHandle {
   fn drop(&mut self) {
      self.task.abort();
   }
}
