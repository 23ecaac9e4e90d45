//! Binding to the out-of-process adapter service.
//!
//! A [`BindingGateway`] issues bind and unbind requests and reports the
//! outcome through the [`ServiceLink`] it was handed. The link is tagged with
//! the bind generation so the manager can discard callbacks from abandoned
//! attempts. On success the gateway hands over an [`AdapterProxy`], the only
//! capability the manager has over the remote service.

use std::process::Stdio;

use log::{debug, info, warn};
use tokio::{
   io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
   process::{Child, ChildStdin, ChildStdout, Command},
   sync::mpsc,
   task::JoinSet,
};

use crate::{
   adapter::{
      protocol::{self, LifecycleCommand, ServiceMessage},
      state::{AdapterState, EnableMode},
   },
   error::{LifecycleError, Result},
   lifecycle::manager::ManagerCommand,
};

/// Capability over a bound adapter service.
pub trait AdapterProxy: Send {
   /// Sends a lifecycle command. Must not block.
   fn send(&mut self, command: LifecycleCommand) -> Result<()>;
   /// Releases the proxy. Further sends fail.
   fn close(&mut self);
}

/// Issues binds against the adapter service.
pub trait BindingGateway: Send {
   /// Starts an asynchronous bind. Returns `false` if the bind could not even
   /// be issued; the caller then owes an [`unbind`](Self::unbind).
   fn bind(&mut self, request: BindRequest) -> bool;
   /// Releases the current binding. Idempotent.
   fn unbind(&mut self);
}

/// One bind attempt as handed to a gateway.
pub struct BindRequest {
   pub generation: u64,
   pub mode: EnableMode,
   pub link: ServiceLink,
}

/// Callback path from a gateway back onto the manager queue.
#[derive(Clone)]
pub struct ServiceLink {
   generation: u64,
   queue: mpsc::WeakUnboundedSender<ManagerCommand>,
}

impl ServiceLink {
   pub(crate) const fn new(
      generation: u64,
      queue: mpsc::WeakUnboundedSender<ManagerCommand>,
   ) -> Self {
      Self { generation, queue }
   }

   pub const fn generation(&self) -> u64 {
      self.generation
   }

   /// The bind resolved and the service is reachable through `proxy`.
   pub fn connected(&self, proxy: Box<dyn AdapterProxy>) {
      self.push(ManagerCommand::ServiceConnected {
         generation: self.generation,
         proxy,
      });
   }

   /// The service reported one of its own transitions.
   pub fn state_changed(&self, old: AdapterState, new: AdapterState) {
      self.push(ManagerCommand::RemoteStateChanged {
         generation: self.generation,
         old,
         new,
      });
   }

   /// The binding was lost.
   pub fn disconnected(&self) {
      self.push(ManagerCommand::ServiceDisconnected {
         generation: self.generation,
      });
   }

   fn push(&self, cmd: ManagerCommand) {
      match self.queue.upgrade() {
         Some(queue) => {
            if queue.send(cmd).is_err() {
               debug!("Manager gone, dropping callback for bind {}", self.generation);
            }
         },
         None => debug!("Manager gone, dropping callback for bind {}", self.generation),
      }
   }
}

// === Process-hosted adapter service ===

/// Gateway that hosts the adapter service in a child process.
///
/// The requested mode is passed as `--mode <ble_only|full>`. The child talks
/// line-delimited JSON on stdin/stdout (see [`protocol`]); end of its stdout
/// counts as a disconnection.
pub struct ProcessGateway {
   command: Vec<String>,
   active: Option<ActiveProcess>,
}

struct ActiveProcess {
   generation: u64,
   child: Child,
   jset: JoinSet<()>,
}

impl Drop for ActiveProcess {
   fn drop(&mut self) {
      self.jset.abort_all();
   }
}

impl ProcessGateway {
   pub const fn new(command: Vec<String>) -> Self {
      Self {
         command,
         active: None,
      }
   }

   fn spawn(&self, mode: EnableMode) -> Result<Child> {
      let (program, args) = self
         .command
         .split_first()
         .ok_or_else(|| LifecycleError::Io(std::io::Error::other("empty adapter command")))?;
      let child = Command::new(program)
         .args(args)
         .arg("--mode")
         .arg(mode.to_str())
         .stdin(Stdio::piped())
         .stdout(Stdio::piped())
         .stderr(Stdio::inherit())
         .kill_on_drop(true)
         .spawn()?;
      Ok(child)
   }
}

impl BindingGateway for ProcessGateway {
   fn bind(&mut self, request: BindRequest) -> bool {
      let BindRequest {
         generation,
         mode,
         link,
      } = request;

      let mut child = match self.spawn(mode) {
         Ok(child) => child,
         Err(e) => {
            warn!("Failed to spawn adapter service: {e}");
            return false;
         },
      };
      let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
         warn!("Adapter service spawned without piped stdio");
         return false;
      };
      info!(
         "Spawned adapter service (pid {:?}) for bind {generation}",
         child.id()
      );

      let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
      let mut jset = JoinSet::new();
      jset.spawn(recv_thread(link, stdout, cmd_tx));
      jset.spawn(send_thread(generation, stdin, cmd_rx));

      if let Some(previous) = self.active.replace(ActiveProcess {
         generation,
         child,
         jset,
      }) {
         warn!("Replacing adapter process of bind {}", previous.generation);
      }
      true
   }

   fn unbind(&mut self) {
      let Some(mut active) = self.active.take() else {
         return;
      };
      info!("Stopping adapter process of bind {}", active.generation);
      if let Err(e) = active.child.start_kill() {
         debug!("Adapter process already gone: {e}");
      }
   }
}

/// Proxy writing commands to the child's stdin.
struct ProcessProxy {
   tx: Option<mpsc::UnboundedSender<LifecycleCommand>>,
}

impl AdapterProxy for ProcessProxy {
   fn send(&mut self, command: LifecycleCommand) -> Result<()> {
      self
         .tx
         .as_ref()
         .ok_or(LifecycleError::ProxyClosed)?
         .send(command)
         .map_err(|_| LifecycleError::ProxyClosed)
   }

   fn close(&mut self) {
      self.tx = None;
   }
}

async fn recv_thread(
   link: ServiceLink,
   stdout: ChildStdout,
   cmd_tx: mpsc::UnboundedSender<LifecycleCommand>,
) {
   let generation = link.generation();
   let mut lines = BufReader::new(stdout).lines();
   let mut announced = false;
   loop {
      let line = match lines.next_line().await {
         Ok(Some(line)) => line,
         Ok(None) => break,
         Err(e) => {
            warn!("Failed to read from adapter service: {e}");
            break;
         },
      };
      if line.trim().is_empty() {
         continue;
      }
      debug!("← bind {generation}: {line}");
      match protocol::parse_message(&line) {
         Ok(ServiceMessage::Ready) if !announced => {
            announced = true;
            link.connected(Box::new(ProcessProxy {
               tx: Some(cmd_tx.clone()),
            }));
         },
         Ok(ServiceMessage::Ready) => debug!("Duplicate ready from bind {generation}"),
         Ok(ServiceMessage::StateChanged { old, new }) => link.state_changed(old, new),
         Err(e) => warn!("Malformed message from adapter service: {e}"),
      }
   }
   link.disconnected();
}

async fn send_thread(
   generation: u64,
   mut stdin: ChildStdin,
   mut rx: mpsc::UnboundedReceiver<LifecycleCommand>,
) {
   while let Some(command) = rx.recv().await {
      let line = match protocol::encode_command(command) {
         Ok(line) => line,
         Err(e) => {
            warn!("Failed to encode {command}: {e}");
            continue;
         },
      };
      debug!("→ bind {generation}: {}", line.trim_end());
      if let Err(e) = stdin.write_all(line.as_bytes()).await {
         warn!("Failed to write to adapter service: {e}");
         return;
      }
      if let Err(e) = stdin.flush().await {
         warn!("Failed to flush adapter service stdin: {e}");
         return;
      }
   }
}
