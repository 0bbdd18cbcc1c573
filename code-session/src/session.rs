use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    pty::{ProcessExit, ProcessHandle, Utf8Decoder},
    types::{ConnectionId, Outbound, SessionId},
    workspace::Workspace,
    Result,
};

/// Text sent to the client once a process has finished
pub const EXIT_NOTICE: &str = "\nProcess exited.";

type Slot = Arc<AsyncMutex<Option<Session>>>;

/// Exclusive lock on one connection's slot in the registry
pub(crate) type SlotGuard = OwnedMutexGuard<Option<Session>>;

/// The live run bound to one connection
pub struct Session {
    id: SessionId,
    connection: ConnectionId,
    language: String,
    process: ProcessHandle,
    workspace: Workspace,
    /// Resolves once the exit notice has been queued for the client
    finished: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("language", &self.language)
            .field("process", &self.process)
            .field("workspace", &self.workspace.root())
            .finish()
    }
}

impl Session {
    /// Wires a freshly spawned process to the client and returns the session
    /// that owns it. The relay task reaps the session from `registry` when the
    /// process exits.
    pub(crate) fn start(
        connection: ConnectionId,
        language: &str,
        mut process: ProcessHandle,
        workspace: Workspace,
        outbound: Outbound,
        registry: Arc<SessionRegistry>,
        drain_grace: Duration,
    ) -> Self {
        let id = SessionId::new();
        let (finished_tx, finished_rx) = oneshot::channel();

        let relay = Relay {
            connection,
            session: id,
            output: process.take_output(),
            exit: process.take_exit(),
            outbound,
            finished: finished_tx,
            registry,
            drain_grace,
        };
        tokio::spawn(relay.run());

        info!(
            "Started {} ({}) for {} with pid {:?}",
            id,
            language,
            connection,
            process.pid()
        );

        Self {
            id,
            connection,
            language: language.to_string(),
            process,
            workspace,
            finished: Some(finished_rx),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn write(&self, bytes: Vec<u8>) -> Result<()> {
        self.process.write(bytes)
    }

    /// Kills the process and releases the workspace. Every step runs even if
    /// an earlier one fails.
    pub(crate) async fn teardown(mut self, grace: Duration) {
        debug!("Tearing down {} for {}", self.id, self.connection);

        if let Err(e) = self.process.kill() {
            warn!("Failed to kill process of {}: {}", self.id, e);
        }

        if let Some(mut finished) = self.finished.take() {
            if timeout(grace, &mut finished).await.is_err() {
                warn!(
                    "{} still running {:?} after hangup, sending SIGKILL",
                    self.id, grace
                );
                if let Err(e) = self.process.force_kill() {
                    warn!("Failed to force kill process of {}: {}", self.id, e);
                }
                let _ = timeout(grace, finished).await;
            }
        }

        self.workspace.release();
    }

    /// Releases what is left of a session whose process already exited.
    fn reap(mut self) {
        debug!("Reaping {} for {}", self.id, self.connection);
        self.workspace.release();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.process.kill() {
            warn!("Failed to kill process of {}: {}", self.id, e);
        }
    }
}

/// Forwards one process's output to its client and reports its exit
struct Relay {
    connection: ConnectionId,
    session: SessionId,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    exit: Option<oneshot::Receiver<ProcessExit>>,
    outbound: Outbound,
    finished: oneshot::Sender<()>,
    registry: Arc<SessionRegistry>,
    drain_grace: Duration,
}

impl Relay {
    async fn run(mut self) {
        let mut decoder = Utf8Decoder::default();
        let mut output_open = self.output.is_some();
        let mut exit_pending = self.exit.is_some();
        let mut status = None;

        // Only a delivered exit notification ends the loop.
        while exit_pending || output_open {
            tokio::select! {
                biased;
                chunk = recv(&mut self.output), if output_open => match chunk {
                    Some(bytes) => self.forward(&mut decoder, &bytes),
                    None => output_open = false,
                },
                exit = wait(&mut self.exit), if exit_pending => {
                    exit_pending = false;
                    self.exit = None;
                    status = exit;
                    break;
                }
            }
        }

        // Output the process produced right before exiting may still be in flight.
        if output_open {
            while let Ok(Some(bytes)) = timeout(self.drain_grace, recv(&mut self.output)).await {
                self.forward(&mut decoder, &bytes);
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            self.outbound.output(tail);
        }

        match status {
            Some(exit) => info!(
                "{} for {} exited with code {}",
                self.session, self.connection, exit.code
            ),
            None => info!("{} for {} exited", self.session, self.connection),
        }
        self.outbound.output(EXIT_NOTICE);
        let _ = self.finished.send(());

        self.registry.reap(self.connection, self.session).await;
    }

    fn forward(&self, decoder: &mut Utf8Decoder, bytes: &[u8]) {
        let text = decoder.decode(bytes);
        if !text.is_empty() {
            self.outbound.output(text);
        }
    }
}

async fn recv(output: &mut Option<mpsc::UnboundedReceiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match output {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Resolves with the exit status, or `None` once the sender is gone. Borrows
/// the receiver so a dropped poll leaves it in place.
async fn wait(exit: &mut Option<oneshot::Receiver<ProcessExit>>) -> Option<ProcessExit> {
    match exit {
        Some(rx) => rx.await.ok(),
        None => None,
    }
}

/// Map from connection to its single active session.
///
/// Each connection has its own async lock, so operations on one connection
/// are serialized while different connections never wait on each other.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<ConnectionId, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Locks the slot of `connection`, creating it if needed.
    pub(crate) async fn lock(&self, connection: ConnectionId) -> SlotGuard {
        let slot = self.slots().entry(connection).or_default().clone();
        slot.lock_owned().await
    }

    pub(crate) async fn lock_existing(&self, connection: ConnectionId) -> Option<SlotGuard> {
        let slot = self.slots().get(&connection).cloned()?;
        Some(slot.lock_owned().await)
    }

    /// Drops the slot of a connection that has gone away.
    pub(crate) fn forget(&self, connection: ConnectionId) {
        self.slots().remove(&connection);
    }

    /// Removes `session` after its process exited, unless it was already
    /// torn down or replaced.
    async fn reap(&self, connection: ConnectionId, session: SessionId) {
        let Some(mut slot) = self.lock_existing(connection).await else {
            return;
        };
        if slot.as_ref().map(Session::id) == Some(session) {
            if let Some(done) = slot.take() {
                done.reap();
            }
        }
    }

    /// Id of the session currently registered for `connection`.
    pub async fn active_session(&self, connection: ConnectionId) -> Option<SessionId> {
        let slot = self.lock_existing(connection).await?;
        slot.as_ref().map(Session::id)
    }

    /// Number of connections with a slot
    pub fn connections(&self) -> usize {
        self.slots().len()
    }
}
