use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    manager::SessionManager,
    types::{ClientEvent, ConnectionId, Outbound, ServerEvent},
};

/// Turns per-connection event streams into session manager calls
#[derive(Clone)]
pub struct ConnectionRouter {
    manager: Arc<SessionManager>,
}

impl ConnectionRouter {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Opens a connection. Events sent on the returned [`Connection`] are
    /// handled one at a time in arrival order; everything for the client
    /// arrives on the returned receiver.
    pub fn connect(&self) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = ConnectionId::new();
        let (outbound, outbound_rx) = Outbound::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(dispatch(self.manager.clone(), id, outbound, events_rx));

        let connection = Connection {
            id,
            events: events_tx,
            task,
        };
        (connection, outbound_rx)
    }
}

/// Inbound side of one open connection
pub struct Connection {
    id: ConnectionId,
    events: mpsc::UnboundedSender<ClientEvent>,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an event; returns false once the connection has shut down.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Disconnects and waits until the connection's session is torn down.
    pub async fn close(self) {
        let _ = self.events.send(ClientEvent::Disconnect);
        drop(self.events);
        let _ = self.task.await;
    }
}

async fn dispatch(
    manager: Arc<SessionManager>,
    id: ConnectionId,
    outbound: Outbound,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) {
    info!("Client connected: {}", id);

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::StartRun { language, code } => {
                let _ = manager
                    .start_run(id, &outbound, language.as_deref(), &code)
                    .await;
            }
            ClientEvent::Input(bytes) => manager.forward_input(id, bytes).await,
            ClientEvent::Disconnect => {
                debug!("Disconnect requested by {}", id);
                break;
            }
        }
    }

    manager.disconnect(id).await;
    info!("Client disconnected: {}", id);
}
