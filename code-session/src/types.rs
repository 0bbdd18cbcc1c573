use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity of one spawned run. A connection sees a fresh id per `run_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Messages a client sends over its connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RunCode {
        /// Language identifier; missing or empty selects the default language
        #[serde(default)]
        language: Option<String>,
        /// Source code to run
        #[serde(default)]
        code: String,
    },
    Input {
        data: String,
    },
}

/// Messages the server sends to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Output { data: String },
}

/// Inbound events on one connection, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StartRun {
        language: Option<String>,
        code: String,
    },
    Input(Vec<u8>),
    Disconnect,
}

impl From<ClientMessage> for ClientEvent {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::RunCode { language, code } => ClientEvent::StartRun { language, code },
            ClientMessage::Input { data } => ClientEvent::Input(data.into_bytes()),
        }
    }
}

/// Outbound events for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Terminal output or a synthesized status/diagnostic line
    Output(String),
}

impl From<ServerEvent> for ServerMessage {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Output(data) => ServerMessage::Output { data },
        }
    }
}

/// Sending half of one connection's outbound channel
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an output event. A closed connection drops it silently.
    pub fn output(&self, text: impl Into<String>) {
        let _ = self.tx.send(ServerEvent::Output(text.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a compile step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub succeeded: bool,
    /// Combined diagnostics (stderr first, then stdout)
    pub output: String,
}

/// Tool availability of one language on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageStatus {
    pub language: String,
    pub compiled: bool,
    pub available: bool,
}
