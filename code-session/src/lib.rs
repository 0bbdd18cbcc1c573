//! # Code Session
//!
//! Interactive code execution over a pseudo-terminal. A client submits source
//! code and a language; the code is compiled if the language needs it, run on
//! a fresh terminal, and its output streamed back while the client's keystrokes
//! are forwarded to the running program. Each connection has at most one live
//! run at a time and every run cleans up its process and files on all paths.

mod config;
mod error;
mod executor;
mod languages;
mod manager;
mod pty;
mod router;
mod session;
mod types;
mod workspace;

#[cfg(test)]
mod tests;

pub use config::{PtyConfig, SessionConfig, DEFAULT_LANGUAGE};
pub use error::Error;
pub use executor::BuildExecutor;
pub use languages::{BuildPlan, CommandTemplate, LanguageTable};
pub use manager::SessionManager;
pub use pty::{ProcessExit, ProcessHandle, PtySpawner, SpawnRequest, Spawner, Utf8Decoder};
pub use router::{Connection, ConnectionRouter};
pub use session::{Session, SessionRegistry, EXIT_NOTICE};
pub use types::{
    ClientEvent, ClientMessage, CompileResult, ConnectionId, LanguageStatus, Outbound,
    ServerEvent, ServerMessage, SessionId,
};
pub use workspace::{Workspace, WorkspaceProvisioner};

/// Result type for code session operations
pub type Result<T> = std::result::Result<T, Error>;
