use std::path::PathBuf;
use std::time::Duration;

/// Language used when a run request names none
pub const DEFAULT_LANGUAGE: &str = "python";

/// Pseudo-terminal geometry and terminal type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    pub rows: u16,
    pub cols: u16,
    /// Value of `TERM` in the spawned process
    pub term: String,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            rows: 30,
            cols: 80,
            term: "xterm-color".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Language used when a request omits one or sends an empty identifier
    pub default_language: String,

    /// Parent directory for workspaces; the system temp dir when unset
    pub workspace_root: Option<PathBuf>,

    pub pty: PtyConfig,

    /// How long a teardown waits for a killed process to report its exit
    pub teardown_grace: Duration,

    /// How long output is still forwarded after the exit notification
    pub drain_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            workspace_root: None,
            pty: PtyConfig::default(),
            teardown_grace: Duration::from_secs(2),
            drain_grace: Duration::from_millis(250),
        }
    }
}

impl SessionConfig {
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_pty(mut self, pty: PtyConfig) -> Self {
        self.pty = pty;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}
