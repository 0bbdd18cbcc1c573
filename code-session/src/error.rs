use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Compilation failed: {0}")]
    CompilationError(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Text reported to the client when a run attempt fails with this error.
    pub fn client_message(&self) -> String {
        match self {
            Error::UnsupportedLanguage(_) => "Unsupported language".to_string(),
            Error::CompilationError(output) => output.clone(),
            Error::Spawn(_) => "Failed to start process".to_string(),
            Error::Workspace(_) | Error::Io(_) => "Failed to prepare workspace".to_string(),
            Error::Configuration(msg) => msg.clone(),
        }
    }
}
