use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, error};

use crate::{error::Error, languages::BuildPlan, Result};

const WORKSPACE_PREFIX: &str = "code-session-";

/// Creates one ephemeral directory per run
#[derive(Debug, Clone, Default)]
pub struct WorkspaceProvisioner {
    root: Option<PathBuf>,
}

impl WorkspaceProvisioner {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Creates a uniquely named directory and writes `code` into the plan's source file.
    pub async fn provision(&self, plan: &BuildPlan, code: &str) -> Result<Workspace> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(WORKSPACE_PREFIX);
            builder
        };
        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| Error::Workspace(format!("Failed to create workspace directory: {}", e)))?;

        let root = dir.path().to_path_buf();
        let source = root.join(&plan.source_file);
        let mut workspace = Workspace {
            root,
            sources: vec![source.clone()],
            dir: Some(dir),
        };

        if let Err(e) = fs::write(&source, code).await {
            workspace.release();
            return Err(Error::Workspace(format!(
                "Failed to write {}: {}",
                plan.source_file, e
            )));
        }

        debug!("Provisioned workspace at {}", workspace.root.display());
        Ok(workspace)
    }
}

/// Ephemeral directory holding one run's source and build artifacts
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    sources: Vec<PathBuf>,
    dir: Option<TempDir>,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Path of the main source file
    pub fn source(&self) -> &Path {
        &self.sources[0]
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Removes everything in the workspace. Only the first call does any work;
    /// failures are logged, never returned.
    pub fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => debug!("Released workspace {}", self.root.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Workspace {} was already removed", self.root.display())
            }
            Err(e) => error!(
                "Failed to clean up workspace {}: {}",
                self.root.display(),
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}
