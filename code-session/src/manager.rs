use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    config::SessionConfig,
    error::Error,
    executor::BuildExecutor,
    languages::LanguageTable,
    pty::{PtySpawner, SpawnRequest, Spawner},
    session::{Session, SessionRegistry},
    types::{ConnectionId, Outbound, SessionId},
    workspace::WorkspaceProvisioner,
    Result,
};

/// Owns every connection's session and serializes their lifecycle
pub struct SessionManager {
    languages: Arc<LanguageTable>,
    provisioner: WorkspaceProvisioner,
    builder: BuildExecutor,
    spawner: Arc<dyn Spawner>,
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(languages: LanguageTable, config: SessionConfig) -> Self {
        let spawner = Arc::new(PtySpawner::new(config.pty.clone()));
        Self::with_spawner(languages, config, spawner)
    }

    pub fn with_spawner(
        languages: LanguageTable,
        config: SessionConfig,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            languages: Arc::new(languages),
            provisioner: WorkspaceProvisioner::new(config.workspace_root.clone()),
            builder: BuildExecutor::new(),
            spawner,
            registry: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The requested language, or the default when none (or an empty one) was given.
    pub fn language_or_default<'a>(&'a self, language: Option<&'a str>) -> &'a str {
        language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.config.default_language.as_str())
    }

    /// Replaces whatever runs on `connection` with a new run of `code`.
    ///
    /// Failures are reported to the client through `outbound` and returned;
    /// none of them leaves a session or workspace behind.
    pub async fn start_run(
        &self,
        connection: ConnectionId,
        outbound: &Outbound,
        language: Option<&str>,
        code: &str,
    ) -> Result<SessionId> {
        let mut slot = self.registry.lock(connection).await;

        if let Some(previous) = slot.take() {
            info!("Replacing {} on {}", previous.id(), connection);
            previous.teardown(self.config.teardown_grace).await;
        }

        match self.launch(connection, outbound, language, code).await {
            Ok(session) => {
                let id = session.id();
                *slot = Some(session);
                Ok(id)
            }
            Err(e) => {
                match &e {
                    Error::UnsupportedLanguage(_) | Error::CompilationError(_) => {
                        debug!("Run on {} rejected: {}", connection, e)
                    }
                    _ => error!("Run on {} failed: {}", connection, e),
                }
                outbound.output(e.client_message());
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        connection: ConnectionId,
        outbound: &Outbound,
        language: Option<&str>,
        code: &str,
    ) -> Result<Session> {
        let plan = self.languages.resolve(self.language_or_default(language))?;
        let mut workspace = self.provisioner.provision(plan, code).await?;

        if plan.requires_compile() {
            let result = self.builder.compile(plan, &workspace).await;
            if !result.succeeded {
                workspace.release();
                return Err(Error::CompilationError(result.output));
            }
        }

        let (program, args) = plan.run.render(workspace.root(), workspace.source());
        let request = SpawnRequest {
            program,
            args,
            cwd: workspace.root().to_path_buf(),
        };
        let process = match self.spawner.spawn(&request) {
            Ok(process) => process,
            Err(e) => {
                workspace.release();
                return Err(e);
            }
        };

        Ok(Session::start(
            connection,
            &plan.language,
            process,
            workspace,
            outbound.clone(),
            self.registry.clone(),
            self.config.drain_grace,
        ))
    }

    /// Writes client input to the active process. Input without a session is dropped.
    pub async fn forward_input(&self, connection: ConnectionId, bytes: Vec<u8>) {
        let Some(slot) = self.registry.lock_existing(connection).await else {
            return;
        };
        match slot.as_ref() {
            Some(session) => {
                if let Err(e) = session.write(bytes) {
                    debug!("Dropped input for {}: {}", session.id(), e);
                }
            }
            None => debug!("Dropped input for {} without a session", connection),
        }
    }

    /// Kills and releases the session of `connection`, if any. Safe to repeat.
    pub async fn teardown(&self, connection: ConnectionId) {
        let Some(mut slot) = self.registry.lock_existing(connection).await else {
            return;
        };
        if let Some(session) = slot.take() {
            session.teardown(self.config.teardown_grace).await;
        }
    }

    /// Tears down and forgets a connection that has gone away.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.teardown(connection).await;
        self.registry.forget(connection);
        debug!("Forgot {}", connection);
    }
}
