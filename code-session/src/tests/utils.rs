//! Scripted processes for driving sessions without a real terminal

use portable_pty::ChildKiller;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::{sleep, timeout};

use crate::{
    error::Error,
    pty::{ProcessExit, ProcessHandle, SpawnRequest, Spawner},
    types::ServerEvent,
    Result, SessionConfig, SessionManager, EXIT_NOTICE,
};

use super::fixtures::languages;

pub const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct FakeState {
    output: Option<mpsc::UnboundedSender<Vec<u8>>>,
    exit: Option<oneshot::Sender<ProcessExit>>,
}

fn finish(state: &Mutex<FakeState>, exited: &AtomicBool, code: u32) {
    let mut state = state.lock().unwrap();
    state.output.take();
    if let Some(exit) = state.exit.take() {
        exited.store(true, Ordering::SeqCst);
        let _ = exit.send(ProcessExit {
            code,
            success: code == 0,
        });
    }
}

#[derive(Debug, Clone)]
struct FakeKiller {
    state: Arc<Mutex<FakeState>>,
    exited: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
    ignore_hangup: bool,
    fail_kill: bool,
}

impl ChildKiller for FakeKiller {
    fn kill(&mut self) -> std::io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        if !self.ignore_hangup {
            finish(&self.state, &self.exited, 129);
        }
        Ok(())
    }

    fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        Box::new(self.clone())
    }
}

/// Test-side controls of one fake process
pub struct FakeProcess {
    pub request: SpawnRequest,
    state: Arc<Mutex<FakeState>>,
    exited: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
    input: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl FakeProcess {
    pub fn emit(&self, bytes: &[u8]) {
        if let Some(output) = &self.state.lock().unwrap().output {
            let _ = output.send(bytes.to_vec());
        }
    }

    pub fn exit(&self, code: u32) {
        finish(&self.state, &self.exited, code);
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub async fn next_input(&self) -> Option<Vec<u8>> {
        let mut input = self.input.lock().await;
        timeout(WAIT, input.recv()).await.ok().flatten()
    }
}

/// Spawner handing out [`FakeProcess`]es instead of real programs
#[derive(Default)]
pub struct FakeSpawner {
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    fail_next: AtomicBool,
    ignore_hangup: AtomicBool,
    fail_kill: AtomicBool,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next spawn fail as if the program did not exist.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Processes spawned from now on survive `kill`.
    pub fn ignore_hangup(&self) {
        self.ignore_hangup.store(true, Ordering::SeqCst);
    }

    /// Killing processes spawned from now on fails and leaves them running.
    pub fn fail_kill(&self) {
        self.fail_kill.store(true, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    /// Waits until `count` processes have been spawned.
    pub async fn wait_spawned(&self, count: usize) -> bool {
        eventually(move || async move { self.spawned() >= count }).await
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcess> {
        self.processes.lock().unwrap()[index].clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Spawn(format!("{}: not found", request.program)));
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(FakeState {
            output: Some(output_tx),
            exit: Some(exit_tx),
        }));
        let exited = Arc::new(AtomicBool::new(false));
        let kills = Arc::new(AtomicUsize::new(0));

        let killer = FakeKiller {
            state: state.clone(),
            exited: exited.clone(),
            kills: kills.clone(),
            ignore_hangup: self.ignore_hangup.load(Ordering::SeqCst),
            fail_kill: self.fail_kill.load(Ordering::SeqCst),
        };

        self.processes.lock().unwrap().push(Arc::new(FakeProcess {
            request: request.clone(),
            state,
            exited: exited.clone(),
            kills,
            input: AsyncMutex::new(input_rx),
        }));

        Ok(ProcessHandle::new(
            input_tx,
            output_rx,
            exit_rx,
            Box::new(killer),
            exited,
            None,
        ))
    }
}

/// Receives output events until the exit notice (inclusive) or a timeout.
pub async fn collect_until_exit(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<String> {
    let mut events = Vec::new();
    while let Ok(Some(ServerEvent::Output(text))) = timeout(WAIT, rx.recv()).await {
        let done = text == EXIT_NOTICE;
        events.push(text);
        if done {
            break;
        }
    }
    events
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Names of the entries directly under `dir`
pub fn entries(dir: &Path) -> HashSet<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Manager over the fake spawner with workspaces under `root`
pub fn fake_manager(
    spawner: Arc<FakeSpawner>,
    root: &Path,
    config: SessionConfig,
) -> Arc<SessionManager> {
    let config = config.with_workspace_root(root);
    Arc::new(SessionManager::with_spawner(
        languages::table(),
        config,
        spawner,
    ))
}

/// Next output event, or `None` after [`WAIT`]
pub async fn next_output(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Option<String> {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(ServerEvent::Output(text))) => Some(text),
        _ => None,
    }
}
