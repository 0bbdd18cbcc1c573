//! Pseudo-terminal process bridge
//!
//! A [`ProcessHandle`] is the only thing the rest of the crate knows about a
//! running program: an output stream of raw terminal chunks, an input sink,
//! a one-shot exit notification and an idempotent kill. [`PtySpawner`] builds
//! handles on top of `portable-pty`; tests plug in their own [`Spawner`].

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{config::PtyConfig, error::Error, Result};

const READ_BUFFER_SIZE: usize = 8192;

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: u32,
    pub success: bool,
}

/// Starts processes attached to a terminal
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle>;
}

/// Handle to one running process and its terminal
pub struct ProcessHandle {
    input: mpsc::UnboundedSender<Vec<u8>>,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    exit: Option<oneshot::Receiver<ProcessExit>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
    killed: bool,
    pid: Option<u32>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("killed", &self.killed)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl ProcessHandle {
    /// Assembles a handle from its channels. `exited` must be set before the
    /// exit notification is sent.
    pub fn new(
        input: mpsc::UnboundedSender<Vec<u8>>,
        output: mpsc::UnboundedReceiver<Vec<u8>>,
        exit: oneshot::Receiver<ProcessExit>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        exited: Arc<AtomicBool>,
        pid: Option<u32>,
    ) -> Self {
        Self {
            input,
            output: Some(output),
            exit: Some(exit),
            killer,
            exited,
            killed: false,
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Forwards bytes verbatim to the terminal input.
    pub fn write(&self, bytes: Vec<u8>) -> Result<()> {
        self.input.send(bytes).map_err(|_| {
            Error::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "terminal input is closed",
            ))
        })
    }

    /// The output stream. Can be taken once.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.output.take()
    }

    /// The exit notification. Can be taken once.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<ProcessExit>> {
        self.exit.take()
    }

    /// Asks the process to terminate without waiting for it. Killing a process
    /// that already exited or was already killed is a no-op.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed || self.has_exited() {
            return Ok(());
        }
        self.killed = true;

        match self.killer.kill() {
            Ok(()) => Ok(()),
            Err(e) if self.has_exited() => {
                debug!("Kill raced with process exit: {}", e);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Sends SIGKILL to the process group of a process that outlived `kill`.
    pub fn force_kill(&self) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.has_exited() {
            return Ok(());
        }

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Io(std::io::Error::from(e))),
        }
    }
}

/// Spawns programs on a fresh pseudo-terminal
#[derive(Debug, Clone, Default)]
pub struct PtySpawner {
    config: PtyConfig,
}

impl PtySpawner {
    pub fn new(config: PtyConfig) -> Self {
        Self { config }
    }
}

impl Spawner for PtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Spawn(format!("Failed to open pty: {}", e)))?;

        let mut command = CommandBuilder::new(&request.program);
        command.args(&request.args);
        command.cwd(&request.cwd);
        command.env("TERM", &self.config.term);

        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| Error::Spawn(format!("{}: {}", request.program, e)))?;
        // Only the child may hold the slave side, otherwise reads never see EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (mut reader, mut writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                return Err(Error::Spawn(format!("Failed to attach to pty: {}", e)));
            }
        };

        let (output_tx, output_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    // EIO once the last slave descriptor is closed
                    Err(_) => break,
                }
            }
        });

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::task::spawn_blocking(move || {
            while let Some(bytes) = input_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                    debug!("Terminal input closed: {}", e);
                    break;
                }
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel::<ProcessExit>();
        let exited = Arc::new(AtomicBool::new(false));
        let wait_exited = exited.clone();
        tokio::task::spawn_blocking(move || {
            let exit = match child.wait() {
                Ok(status) => ProcessExit {
                    code: status.exit_code(),
                    success: status.success(),
                },
                Err(e) => {
                    warn!("Failed to wait for child process: {}", e);
                    ProcessExit {
                        code: u32::MAX,
                        success: false,
                    }
                }
            };
            wait_exited.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(exit);
        });

        debug!("Spawned {} {:?} as pid {:?}", request.program, request.args, pid);
        Ok(ProcessHandle::new(
            input_tx, output_rx, exit_rx, killer, exited, pid,
        ))
    }
}

/// Incremental UTF-8 decoder for terminal output.
///
/// A multi-byte character split across reads is held back and emitted with
/// the chunk that completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut start = 0;
        loop {
            let rest = &self.pending[start..];
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start += valid + len;
                        }
                        None => {
                            start += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flushes a dangling partial character.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
