//! Worker processes and the stderr message channel
//!
//! A worker is the current executable re-run with the master's own argument
//! list plus `--role worker`. Its stderr is piped back to the master: protocol
//! lines (`__BUILDYARD_IPC__:<TOKEN>`) become [`WorkerMessage`]s, every other
//! line is forwarded to the master's stderr unchanged.
//!
//! The pipe is only read while the master runs. Workers the master stops
//! supervising without killing them go to [`DetachedWorkers`], which the
//! master drains before it exits so their stderr never hits a closed pipe.

use async_trait::async_trait;
use buildyard_sdk::{Role, WorkerMessage};
use futures::future::join_all;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle control over one worker process
#[async_trait]
pub trait WorkerProcess: Send {
    /// Kill the process if it is still running
    async fn terminate(&mut self) -> std::io::Result<()>;

    /// Wait for exit, returning the exit code when there is one
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

#[async_trait]
impl WorkerProcess for Child {
    async fn terminate(&mut self) -> std::io::Result<()> {
        match self.try_wait()? {
            Some(_) => Ok(()),
            None => self.kill().await,
        }
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(Child::wait(self).await?.code())
    }
}

/// Master-side handle on a spawned worker
pub struct WorkerHandle {
    pid: u32,
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
    process: Box<dyn WorkerProcess>,
}

impl WorkerHandle {
    pub fn new(
        pid: u32,
        messages: mpsc::UnboundedReceiver<WorkerMessage>,
        process: Box<dyn WorkerProcess>,
    ) -> Self {
        Self {
            pid,
            messages,
            process,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next message in send order; `None` once the worker's channel closed
    pub async fn next_message(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }

    pub async fn terminate(&mut self) {
        debug!(pid = self.pid, "Terminating worker");
        if let Err(e) = self.process.terminate().await {
            warn!(pid = self.pid, error = %e, "Failed to terminate worker");
        }
    }

    pub async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        self.process.wait().await
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("pid", &self.pid).finish()
    }
}

/// Workers left running after the master stopped supervising them
#[derive(Debug, Default)]
pub struct DetachedWorkers {
    workers: Mutex<Vec<WorkerHandle>>,
}

impl DetachedWorkers {
    pub fn adopt(&self, worker: WorkerHandle) {
        debug!(pid = worker.pid(), "Detached worker");
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep forwarding every detached worker's output until all of them exit
    pub async fn drain(&self) {
        let workers = {
            let mut held = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *held)
        };
        if workers.is_empty() {
            return;
        }
        info!(workers = workers.len(), "Waiting for detached workers to exit");

        join_all(workers.into_iter().map(|mut worker| async move {
            let pid = worker.pid();
            while let Some(message) = worker.next_message().await {
                debug!(pid, %message, "Message from detached worker");
            }
            match worker.wait().await {
                Ok(code) => debug!(pid, ?code, "Detached worker exited"),
                Err(e) => warn!(pid, error = %e, "Failed to wait for detached worker"),
            }
        }))
        .await;
    }
}

/// Creates worker processes
pub trait Spawner: Send + Sync {
    fn spawn(&self) -> std::io::Result<WorkerHandle>;
}

/// Spawns the current executable as a worker
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: PathBuf, args: Vec<OsString>) -> Self {
        Self { program, args }
    }

    /// Reuse this process's executable and argument list
    pub fn from_current() -> std::io::Result<Self> {
        let program = std::env::current_exe()?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::new(program, args))
    }

    /// Build the worker command line
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--role")
            .arg(Role::Worker.as_arg())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self) -> std::io::Result<WorkerHandle> {
        let mut child = self.build_command().spawn()?;
        let pid = child.id().unwrap_or_default();

        debug!(
            parent = std::process::id(),
            pid,
            cmd = %format!(
                "{} {} --role worker",
                self.program.display(),
                self.args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
            ),
            "Forked worker"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(pid, stderr, tx));
        }

        Ok(WorkerHandle::new(pid, rx, Box::new(child)))
    }
}

/// Split a worker's stderr into protocol messages and plain output
async fn forward_stderr(
    pid: u32,
    stderr: tokio::process::ChildStderr,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WorkerMessage::parse_line(&line) {
                Some(message) => {
                    debug!(pid, %message, "Worker message");
                    // Receiver may be gone once the master stopped listening
                    let _ = tx.send(message);
                }
                None => eprintln!("{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "Failed to read worker stderr");
                break;
            }
        }
    }
    // Dropping tx closes the channel: the worker is gone
}

/// Worker-side channel to the master
pub trait ParentLink: Send + Sync {
    fn send(&self, message: WorkerMessage) -> std::io::Result<()>;
}

/// Writes protocol lines on this process's stderr
#[derive(Debug, Default)]
pub struct StderrLink;

impl ParentLink for StderrLink {
    fn send(&self, message: WorkerMessage) -> std::io::Result<()> {
        debug!(%message, "Notifying parent");
        message.write_to(&mut std::io::stderr().lock())
    }
}

/// Link used by a master process, which has no parent to talk to
#[derive(Debug, Default)]
pub struct NoParent;

impl ParentLink for NoParent {
    fn send(&self, message: WorkerMessage) -> std::io::Result<()> {
        debug!(%message, "No parent process; message dropped");
        Ok(())
    }
}

/// In-memory link, handy for tests and embedding
#[derive(Debug, Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<WorkerMessage>>,
}

impl RecordingLink {
    pub fn sent(&self) -> Vec<WorkerMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ParentLink for RecordingLink {
    fn send(&self, message: WorkerMessage) -> std::io::Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}
