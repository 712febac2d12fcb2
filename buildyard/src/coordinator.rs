//! Master/worker process protocol
//!
//! ## Build handshake (`build`, `test`)
//!
//! ```text
//! INIT -> fork -> AWAIT_FIRST_MSG -[BUILD_FINISHED]-> HANDSHAKE_OK
//!      -> AWAIT_FOLLOWUP_MSG -[RUN_AGAIN]-> fork -> AWAIT_FIRST_MSG ...
//! ```
//!
//! Any other message in either await state is a [`ProtocolError`] and ends
//! the task. The worker keeps running after `BUILD_FINISHED` to host the
//! application and to report rebuilds.
//!
//! ## Run fan-out (`run --instances N`)
//!
//! `N == 1` runs in-process. For `N > 1` the master forks N workers and
//! succeeds only once every one of them reported `RUN_FINISHED`; the first
//! other message fails the whole call.
//!
//! Workers that are still alive when a call fails are not killed unless the
//! policy says so. They move to [`DetachedWorkers`] and keep their output
//! forwarded until they exit.

use buildyard_sdk::{log_success, ModuleKind, Role, WorkerMessage};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CoordinatorPolicy, RespawnPolicy, SiblingPolicy};
use crate::error::{CoordinatorError, ProtocolError, Result, ValidationError};
use crate::pipeline::Phase;
use crate::process::{DetachedWorkers, ParentLink, Spawner, WorkerHandle};
use crate::runtime::{Runtime, RuntimeLoader};
use crate::signal::Signal;

/// Flags of the `build` task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Start the application once the build finished
    pub run: bool,
    /// Keep watching sources and rebuild on change
    pub watch: bool,
}

/// Parse an instance count; anything but a positive integer is rejected
pub fn validate_instances(raw: Option<&str>) -> Result<u32, ValidationError> {
    let raw = raw.ok_or_else(|| ValidationError::InvalidInstances("undefined".to_string()))?;
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ValidationError::InvalidInstances(raw.to_string()))
}

pub struct Coordinator {
    role: Role,
    spawner: Arc<dyn Spawner>,
    loader: Arc<dyn RuntimeLoader>,
    parent: Arc<dyn ParentLink>,
    policy: CoordinatorPolicy,
    detached: Arc<DetachedWorkers>,
}

impl Coordinator {
    pub fn new(
        role: Role,
        spawner: Arc<dyn Spawner>,
        loader: Arc<dyn RuntimeLoader>,
        parent: Arc<dyn ParentLink>,
        policy: CoordinatorPolicy,
    ) -> Self {
        Self {
            role,
            spawner,
            loader,
            parent,
            policy,
            detached: Arc::default(),
        }
    }

    /// Share the set that failed calls leave their live workers in
    pub fn with_detached(mut self, detached: Arc<DetachedWorkers>) -> Self {
        self.detached = detached;
        self
    }

    pub fn detached(&self) -> &DetachedWorkers {
        &self.detached
    }

    /// `build [--run] [--watch]`
    pub async fn build(&self, options: BuildOptions) -> Result<()> {
        if self.role.is_master() {
            let worker = self.handshake().await?;

            // Master side of watch mode: bring up the output runtime
            let output = if options.watch {
                let runtime = self.loader.load_runtime().await?;
                runtime.emit(Signal::WatchOutput)?;
                Some(runtime)
            } else {
                None
            };

            let supervised = self.supervise(worker).await;
            if let Some(runtime) = output {
                runtime.services().cancel_everything();
            }
            return supervised;
        }

        let mut runtime = self.build_worker().await?;
        if options.run {
            runtime.load_modules(ModuleKind::Backend)?;
            runtime.emit(Signal::Run)?;
        }
        if options.watch {
            emit_watch(&runtime)?;
        }
        runtime.services().wait_all().await;
        Ok(())
    }

    /// `test [--watch]`: build, then run the test phase in the worker
    pub async fn test(&self, watch: bool) -> Result<()> {
        if self.role.is_master() {
            let worker = self.handshake().await?;
            return self.supervise(worker).await;
        }

        let mut runtime = self.build_worker().await?;
        runtime.load_modules(ModuleKind::Backend)?;
        runtime.run_phase(Phase::Test).await?;
        if watch {
            emit_watch(&runtime)?;
        }
        runtime.services().wait_all().await;
        Ok(())
    }

    /// `run [--instances N]`
    pub async fn run(&self, instances: Option<&str>) -> Result<()> {
        let count = validate_instances(instances)?;

        if count == 1 {
            let runtime = self.loader.load_runtime().await?;
            runtime.emit(Signal::Run)?;
            runtime.services().wait_all().await;
            return Ok(());
        }

        if self.role.is_master() {
            return self.fan_out(count).await;
        }

        let runtime = self.loader.load_runtime().await?;
        runtime.emit(Signal::Run)?;
        self.notify(WorkerMessage::RunFinished)?;
        runtime.services().wait_all().await;
        Ok(())
    }

    /// Worker half of the handshake: build, then report
    async fn build_worker(&self) -> Result<Runtime> {
        let runtime = self.loader.load_build().await?;
        runtime.run_phase(Phase::Build).await?;
        log_success!("build finished");
        self.notify(WorkerMessage::BuildFinished)?;
        Ok(runtime)
    }

    fn notify(&self, message: WorkerMessage) -> Result<()> {
        self.parent.send(message).map_err(CoordinatorError::Link)
    }

    fn spawn(&self) -> Result<WorkerHandle> {
        let worker = self.spawner.spawn().map_err(CoordinatorError::Spawn)?;
        debug!(pid = worker.pid(), "Spawned worker");
        Ok(worker)
    }

    /// Fork one build worker and wait for `BUILD_FINISHED`
    pub async fn handshake(&self) -> Result<WorkerHandle> {
        let mut worker = self.spawn()?;
        let pid = worker.pid();
        info!(pid, "Waiting for build worker");

        let failure = match self
            .first_message(&mut worker, WorkerMessage::BUILD_FINISHED)
            .await
        {
            Ok(WorkerMessage::BuildFinished) => {
                info!(pid, "Build handshake complete");
                return Ok(worker);
            }
            Ok(got) => ProtocolError::UnexpectedFirstMessage {
                pid,
                expected: WorkerMessage::BUILD_FINISHED,
                got,
            },
            Err(e) => e,
        };
        self.detached.adopt(worker);
        Err(failure.into())
    }

    /// Follow a build worker after the handshake until it exits
    ///
    /// `RUN_AGAIN` forks a replacement and repeats the handshake; what
    /// happens to the previous worker is up to [`RespawnPolicy`].
    pub async fn supervise(&self, worker: WorkerHandle) -> Result<()> {
        let mut current = worker;
        let mut retained: Vec<WorkerHandle> = Vec::new();

        let outcome = loop {
            match current.next_message().await {
                Some(WorkerMessage::RunAgain) => {
                    info!(pid = current.pid(), policy = ?self.policy.on_rerun, "Rebuild requested");
                    match self.policy.on_rerun {
                        RespawnPolicy::Retire => current.terminate().await,
                        RespawnPolicy::Coexist => {}
                    }
                    let next = match self.handshake().await {
                        Ok(next) => next,
                        Err(e) => {
                            self.detached.adopt(current);
                            break Err(e);
                        }
                    };
                    let previous = std::mem::replace(&mut current, next);
                    if self.policy.on_rerun == RespawnPolicy::Coexist {
                        retained.push(previous);
                    }
                }
                Some(other) => {
                    self.detached.adopt(current);
                    break Err(ProtocolError::UnhandledMessage(other).into());
                }
                None => break exit_status(&mut current).await,
            }
        };

        for mut worker in retained {
            if let Err(e) = exit_status(&mut worker).await {
                warn!(error = %e, "Previous worker failed");
            }
        }
        outcome
    }

    /// Fork `count` run workers and wait until all of them started
    async fn fan_out(&self, count: u32) -> Result<()> {
        let mut workers = Vec::with_capacity(count as usize);
        let mut joined = Ok(Vec::new());
        for _ in 0..count {
            match self.spawn() {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    joined = Err(e);
                    break;
                }
            }
        }
        if joined.is_ok() {
            info!(instances = count, "Waiting for run workers");
            joined = try_join_all(workers.iter_mut().map(|w| self.await_run_finished(w))).await;
        }

        if let Err(e) = joined {
            match self.policy.on_instance_failure {
                SiblingPolicy::Terminate => {
                    for worker in workers.iter_mut() {
                        worker.terminate().await;
                    }
                }
                SiblingPolicy::LeaveRunning => {
                    for worker in workers {
                        self.detached.adopt(worker);
                    }
                }
            }
            return Err(e);
        }
        log_success!("{} instances running", count);

        for worker in workers.iter_mut() {
            if let Err(e) = exit_status(worker).await {
                warn!(error = %e, "Run worker failed");
            }
        }
        Ok(())
    }

    async fn await_run_finished(&self, worker: &mut WorkerHandle) -> Result<()> {
        match self
            .first_message(worker, WorkerMessage::RUN_FINISHED)
            .await?
        {
            WorkerMessage::RunFinished => {
                debug!(pid = worker.pid(), "Instance running");
                Ok(())
            }
            other => Err(ProtocolError::UnexpectedRunMessage(other).into()),
        }
    }

    /// First message of a fresh worker, bounded by the configured timeout
    async fn first_message(
        &self,
        worker: &mut WorkerHandle,
        expected: &'static str,
    ) -> Result<WorkerMessage, ProtocolError> {
        let pid = worker.pid();
        let received = match self.policy.message_timeout() {
            Some(limit) => tokio::time::timeout(limit, worker.next_message())
                .await
                .map_err(|_| ProtocolError::Timeout {
                    pid,
                    secs: limit.as_secs(),
                })?,
            None => worker.next_message().await,
        };
        received.ok_or(ProtocolError::WorkerExited { pid, expected })
    }
}

fn emit_watch(runtime: &Runtime) -> Result<()> {
    runtime.emit(Signal::WatchFrontend)?;
    runtime.emit(Signal::WatchBackend)?;
    Ok(())
}

/// Wait for a worker whose channel closed; a non-zero exit is an error
async fn exit_status(worker: &mut WorkerHandle) -> Result<()> {
    let pid = worker.pid();
    match worker.wait().await {
        Ok(Some(0)) => {
            debug!(pid, "Worker exited");
            Ok(())
        }
        Ok(code) => Err(CoordinatorError::WorkerFailed { pid, code }),
        Err(e) => {
            warn!(pid, error = %e, "Failed to wait for worker");
            Ok(())
        }
    }
}
