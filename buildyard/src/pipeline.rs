//! Priority-ordered sub-task pipeline per phase
//!
//! Modules register named sub-tasks into a phase with a numeric priority.
//! Running a phase executes its sub-tasks strictly one after another in
//! ascending priority; entries with equal priority keep registration order.
//!
//! ## Priority slots
//!
//! Priorities are plain integers and gaps are expected. The named slots are
//! the extension points the built-in modules use:
//!
//! | Slot | Value | Used by |
//! |------|-------|---------|
//! | [`Priority::PREPARE`] | 10 | dependency installation, code generation |
//! | [`Priority::ASSETS`]  | 20 | `build-webpage` (copy frontend assets) |
//! | [`Priority::BUNDLE`]  | 30 | `bundle` |
//! | [`Priority::CLEANUP`] | 40 | `clean-temp` |
//! | [`Priority::VERIFY`]  | 50 | test runners |
//!
//! Values between slots (e.g. 21-29) are free for modules that need to run
//! after one slot and before the next.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::context::TaskContext;
use crate::error::PhaseError;

/// Named pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Test,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Build => "build",
            Phase::Test => "test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering key of a sub-task within its phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const PREPARE: Priority = Priority(10);
    pub const ASSETS: Priority = Priority(20);
    pub const BUNDLE: Priority = Priority(30);
    pub const CLEANUP: Priority = Priority(40);
    pub const VERIFY: Priority = Priority(50);

    pub fn new(value: i32) -> Self {
        Priority(value)
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work registered into a phase
#[async_trait]
pub trait SubTask: Send + Sync {
    async fn run(&self, ctx: Arc<TaskContext>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`SubTask`]
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> SubTask for FnTask<F>
where
    F: Fn(Arc<TaskContext>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, ctx: Arc<TaskContext>) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a sub-task
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn SubTask>
where
    F: Fn(Arc<TaskContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask(f))
}

struct Entry {
    phase: Phase,
    priority: Priority,
    name: String,
    task: Arc<dyn SubTask>,
}

/// Registered sub-tasks for all phases
#[derive(Default)]
pub struct TaskPipeline {
    // Registration order is the tie-break, so entries are only ever appended
    entries: Vec<Entry>,
}

impl TaskPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sub-task to a phase
    pub fn register_sub_task(
        &mut self,
        phase: Phase,
        priority: impl Into<Priority>,
        name: impl Into<String>,
        task: Arc<dyn SubTask>,
    ) {
        let name = name.into();
        let priority = priority.into();
        debug!(%phase, %priority, task = %name, "Registered sub-task");
        self.entries.push(Entry {
            phase,
            priority,
            name,
            task,
        });
    }

    /// Sub-task names of a phase in execution order
    pub fn sequence(&self, phase: Phase) -> Vec<&str> {
        self.ordered(phase).iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ordered(&self, phase: Phase) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.iter().filter(|e| e.phase == phase).collect();
        // sort_by_key is stable
        entries.sort_by_key(|e| e.priority);
        entries
    }

    /// Run every sub-task of `phase` in order, stopping at the first failure
    pub async fn run_phase(&self, phase: Phase, ctx: Arc<TaskContext>) -> Result<(), PhaseError> {
        let entries = self.ordered(phase);
        if entries.is_empty() {
            debug!(%phase, "No sub-tasks registered");
            return Ok(());
        }

        info!(%phase, total = entries.len(), "Starting phase");
        let started = Instant::now();

        for entry in entries {
            let task_started = Instant::now();
            info!(%phase, task = %entry.name, priority = %entry.priority, "Starting sub-task");

            if let Err(source) = entry.task.run(ctx.clone()).await {
                error!(%phase, task = %entry.name, error = %source, "Sub-task failed");
                return Err(PhaseError {
                    phase,
                    task: entry.name.clone(),
                    source,
                });
            }

            info!(
                %phase,
                task = %entry.name,
                elapsed_ms = task_started.elapsed().as_millis() as u64,
                "Finished sub-task"
            );
        }

        info!(%phase, elapsed_ms = started.elapsed().as_millis() as u64, "Phase complete");
        Ok(())
    }
}
