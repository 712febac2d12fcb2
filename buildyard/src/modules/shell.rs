//! Shell commands declared in `module.yaml`
//!
//! `tasks` become pipeline sub-tasks that must exit 0. `hooks` are started as
//! background services when their signal fires; the handler returns as soon
//! as the process is spawned.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::context::{ActiveModule, TaskContext};
use crate::pipeline::SubTask;
use crate::registry::manifest::HookSpec;
use crate::signal::SignalBus;

/// `sh -c <command>` with the module directory as cwd and build dirs in the env
pub fn shell_command(
    command: &str,
    module: &str,
    dir: Option<&Path>,
    config: &RuntimeConfig,
) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.env("BUILDYARD_MODULE", module)
        .env("BUILDYARD_PROJECT_DIR", &config.project_dir)
        .env("BUILDYARD_DEST_DIR", &config.dest_dir)
        .env("BUILDYARD_TEMP_DIR", &config.temp_dir);
    if config.debug {
        cmd.env("BUILDYARD_DEBUG", "1");
    }
    cmd
}

/// A `tasks` entry
pub struct ShellTask {
    module: String,
    command: String,
    dir: Option<PathBuf>,
}

impl ShellTask {
    pub fn new(module: &ActiveModule, command: impl Into<String>) -> Self {
        Self {
            module: module.id().to_string(),
            command: command.into(),
            dir: module.dir.clone(),
        }
    }
}

#[async_trait]
impl SubTask for ShellTask {
    async fn run(&self, ctx: Arc<TaskContext>) -> anyhow::Result<()> {
        let status = shell_command(&self.command, &self.module, self.dir.as_deref(), &ctx.config)
            .status()
            .await
            .with_context(|| format!("Failed to start `{}`", self.command))?;

        if !status.success() {
            bail!("`{}` exited with {}", self.command, status);
        }
        Ok(())
    }
}

/// Subscribe a `hooks` entry on behalf of `module`
pub fn subscribe_hook(bus: &SignalBus, module: &ActiveModule, hook: &HookSpec) {
    let id = module.id().to_string();
    let dir = module.dir.clone();
    let command = hook.command.clone();

    bus.subscribe(hook.signal, id.clone(), move |_, ctx| {
        let mut child = shell_command(&command, &id, dir.as_deref(), &ctx.task.config)
            .spawn()
            .with_context(|| format!("Failed to start hook `{}`", command))?;
        info!(module = %id, command = %command, "Started hook");

        let module = id.clone();
        let command = command.clone();
        ctx.services.spawn(id.clone(), async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(module = %module, "Hook finished"),
                Ok(status) => warn!(module = %module, command = %command, %status, "Hook failed"),
                Err(e) => error!(module = %module, error = %e, "Failed to wait for hook"),
            }
        });
        Ok(())
    });
}
