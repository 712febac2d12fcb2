use anyhow::Context;
use buildyard_sdk::BuiltinModule;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Builtin, Registration};
use crate::context::TaskContext;
use crate::pipeline::{task_fn, Phase, Priority};

#[derive(BuiltinModule)]
#[module(
    id = "clean-temp",
    kind = "buildtask",
    description = "Remove the temp directory after a release build"
)]
pub struct CleanTemp;

impl Builtin for CleanTemp {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        reg.sub_task(Phase::Build, Priority::CLEANUP, "clean_temp", task_fn(clean_temp));
        Ok(())
    }
}

async fn clean_temp(ctx: Arc<TaskContext>) -> anyhow::Result<()> {
    let config = &ctx.config;
    // Watch mode rebuilds from the staged files
    if config.debug || config.watch {
        debug!("Keeping temp directory");
        return Ok(());
    }
    if !config.temp_dir.exists() {
        return Ok(());
    }

    tokio::fs::remove_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to remove {}", config.temp_dir.display()))?;
    info!(path = %config.temp_dir.display(), "Removed temp directory");
    Ok(())
}
