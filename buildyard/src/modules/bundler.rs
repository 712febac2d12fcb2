use anyhow::Context;
use buildyard_sdk::BuiltinModule;
use std::sync::Arc;
use tracing::info;

use super::{Builtin, Registration};
use crate::bundle::BundleConfig;
use crate::context::TaskContext;
use crate::pipeline::{task_fn, Phase, Priority};
use crate::signal::{HandlerContext, Signal, SignalBus};

/// Name of the composed bundler configuration inside `<dest>/www`
pub const BUNDLE_FILE: &str = "bundle.json";

#[derive(BuiltinModule)]
#[module(
    id = "bundle",
    kind = "buildtask",
    description = "Compose the bundler configuration from all loaded modules"
)]
pub struct Bundle;

impl Builtin for Bundle {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        let bus = reg.bus.clone();
        let handlers = reg.handlers.clone();
        reg.sub_task(
            Phase::Build,
            Priority::BUNDLE,
            "bundle",
            task_fn(move |ctx| write_bundle_config(ctx, bus.clone(), handlers.clone())),
        );
        Ok(())
    }
}

async fn write_bundle_config(
    ctx: Arc<TaskContext>,
    bus: SignalBus,
    handlers: HandlerContext,
) -> anyhow::Result<()> {
    if !ctx.config.temp_dir.exists() {
        info!(temp = %ctx.config.temp_dir.display(), "Nothing staged, skipping bundle");
        return Ok(());
    }

    let mut config = BundleConfig::for_build(&ctx);
    bus.emit(&mut Signal::BuildBundleConfig(&mut config), &handlers)
        .into_result()?;

    let www = ctx.config.www_dir();
    tokio::fs::create_dir_all(&www)
        .await
        .with_context(|| format!("Failed to create {}", www.display()))?;

    let path = www.join(BUNDLE_FILE);
    let json = serde_json::to_string_pretty(&config)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), rules = config.rules.len(), "Wrote bundle configuration");
    Ok(())
}
