use anyhow::Context;
use buildyard_sdk::{BuiltinModule, ModuleKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Builtin, Registration};
use crate::context::TaskContext;
use crate::pipeline::{task_fn, Phase, Priority};

/// File types staged for the bundler
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "es6", "es7", "json", "md", "html", "css", "scss", "map", "gif", "jpg", "jpeg", "png",
    "ico", "svg", "ttf", "eot", "woff", "woff2", "xsd", "wsdl", "mp3", "wav",
];

/// Directories inside a frontend module that never ship to the browser
const SKIPPED_DIRS: &[&str] = &["node_modules", "bower_components", "server"];

#[derive(BuiltinModule)]
#[module(
    id = "build-webpage",
    kind = "buildtask",
    description = "Stage frontend module assets into the temp directory"
)]
pub struct BuildWebpage;

impl Builtin for BuildWebpage {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        reg.sub_task(
            Phase::Build,
            Priority::ASSETS,
            "build-webpage",
            task_fn(stage_frontend_modules),
        );
        Ok(())
    }
}

async fn stage_frontend_modules(ctx: Arc<TaskContext>) -> anyhow::Result<()> {
    let staged = ctx.config.temp_modules_dir();
    let jobs: Vec<(String, PathBuf, PathBuf)> = ctx
        .modules_of(ModuleKind::Frontend)
        .filter_map(|m| {
            m.dir
                .clone()
                .map(|dir| (m.id().to_string(), dir, staged.join(m.id())))
        })
        .collect();

    if jobs.is_empty() {
        debug!("No frontend modules to stage");
        return Ok(());
    }

    tokio::task::spawn_blocking(move || {
        for (id, src, dest) in jobs {
            let copied = copy_assets(&src, &dest)
                .with_context(|| format!("Failed to stage assets of '{}'", id))?;
            info!(module = %id, files = copied, dest = %dest.display(), "Staged frontend assets");
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
    .context("Asset staging task panicked")?
}

/// Copy asset files from `src` into `dest`, keeping the relative layout
pub fn copy_assets(src: &Path, dest: &Path) -> anyhow::Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Failed to read {}", src.display()))?
        .flatten()
    {
        let path = entry.path();
        let name = entry.file_name();

        if path.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            copied += copy_assets(&path, &dest.join(&name))?;
        } else if is_asset(&path) {
            std::fs::create_dir_all(dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            std::fs::copy(&path, dest.join(&name))
                .with_context(|| format!("Failed to copy {}", path.display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn is_asset(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
