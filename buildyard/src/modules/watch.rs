//! File watching for `--watch`
//!
//! In a build worker, the first change under an active frontend or backend
//! module directory sends `RUN_AGAIN` to the master, which forks a fresh
//! build. The master side (`WatchOutput`) only reports changes to the output
//! directory.

use anyhow::Context;
use buildyard_sdk::{BuiltinModule, ModuleKind, WorkerMessage};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Builtin, Registration};
use crate::signal::{HandlerContext, SignalKind};

#[derive(BuiltinModule)]
#[module(
    id = "watch",
    kind = "buildtask",
    description = "Rebuild when module sources change"
)]
pub struct Watch;

impl Builtin for Watch {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        // One RUN_AGAIN per worker, whichever watcher sees a change first
        let requested = Arc::new(AtomicBool::new(false));

        let flag = requested.clone();
        reg.on(SignalKind::WatchFrontend, move |_, ctx| {
            watch_sources(ctx, ModuleKind::Frontend, flag.clone())
        });
        let flag = requested;
        reg.on(SignalKind::WatchBackend, move |_, ctx| {
            watch_sources(ctx, ModuleKind::Backend, flag.clone())
        });
        reg.on(SignalKind::WatchOutput, |_, ctx| watch_output(ctx));
        Ok(())
    }
}

fn watch_sources(
    ctx: &HandlerContext,
    kind: ModuleKind,
    requested: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let dirs: Vec<PathBuf> = ctx
        .task
        .modules_of(kind)
        .filter_map(|m| m.dir.clone())
        .filter(|dir| dir.is_dir())
        .collect();
    if dirs.is_empty() {
        debug!(%kind, "No module directories to watch");
        return Ok(());
    }

    let (watcher, mut changes) = start_watcher(&dirs)?;
    let parent = ctx.parent.clone();

    ctx.services.spawn("watch", async move {
        // Dropping the watcher stops it
        let _watcher = watcher;
        let Some(path) = changes.recv().await else {
            return;
        };
        if requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(%kind, path = %path.display(), "Source changed, requesting rebuild");
        if let Err(e) = parent.send(WorkerMessage::RunAgain) {
            error!(error = %e, "Failed to request rebuild");
        }
    });
    Ok(())
}

fn watch_output(ctx: &HandlerContext) -> anyhow::Result<()> {
    let www = ctx.task.config.www_dir();
    if !www.is_dir() {
        warn!(path = %www.display(), "Output directory does not exist, not watching");
        return Ok(());
    }

    let (watcher, mut changes) = start_watcher(std::slice::from_ref(&www))?;
    ctx.services.spawn("watch", async move {
        let _watcher = watcher;
        while let Some(path) = changes.recv().await {
            info!(path = %path.display(), "Output updated");
        }
    });
    Ok(())
}

/// Watch `dirs` recursively, yielding changed paths
fn start_watcher(
    dirs: &[PathBuf],
) -> anyhow::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    for path in event.paths {
                        // Receiver is gone once the service finished
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => error!("Watch error: {:?}", e),
        },
        Config::default(),
    )
    .context("Failed to create file watcher")?;

    for dir in dirs {
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        info!(path = %dir.display(), "Watching");
    }

    Ok((watcher, rx))
}
