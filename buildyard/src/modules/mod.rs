//! Modules compiled into the binary
//!
//! Built-ins are always part of a scan. Each one is a unit struct carrying
//! `#[derive(BuiltinModule)]` metadata plus a [`Builtin`] impl that performs
//! its registration side effects when its kind is loaded.

pub mod build_webpage;
pub mod bundler;
pub mod clean_temp;
pub mod shell;
pub mod template_cache;
pub mod watch;

use buildyard_sdk::{ModuleDefinition, ModuleDescriptor};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::context::ActiveModule;
use crate::pipeline::{Phase, Priority, SubTask, TaskPipeline};
use crate::signal::{HandlerContext, Signal, SignalBus, SignalKind};

/// What a module may touch while it registers
pub struct Registration<'a> {
    pub module: &'a ActiveModule,
    /// Configuration injected into the registry before loading
    pub config: &'a RuntimeConfig,
    pub pipeline: &'a mut TaskPipeline,
    pub bus: &'a SignalBus,
    /// Context later handed to handlers, for sub-tasks that emit signals
    pub handlers: &'a HandlerContext,
}

impl Registration<'_> {
    pub fn sub_task(
        &mut self,
        phase: Phase,
        priority: impl Into<Priority>,
        name: impl Into<String>,
        task: Arc<dyn SubTask>,
    ) {
        self.pipeline.register_sub_task(phase, priority, name, task);
    }

    /// Subscribe on behalf of the registering module
    pub fn on<F>(&self, kind: SignalKind, handler: F)
    where
        F: Fn(&mut Signal<'_>, &HandlerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, self.module.id(), handler);
    }
}

/// Registration code of a compiled-in module
pub trait Builtin: Send + Sync {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub descriptor: ModuleDescriptor,
    pub module: Arc<dyn Builtin>,
}

/// The set of compiled-in modules a registry starts from
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in module shipped with buildyard
    pub fn standard() -> Self {
        Self::empty()
            .with(build_webpage::BuildWebpage)
            .with(bundler::Bundle)
            .with(template_cache::TemplateCache)
            .with(clean_temp::CleanTemp)
            .with(watch::Watch)
    }

    pub fn with<M>(mut self, module: M) -> Self
    where
        M: ModuleDefinition + Builtin + 'static,
    {
        self.entries.push(CatalogEntry {
            descriptor: M::descriptor(),
            module: Arc::new(module),
        });
        self
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
