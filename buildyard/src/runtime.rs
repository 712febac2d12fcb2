//! A prepared module runtime: registry, pipeline, signal bus and services
//!
//! The coordinator never touches the registry directly. It asks a
//! [`RuntimeLoader`] for a [`Runtime`] and drives phases and signals on it.

use async_trait::async_trait;
use buildyard_sdk::ModuleKind;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{RuntimeConfig, Settings};
use crate::context::TaskContext;
use crate::error::{PhaseError, RegistryError, Result, SignalError};
use crate::modules::Catalog;
use crate::pipeline::{Phase, TaskPipeline};
use crate::process::ParentLink;
use crate::registry::Registry;
use crate::services::ServiceRegistry;
use crate::signal::{Dispatch, HandlerContext, Signal, SignalBus};

/// Kinds in the order a full runtime loads them
const LOAD_ORDER: [ModuleKind; 4] = [
    ModuleKind::Plan,
    ModuleKind::Buildtask,
    ModuleKind::Frontend,
    ModuleKind::Backend,
];

pub struct Runtime {
    registry: Registry,
    pipeline: TaskPipeline,
    bus: SignalBus,
    handlers: HandlerContext,
}

impl Runtime {
    /// Finish preparing a scanned registry and build the task context
    pub fn assemble(
        mut registry: Registry,
        config: RuntimeConfig,
        parent: Arc<dyn ParentLink>,
    ) -> Result<Self, RegistryError> {
        registry.prepare_dependencies()?;
        registry.apply_dependency_overrides()?;
        registry.inject(config);

        let task = Arc::new(TaskContext {
            config: registry.runtime_config().clone(),
            modules: registry.active_modules(),
        });
        debug!(modules = task.modules.len(), "Assembled runtime");

        Ok(Self {
            registry,
            pipeline: TaskPipeline::new(),
            bus: SignalBus::new(),
            handlers: HandlerContext {
                task,
                services: ServiceRegistry::new(),
                parent,
            },
        })
    }

    pub fn load_modules(&mut self, kind: ModuleKind) -> Result<usize, RegistryError> {
        self.registry
            .load_modules(kind, &mut self.pipeline, &self.bus, &self.handlers)
    }

    /// Load every module kind
    pub fn load_all(&mut self) -> Result<(), RegistryError> {
        for kind in LOAD_ORDER {
            self.load_modules(kind)?;
        }
        Ok(())
    }

    pub async fn run_phase(&self, phase: Phase) -> Result<(), PhaseError> {
        self.pipeline
            .run_phase(phase, self.handlers.task.clone())
            .await
    }

    /// Emit a signal, failing if any handler failed
    pub fn emit(&self, mut signal: Signal<'_>) -> Result<(), SignalError> {
        self.dispatch(&mut signal).into_result()
    }

    /// Emit a signal and return every handler outcome
    pub fn dispatch(&self, signal: &mut Signal<'_>) -> Dispatch {
        self.bus.emit(signal, &self.handlers)
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn pipeline(&self) -> &TaskPipeline {
        &self.pipeline
    }

    pub fn context(&self) -> Arc<TaskContext> {
        self.handlers.task.clone()
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.handlers.services
    }
}

/// Brings up runtimes for the coordinator
#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    /// Registry prepared with build tasks loaded
    async fn load_build(&self) -> Result<Runtime>;

    /// Full module runtime, every kind loaded
    async fn load_runtime(&self) -> Result<Runtime>;
}

/// Loads modules from the directories named in settings
pub struct ModuleRuntimeLoader {
    settings: Settings,
    config: RuntimeConfig,
    catalog: Catalog,
    parent: Arc<dyn ParentLink>,
}

impl ModuleRuntimeLoader {
    pub fn new(settings: Settings, config: RuntimeConfig, parent: Arc<dyn ParentLink>) -> Self {
        Self {
            settings,
            config,
            catalog: Catalog::standard(),
            parent,
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Scan and resolve the configured plans
    pub fn scan(&self) -> Result<Registry, RegistryError> {
        let mut registry = Registry::new(self.catalog.clone(), self.settings.modules_config.clone());
        registry.scan(&self.settings.modules)?;
        if !self.config.plans.is_empty() {
            registry.resolve_plan(&self.config.plans)?;
        }
        Ok(registry)
    }

    fn assemble(&self) -> Result<Runtime, RegistryError> {
        Runtime::assemble(self.scan()?, self.config.clone(), self.parent.clone())
    }
}

#[async_trait]
impl RuntimeLoader for ModuleRuntimeLoader {
    async fn load_build(&self) -> Result<Runtime> {
        let mut runtime = self.assemble()?;
        runtime.load_modules(ModuleKind::Buildtask)?;
        info!(tasks = runtime.pipeline().len(), "Build runtime ready");
        Ok(runtime)
    }

    async fn load_runtime(&self) -> Result<Runtime> {
        let mut runtime = self.assemble()?;
        runtime.load_all()?;
        info!("Runtime ready");
        Ok(runtime)
    }
}
