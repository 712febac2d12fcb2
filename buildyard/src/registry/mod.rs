//! Module registry
//!
//! One `Registry` is built per process and walked through its stages in
//! order: [`scan`](Registry::scan), optionally
//! [`resolve_plan`](Registry::resolve_plan),
//! [`prepare_dependencies`](Registry::prepare_dependencies),
//! [`apply_dependency_overrides`](Registry::apply_dependency_overrides), then
//! any number of [`load_modules`](Registry::load_modules) calls. Calling a
//! step before its prerequisite fails with [`RegistryError::OutOfOrder`].

pub mod discovery;
pub mod manifest;
pub mod scaffold;

use buildyard_sdk::{ModuleDescriptor, ModuleKind};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::context::ActiveModule;
use crate::error::RegistryError;
use crate::modules::shell::{subscribe_hook, ShellTask};
use crate::modules::{Builtin, Catalog, Registration};
use crate::pipeline::TaskPipeline;
use crate::signal::{HandlerContext, SignalBus};
use manifest::ModuleManifest;

pub use scaffold::create_module;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Empty,
    Scanned,
    Resolved,
    Prepared,
    Overridden,
}

/// One scanned module
pub struct ModuleEntry {
    pub descriptor: ModuleDescriptor,
    /// `None` for built-ins
    pub dir: Option<PathBuf>,
    pub manifest: ModuleManifest,
    builtin: Option<Arc<dyn Builtin>>,
}

impl ModuleEntry {
    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }
}

pub struct Registry {
    catalog: Catalog,
    /// Per-module values from settings, applied last
    modules_config: BTreeMap<String, Value>,
    entries: Vec<ModuleEntry>,
    index: HashMap<String, usize>,
    stage: Stage,
    plans: Vec<String>,
    /// Active entries; load order once prepared
    active: Vec<usize>,
    configs: HashMap<String, Value>,
    runtime: RuntimeConfig,
    loaded: HashSet<String>,
}

impl Registry {
    pub fn new(catalog: Catalog, modules_config: BTreeMap<String, Value>) -> Self {
        Self {
            catalog,
            modules_config,
            entries: Vec::new(),
            index: HashMap::new(),
            stage: Stage::Empty,
            plans: Vec::new(),
            active: Vec::new(),
            configs: HashMap::new(),
            runtime: RuntimeConfig::default(),
            loaded: HashSet::new(),
        }
    }

    /// Discover modules under `selection`; built-ins are always included
    ///
    /// Every scanned module is active until a plan narrows the set.
    pub fn scan(&mut self, selection: &[PathBuf]) -> Result<(), RegistryError> {
        self.entries.clear();
        self.index.clear();
        self.plans.clear();
        self.configs.clear();
        self.loaded.clear();

        for builtin in self.catalog.entries().to_vec() {
            self.insert(ModuleEntry {
                descriptor: builtin.descriptor,
                dir: None,
                manifest: ModuleManifest::default(),
                builtin: Some(builtin.module),
            })?;
        }

        for found in discovery::discover_modules(selection)? {
            let descriptor = found.manifest.describe(&found.dir);
            self.insert(ModuleEntry {
                descriptor,
                dir: Some(found.dir),
                manifest: found.manifest,
                builtin: None,
            })?;
        }

        self.active = (0..self.entries.len()).collect();
        self.stage = Stage::Scanned;
        info!(modules = self.entries.len(), "Scanned modules");
        Ok(())
    }

    fn insert(&mut self, entry: ModuleEntry) -> Result<(), RegistryError> {
        if let Some(&existing) = self.index.get(&entry.descriptor.id) {
            return Err(RegistryError::DuplicateModule {
                id: entry.descriptor.id.clone(),
                first: self.entries[existing].descriptor.path.clone(),
                second: entry.descriptor.path,
            });
        }
        debug!(module = %entry.descriptor.id, kind = %entry.descriptor.kind, "Found module");
        self.index
            .insert(entry.descriptor.id.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Narrow the active set to what the named plans require
    ///
    /// The closure follows plan `modules` and every `dependencies` list.
    /// Built-ins stay active. References to unknown ids are reported by
    /// [`prepare_dependencies`](Self::prepare_dependencies).
    pub fn resolve_plan(&mut self, names: &[String]) -> Result<(), RegistryError> {
        if self.stage < Stage::Scanned {
            return Err(RegistryError::OutOfOrder {
                step: "resolve_plan",
                requires: "scan",
            });
        }

        let mut queue = VecDeque::new();
        for name in names {
            match self.index.get(name) {
                Some(&idx) if self.entries[idx].descriptor.kind == ModuleKind::Plan => {
                    queue.push_back(idx)
                }
                _ => {
                    return Err(RegistryError::UnknownPlan {
                        name: name.clone(),
                        suggestion: self.suggest_plan(name),
                    })
                }
            }
        }

        let mut selected: HashSet<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_builtin())
            .map(|(idx, _)| idx)
            .collect();
        let mut visited = HashSet::new();
        while let Some(idx) = queue.pop_front() {
            if !visited.insert(idx) {
                continue;
            }
            selected.insert(idx);
            for reference in self.entries[idx].manifest.references() {
                if let Some(&dep) = self.index.get(reference) {
                    queue.push_back(dep);
                }
            }
        }

        self.active = (0..self.entries.len())
            .filter(|idx| selected.contains(idx))
            .collect();
        self.plans = names.to_vec();
        self.configs.clear();
        self.stage = Stage::Resolved;
        info!(plans = %names.join(","), active = self.active.len(), "Resolved plans");
        Ok(())
    }

    fn suggest_plan(&self, name: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.entries
            .iter()
            .filter(|e| e.descriptor.kind == ModuleKind::Plan)
            .filter_map(|e| {
                matcher
                    .fuzzy_match(&e.descriptor.id, name)
                    .map(|score| (score, e.descriptor.id.clone()))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, id)| id)
    }

    /// Check references and compute a dependency-first load order
    ///
    /// Idempotent: a second call is a no-op.
    pub fn prepare_dependencies(&mut self) -> Result<(), RegistryError> {
        if self.stage < Stage::Scanned {
            return Err(RegistryError::OutOfOrder {
                step: "prepare_dependencies",
                requires: "scan",
            });
        }
        if self.stage >= Stage::Prepared {
            return Ok(());
        }

        for &idx in &self.active {
            let entry = &self.entries[idx];
            if let Some(missing) = entry
                .manifest
                .references()
                .find(|id| !self.index.contains_key(*id))
            {
                return Err(RegistryError::MissingDependency {
                    module: entry.descriptor.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let mut order = Vec::with_capacity(self.active.len());
        let mut done = HashSet::new();
        for &idx in &self.active {
            self.visit(idx, &mut Vec::new(), &mut done, &mut order)?;
        }

        self.active = order;
        self.stage = Stage::Prepared;
        debug!(
            order = %self.active.iter().map(|&i| self.entries[i].descriptor.id.as_str()).collect::<Vec<_>>().join(","),
            "Prepared load order"
        );
        Ok(())
    }

    fn visit(
        &self,
        idx: usize,
        path: &mut Vec<usize>,
        done: &mut HashSet<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), RegistryError> {
        if done.contains(&idx) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|&p| p == idx) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| self.entries[i].descriptor.id.clone())
                .collect();
            cycle.push(self.entries[idx].descriptor.id.clone());
            return Err(RegistryError::DependencyCycle(cycle));
        }

        path.push(idx);
        for reference in self.entries[idx].manifest.references() {
            if let Some(&dep) = self.index.get(reference) {
                self.visit(dep, path, done, order)?;
            }
        }
        path.pop();

        done.insert(idx);
        order.push(idx);
        Ok(())
    }

    /// Compute each active module's effective config
    ///
    /// Module defaults, then plan `overrides` in load order, then settings.
    pub fn apply_dependency_overrides(&mut self) -> Result<(), RegistryError> {
        if self.stage < Stage::Prepared {
            return Err(RegistryError::OutOfOrder {
                step: "apply_dependency_overrides",
                requires: "prepare_dependencies",
            });
        }
        if self.stage >= Stage::Overridden {
            return Ok(());
        }

        let mut configs = HashMap::new();
        for &idx in &self.active {
            let entry = &self.entries[idx];
            let id = &entry.descriptor.id;
            let mut config = entry.manifest.config.clone();

            for &plan in &self.active {
                let plan = &self.entries[plan];
                if plan.descriptor.kind != ModuleKind::Plan {
                    continue;
                }
                if let Some(value) = plan.manifest.overrides.get(id) {
                    merge_values(&mut config, value.clone());
                }
            }
            if let Some(value) = self.modules_config.get(id) {
                merge_values(&mut config, value.clone());
            }
            configs.insert(id.clone(), config);
        }

        self.configs = configs;
        self.stage = Stage::Overridden;
        Ok(())
    }

    /// Make CLI-level configuration visible to modules loaded afterwards
    pub fn inject(&mut self, runtime: RuntimeConfig) {
        debug!(debug = runtime.debug, watch = runtime.watch, run = runtime.run, "Injected runtime config");
        self.runtime = runtime;
    }

    /// Configuration last passed to [`Registry::inject`]
    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn plans(&self) -> &[String] {
        &self.plans
    }

    /// Active modules in load order, with their effective config
    pub fn active_modules(&self) -> Vec<ActiveModule> {
        self.active
            .iter()
            .map(|&idx| self.active_module(idx))
            .collect()
    }

    fn active_module(&self, idx: usize) -> ActiveModule {
        let entry = &self.entries[idx];
        ActiveModule {
            descriptor: entry.descriptor.clone(),
            dir: entry.dir.clone(),
            config: self
                .configs
                .get(&entry.descriptor.id)
                .cloned()
                .unwrap_or_else(|| entry.manifest.config.clone()),
        }
    }

    /// Every scanned module of `kind`, sorted by id
    pub fn all_of(&self, kind: ModuleKind) -> Vec<&ModuleDescriptor> {
        let mut found: Vec<&ModuleDescriptor> = self
            .entries
            .iter()
            .map(|e| &e.descriptor)
            .filter(|d| d.kind == kind)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Active modules of `kind`, in load order
    pub fn active_of(&self, kind: ModuleKind) -> Vec<&ModuleDescriptor> {
        self.active
            .iter()
            .map(|&idx| &self.entries[idx].descriptor)
            .filter(|d| d.kind == kind)
            .collect()
    }

    /// Run the registration side effects of every active module of `kind`
    ///
    /// Each module registers at most once per registry; returns how many
    /// registered on this call.
    pub fn load_modules(
        &mut self,
        kind: ModuleKind,
        pipeline: &mut TaskPipeline,
        bus: &SignalBus,
        handlers: &HandlerContext,
    ) -> Result<usize, RegistryError> {
        if self.stage < Stage::Overridden {
            return Err(RegistryError::OutOfOrder {
                step: "load_modules",
                requires: "apply_dependency_overrides",
            });
        }

        let pending: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&idx| {
                let d = &self.entries[idx].descriptor;
                d.kind == kind && !self.loaded.contains(&d.id)
            })
            .collect();

        for &idx in &pending {
            let module = self.active_module(idx);
            let entry = &self.entries[idx];

            for task in &entry.manifest.tasks {
                pipeline.register_sub_task(
                    task.phase,
                    task.priority,
                    format!("{}:{}", module.id(), task.name),
                    Arc::new(ShellTask::new(&module, task.command.clone())),
                );
            }
            for hook in &entry.manifest.hooks {
                subscribe_hook(bus, &module, hook);
            }
            if let Some(builtin) = &entry.builtin {
                let mut reg = Registration {
                    module: &module,
                    config: &self.runtime,
                    pipeline: &mut *pipeline,
                    bus,
                    handlers,
                };
                builtin
                    .register(&mut reg)
                    .map_err(|source| RegistryError::Load {
                        module: module.id().to_string(),
                        source,
                    })?;
            }

            debug!(module = %module.id(), %kind, "Loaded module");
            self.loaded.insert(module.descriptor.id);
        }

        info!(%kind, count = pending.len(), "Loaded modules");
        Ok(pending.len())
    }
}

/// Deep-merge `overlay` into `base`; mappings merge, anything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
