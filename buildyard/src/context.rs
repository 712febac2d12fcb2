//! Read-only view of a worker run handed to sub-tasks and signal handlers

use buildyard_sdk::{ModuleDescriptor, ModuleKind};
use std::path::PathBuf;

use crate::config::RuntimeConfig;

/// A module selected by the active plans, with its effective config
#[derive(Debug, Clone)]
pub struct ActiveModule {
    pub descriptor: ModuleDescriptor,
    /// Module directory; `None` for compiled-in modules
    pub dir: Option<PathBuf>,
    /// Defaults merged with plan overrides and settings
    pub config: serde_yaml::Value,
}

impl ActiveModule {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn kind(&self) -> ModuleKind {
        self.descriptor.kind
    }
}

/// Everything a sub-task may look at
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub config: RuntimeConfig,
    /// Active modules in load order
    pub modules: Vec<ActiveModule>,
}

impl TaskContext {
    pub fn modules_of(&self, kind: ModuleKind) -> impl Iterator<Item = &ActiveModule> {
        self.modules.iter().filter(move |m| m.kind() == kind)
    }

    pub fn module(&self, id: &str) -> Option<&ActiveModule> {
        self.modules.iter().find(|m| m.id() == id)
    }
}
