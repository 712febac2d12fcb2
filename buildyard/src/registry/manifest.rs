//! `module.yaml` declarations

use buildyard_sdk::{ModuleDescriptor, ModuleKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::pipeline::{Phase, Priority};
use crate::signal::SignalKind;

/// File that marks a directory as a module
pub const MANIFEST_FILE: &str = "module.yaml";

/// A shell command registered as a pipeline sub-task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub phase: Phase,
    pub priority: Priority,
    pub name: String,
    pub command: String,
}

/// A shell command started as a background service when a signal fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    pub signal: SignalKind,
    pub command: String,
}

/// Parsed `module.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Module ids this module needs loaded first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Plans only: module ids the plan activates
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    /// Plans only: config values laid over other modules' defaults
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, serde_yaml::Value>,
    /// Module defaults
    #[serde(skip_serializing_if = "serde_yaml::Value::is_null")]
    pub config: serde_yaml::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookSpec>,
}

impl ModuleManifest {
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid (if useless) declaration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Descriptor for a manifest found in `dir`
    pub fn describe(&self, dir: &Path) -> ModuleDescriptor {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = self.id.clone().unwrap_or(dir_name);

        ModuleDescriptor {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            id,
            kind: self.kind.unwrap_or(ModuleKind::Unknown),
            path: dir.display().to_string(),
            description: self.description.clone(),
        }
    }

    /// Every module id this declaration refers to
    pub fn references(&self) -> impl Iterator<Item = &String> {
        self.modules.iter().chain(self.dependencies.iter())
    }
}
