//! Module tree fixtures

use buildyard::config::{RuntimeConfig, Settings};
use buildyard::modules::Catalog;
use buildyard::registry::Registry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project with a `modules/` directory
pub struct Project {
    pub root: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.path().join("modules")
    }

    /// Write `modules/<rel>/module.yaml`
    pub fn module(&self, rel: &str, manifest: &str) -> PathBuf {
        let dir = self.modules_dir().join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("module.yaml"), manifest).unwrap();
        dir
    }

    /// Write a file inside a module directory
    pub fn file(&self, rel: &str, content: &str) {
        let path = self.modules_dir().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Scanned registry without built-ins
    pub fn scan(&self) -> Registry {
        self.scan_with(Catalog::empty(), BTreeMap::new())
    }

    pub fn scan_with(
        &self,
        catalog: Catalog,
        modules_config: BTreeMap<String, serde_yaml::Value>,
    ) -> Registry {
        let mut registry = Registry::new(catalog, modules_config);
        registry.scan(&[self.modules_dir()]).unwrap();
        registry
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::defaults(self.path());
        settings.modules = vec![self.modules_dir()];
        settings
    }

    pub fn runtime_config(&self, plans: &[&str]) -> RuntimeConfig {
        RuntimeConfig {
            project_dir: self.path().to_path_buf(),
            dest_dir: self.path().join("output"),
            temp_dir: self.path().join("output/.temp"),
            plans: plans.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Ids of the active modules in load order
pub fn active_ids(registry: &Registry) -> Vec<String> {
    registry
        .active_modules()
        .iter()
        .map(|m| m.id().to_string())
        .collect()
}

pub fn plans(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
