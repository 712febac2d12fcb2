//! Layered settings
//!
//! Settings are merged from (lowest to highest priority):
//!
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/buildyard/config.yaml`)
//! 3. Project config (`buildyard.yaml` in the project dir, or `--config PATH`)
//! 4. CLI flags (applied by the caller)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Project settings file name
pub const PROJECT_FILE: &str = "buildyard.yaml";

/// What the master does with the previous build worker when it sends `RUN_AGAIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RespawnPolicy {
    /// Terminate the previous worker before forking its replacement
    #[default]
    Retire,
    /// Leave the previous worker running next to the new one
    Coexist,
}

/// What the master does with sibling instances when one fails to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiblingPolicy {
    /// Surface the failure and leave the other instances alone
    #[default]
    LeaveRunning,
    /// Kill every instance that is still alive
    Terminate,
}

/// Knobs of the master/worker protocol
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CoordinatorPolicy {
    pub on_rerun: RespawnPolicy,
    pub on_instance_failure: SiblingPolicy,
    /// Bounded wait for a worker message. `None` waits forever.
    pub message_timeout_secs: Option<u64>,
}

impl CoordinatorPolicy {
    pub fn message_timeout(&self) -> Option<Duration> {
        self.message_timeout_secs.map(Duration::from_secs)
    }
}

/// One settings layer as it appears on disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub modules: Option<Vec<PathBuf>>,
    pub plans: Option<Vec<String>>,
    pub dest: Option<PathBuf>,
    pub temp: Option<PathBuf>,
    pub modules_config: Option<BTreeMap<String, serde_yaml::Value>>,
    pub coordinator: Option<CoordinatorPolicy>,
}

impl SettingsFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let file: SettingsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(file.relative_to(path.parent().unwrap_or(Path::new("."))))
    }

    /// Resolve relative paths against the directory holding the file
    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.modules = self
            .modules
            .map(|dirs| dirs.into_iter().map(resolve).collect());
        self.dest = self.dest.map(resolve);
        self.temp = self.temp.map(resolve);
        self
    }
}

/// Effective settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directories scanned for modules
    pub modules: Vec<PathBuf>,
    /// Plans activated when the CLI names none
    pub plans: Vec<String>,
    pub dest: PathBuf,
    pub temp: Option<PathBuf>,
    /// Per-module config values (highest priority)
    pub modules_config: BTreeMap<String, serde_yaml::Value>,
    pub coordinator: CoordinatorPolicy,
}

impl Settings {
    pub fn defaults(project_dir: &Path) -> Self {
        Self {
            modules: vec![project_dir.join("modules")],
            plans: Vec::new(),
            dest: project_dir.join("output"),
            temp: None,
            modules_config: BTreeMap::new(),
            coordinator: CoordinatorPolicy::default(),
        }
    }

    /// Overlay a layer; list and map values replace, they do not append
    pub fn merge(mut self, layer: SettingsFile) -> Self {
        if let Some(modules) = layer.modules {
            self.modules = modules;
        }
        if let Some(plans) = layer.plans {
            self.plans = plans;
        }
        if let Some(dest) = layer.dest {
            self.dest = dest;
        }
        if layer.temp.is_some() {
            self.temp = layer.temp;
        }
        if let Some(config) = layer.modules_config {
            self.modules_config.extend(config);
        }
        if let Some(coordinator) = layer.coordinator {
            self.coordinator = coordinator;
        }
        self
    }

    /// Load defaults, the global file and the project file
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut settings = Self::defaults(project_dir);

        if let Some(global) = global_settings_path().filter(|p| p.exists()) {
            debug!(path = %global.display(), "Loading global settings");
            settings = settings.merge(SettingsFile::read(&global)?);
        }

        let project = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Some(project_dir.join(PROJECT_FILE)).filter(|p| p.exists()),
        };
        if let Some(path) = project {
            debug!(path = %path.display(), "Loading project settings");
            settings = settings.merge(SettingsFile::read(&path)?);
        }

        if let Some(user_modules) = user_modules_dir().filter(|p| p.is_dir()) {
            if !settings.modules.contains(&user_modules) {
                settings.modules.push(user_modules);
            }
        }

        Ok(settings)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp.clone().unwrap_or_else(|| self.dest.join(".temp"))
    }
}

/// `<config dir>/buildyard/config.yaml`
pub fn global_settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "buildyard").map(|dirs| dirs.config_dir().join("config.yaml"))
}

/// `~/.buildyard/modules`
pub fn user_modules_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".buildyard/modules"))
}

/// CLI-level configuration, handed to modules through `Registry::inject`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeConfig {
    pub project_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub plans: Vec<String>,
    pub debug: bool,
    pub watch: bool,
    pub run: bool,
}

impl RuntimeConfig {
    /// Where `build-webpage` stages frontend modules
    pub fn temp_modules_dir(&self) -> PathBuf {
        self.temp_dir.join("modules")
    }

    pub fn www_dir(&self) -> PathBuf {
        self.dest_dir.join("www")
    }
}
