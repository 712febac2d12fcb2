use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::manifest::{ModuleManifest, MANIFEST_FILE};
use crate::error::RegistryError;

/// A module declaration found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub dir: PathBuf,
    pub manifest: ModuleManifest,
}

/// Discover all module declarations under the selection directories
///
/// Directories are walked recursively in name order. A directory holding a
/// `module.yaml` is a module and is not descended into further.
pub fn discover_modules(selection: &[PathBuf]) -> Result<Vec<DiscoveredModule>, RegistryError> {
    let mut modules = Vec::new();

    for search_dir in selection {
        if !search_dir.is_dir() {
            debug!(path = %search_dir.display(), "Module directory does not exist, skipping");
            continue;
        }
        walk(search_dir, &mut modules)?;
    }

    Ok(modules)
}

fn walk(dir: &Path, found: &mut Vec<DiscoveredModule>) -> Result<(), RegistryError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if manifest_path.is_file() {
        found.push(read_manifest(&manifest_path, dir)?);
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut children: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !is_ignored(path))
        .collect();
    children.sort();

    for child in children {
        walk(&child, found)?;
    }
    Ok(())
}

/// Dependency and VCS directories never hold module declarations
fn is_ignored(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with('.') || name == "node_modules" || name == "target",
        None => true,
    }
}

fn read_manifest(path: &Path, dir: &Path) -> Result<DiscoveredModule, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let manifest = ModuleManifest::parse(&content).map_err(|e| RegistryError::Scan {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if manifest.kind.is_none() {
        warn!(path = %path.display(), "Module declares no type");
    }

    Ok(DiscoveredModule {
        dir: dir.to_path_buf(),
        manifest,
    })
}
