use buildyard_sdk::{ModuleDescriptor, ModuleKind};
use std::path::Path;
use tracing::info;

use super::manifest::{ModuleManifest, MANIFEST_FILE};
use crate::error::RegistryError;

/// Write `dir/name/module.yaml` from the template of `kind`
pub fn create_module(
    kind: ModuleKind,
    dir: &Path,
    name: &str,
) -> Result<ModuleDescriptor, RegistryError> {
    let module_dir = dir.join(name);
    let manifest_path = module_dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        return Err(RegistryError::AlreadyExists {
            path: manifest_path,
        });
    }

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| RegistryError::Io { path, source }
    };

    std::fs::create_dir_all(&module_dir).map_err(io_err(&module_dir))?;
    let content = template(kind, name);
    std::fs::write(&manifest_path, &content).map_err(io_err(&manifest_path))?;

    if kind == ModuleKind::Frontend {
        let entry = module_dir.join("index.js");
        if !entry.exists() {
            std::fs::write(&entry, format!("// {} entry point\n", name)).map_err(io_err(&entry))?;
        }
    }

    info!(module = %name, kind = %kind, path = %module_dir.display(), "Created module");

    // Read back through the parser so the descriptor matches what a scan sees
    let manifest = ModuleManifest::parse(&content).map_err(|e| RegistryError::Scan {
        path: manifest_path,
        message: e.to_string(),
    })?;
    Ok(manifest.describe(&module_dir))
}

fn template(kind: ModuleKind, name: &str) -> String {
    let header = format!("type: {}\nname: {}\ndescription: \"\"\n", kind, name);
    let body = match kind {
        ModuleKind::Plan => "modules: []\ndependencies:\n  - build-webpage\n  - bundle\n  - clean-temp\n",
        ModuleKind::Buildtask => {
            "tasks:\n  - phase: build\n    priority: 25\n    name: example\n    command: echo \"running example\"\n"
        }
        ModuleKind::Frontend => "dependencies: []\nconfig: {}\n",
        ModuleKind::Backend => {
            "dependencies: []\nconfig: {}\nhooks:\n  - signal: run\n    command: echo \"starting\"\n"
        }
        ModuleKind::Unknown => "",
    };
    format!("{}{}", header, body)
}
