//! Task dispatch for the `buildyard` binary

use anyhow::Result;
use buildyard_sdk::{log_file_saved, log_warning, ModuleDescriptor, ModuleKind, Role};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::config::{RuntimeConfig, Settings};
use crate::coordinator::{validate_instances, BuildOptions, Coordinator};
use crate::docker::{self, DockerOptions};
use crate::error::ValidationError;
use crate::modules::Catalog;
use crate::process::{DetachedWorkers, NoParent, ParentLink, ProcessSpawner, StderrLink};
use crate::registry::{self, Registry};
use crate::runtime::ModuleRuntimeLoader;

/// Narrowest width of the `[name]` column in listings
const MIN_NAME_COLUMN: usize = 20;

/// Run the selected task
///
/// Workers a failed task leaves running end up in `detached`; the caller
/// drains it before exiting.
pub async fn execute(cli: Cli, detached: Arc<DetachedWorkers>) -> Result<()> {
    let mut settings = Settings::load(&cli.dir, cli.config.as_deref())?;
    settings.modules.extend(cli.module_dirs.iter().cloned());
    let plans = if cli.plans.is_empty() {
        settings.plans.clone()
    } else {
        cli.plans.clone()
    };
    debug!(role = cli.role.as_arg(), plans = %plans.join(","), "Starting");

    match &cli.command {
        Command::Ls => list_modules(&settings, &plans),
        Command::CreateModule { kind, name } => create_module(&cli.dir, kind, name),
        Command::BuildDocker {
            only_dockerfile,
            expose,
            tag,
        } => {
            let options = DockerOptions {
                plans: plans.clone(),
                config_path: cli.config.clone(),
                expose: *expose,
            };
            build_docker(&cli.dir, &settings, options, *only_dockerfile, tag).await
        }
        Command::Build {
            watch,
            run,
            instances,
        } => {
            if let Some(raw) = instances {
                validate_instances(Some(raw))?;
            }
            let options = BuildOptions {
                run: *run,
                watch: *watch,
            };
            let config = runtime_config(&cli, &settings, plans, options);
            coordinator(&cli, settings, config, detached)?
                .build(options)
                .await?;
            Ok(())
        }
        Command::Test { watch } => {
            let options = BuildOptions {
                run: false,
                watch: *watch,
            };
            let config = runtime_config(&cli, &settings, plans, options);
            coordinator(&cli, settings, config, detached)?
                .test(*watch)
                .await?;
            Ok(())
        }
        Command::Run { instances } => {
            let config = runtime_config(&cli, &settings, plans, BuildOptions::default());
            coordinator(&cli, settings, config, detached)?
                .run(Some(instances.as_str()))
                .await?;
            Ok(())
        }
    }
}

fn runtime_config(
    cli: &Cli,
    settings: &Settings,
    plans: Vec<String>,
    options: BuildOptions,
) -> RuntimeConfig {
    RuntimeConfig {
        project_dir: cli.dir.clone(),
        dest_dir: settings.dest.clone(),
        temp_dir: settings.temp_dir(),
        plans,
        debug: cli.debug,
        watch: options.watch,
        run: options.run,
    }
}

fn coordinator(
    cli: &Cli,
    settings: Settings,
    config: RuntimeConfig,
    detached: Arc<DetachedWorkers>,
) -> Result<Coordinator> {
    let parent: Arc<dyn ParentLink> = match cli.role {
        Role::Worker => Arc::new(StderrLink),
        Role::Master => Arc::new(NoParent),
    };
    let spawner = Arc::new(ProcessSpawner::from_current()?);
    let policy = settings.coordinator.clone();
    let loader = Arc::new(ModuleRuntimeLoader::new(settings, config, parent.clone()));
    Ok(Coordinator::new(cli.role, spawner, loader, parent, policy).with_detached(detached))
}

fn scan(settings: &Settings, plans: &[String]) -> Result<Registry> {
    let mut registry = Registry::new(Catalog::standard(), settings.modules_config.clone());
    registry.scan(&settings.modules)?;
    if !plans.is_empty() {
        registry.resolve_plan(plans)?;
    }
    Ok(registry)
}

fn list_modules(settings: &Settings, plans: &[String]) -> Result<()> {
    let registry = scan(settings, plans)?;
    let listing = listing(&registry, plans);

    if !listing.unknown.is_empty() {
        log_warning!("Unknown type modules found. It may be a declaration error.");
        for line in &listing.unknown {
            eprintln!("{}", line);
        }
    }
    for line in &listing.lines {
        println!("{}", line);
    }
    Ok(())
}

/// Output of `ls`
#[derive(Debug, Default, PartialEq)]
pub struct Listing {
    /// Modules whose type is not recognized, for stderr
    pub unknown: Vec<String>,
    pub lines: Vec<String>,
}

/// Plan modules when no plan is selected, otherwise the active modules per kind
pub fn listing(registry: &Registry, plans: &[String]) -> Listing {
    let unknown = format_listing(&registry.all_of(ModuleKind::Unknown));

    if plans.is_empty() {
        let mut lines = vec!["plan modules:".to_string()];
        lines.extend(format_listing(&registry.all_of(ModuleKind::Plan)));
        return Listing { unknown, lines };
    }

    let mut lines = vec![format!("{} modules", plans.join(","))];
    for kind in ModuleKind::LISTED {
        let modules = registry.active_of(kind);
        if !modules.is_empty() {
            lines.push(format!("  {} modules:", kind));
            lines.extend(format_listing(&modules));
        }
    }
    Listing { unknown, lines }
}

/// One line per module: padded `[name]` then the description
pub fn format_listing(modules: &[&ModuleDescriptor]) -> Vec<String> {
    let width = modules
        .iter()
        .map(|m| m.id.len() + 2)
        .max()
        .unwrap_or(0)
        .max(MIN_NAME_COLUMN);

    modules
        .iter()
        .map(|m| {
            let name = format!("[{}]", m.name);
            let line = format!(
                "    {:<width$}    {}",
                name,
                m.description.as_deref().unwrap_or(""),
                width = width
            );
            line.trim_end().to_string()
        })
        .collect()
}

fn create_module(dir: &Path, kind: &str, name: &str) -> Result<()> {
    let module_kind: ModuleKind = kind
        .parse()
        .map_err(|_| ValidationError::InvalidModuleKind(kind.to_string()))?;
    if !is_valid_module_name(name) {
        return Err(ValidationError::InvalidModuleName(name.to_string()).into());
    }

    let descriptor = registry::create_module(module_kind, dir, name)?;
    println!(
        "{} module {} created at {}",
        descriptor.kind,
        descriptor.name,
        dir.display()
    );
    Ok(())
}

fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn build_docker(
    dir: &Path,
    settings: &Settings,
    options: DockerOptions,
    only_dockerfile: bool,
    tag: &str,
) -> Result<()> {
    let mut registry = scan(settings, &options.plans)?;
    registry.prepare_dependencies()?;

    let content = docker::render_dockerfile(&registry.active_modules(), &options);
    let dockerfile = docker::write_dockerfile(dir, &content).await?;
    log_file_saved!(dockerfile.display());

    if !only_dockerfile {
        docker::run_docker_build(dir, &dockerfile, tag).await?;
    }
    Ok(())
}
