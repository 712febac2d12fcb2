//! Loading declared tasks and hooks into a runtime

use super::common::*;
use buildyard::config::RuntimeConfig;
use buildyard::modules::{Builtin, Catalog, Registration};
use buildyard::pipeline::Phase;
use buildyard::process::RecordingLink;
use buildyard::signal::SignalKind;
use buildyard::Runtime;
use buildyard_sdk::{BuiltinModule, ModuleKind};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn runtime(project: &Project) -> Runtime {
    Runtime::assemble(
        project.scan(),
        project.runtime_config(&[]),
        Arc::new(RecordingLink::default()),
    )
    .unwrap()
}

#[test]
fn test_tasks_register_in_priority_order() {
    let project = Project::new();
    project.module(
        "gen",
        r#"type: buildtask
tasks:
  - {phase: build, priority: 40, name: late, command: "true"}
  - {phase: build, priority: 10, name: early, command: "true"}
  - {phase: test, priority: 50, name: check, command: "true"}
"#,
    );
    let mut runtime = runtime(&project);

    assert_eq!(runtime.load_modules(ModuleKind::Buildtask).unwrap(), 1);
    assert_eq!(
        runtime.pipeline().sequence(Phase::Build),
        vec!["gen:early", "gen:late"]
    );
    assert_eq!(runtime.pipeline().sequence(Phase::Test), vec!["gen:check"]);
}

#[test]
fn test_modules_load_once() {
    let project = Project::new();
    project.module(
        "gen",
        "type: buildtask\ntasks:\n  - {phase: build, priority: 10, name: gen, command: 'true'}\n",
    );
    let mut runtime = runtime(&project);

    assert_eq!(runtime.load_modules(ModuleKind::Buildtask).unwrap(), 1);
    assert_eq!(runtime.load_modules(ModuleKind::Buildtask).unwrap(), 0);
    runtime.load_all().unwrap();
    assert_eq!(runtime.pipeline().len(), 1);
}

#[test]
fn test_hooks_subscribe_on_load() {
    let project = Project::new();
    project.module(
        "api",
        "type: backend\nhooks:\n  - {signal: run, command: 'true'}\n  - {signal: watch-backend, command: 'true'}\n",
    );
    let mut runtime = runtime(&project);

    assert_eq!(runtime.bus().subscriber_count(SignalKind::Run), 0);
    runtime.load_modules(ModuleKind::Backend).unwrap();
    assert_eq!(runtime.bus().subscriber_count(SignalKind::Run), 1);
    assert_eq!(runtime.bus().subscriber_count(SignalKind::WatchBackend), 1);
}

#[test]
fn test_effective_config_reaches_context() {
    let project = Project::new();
    project.module("api", "type: backend\nconfig: {port: 8080}\n");
    let runtime = runtime(&project);

    let api = runtime.context().module("api").cloned().unwrap();
    assert_eq!(api.config["port"], serde_yaml::Value::from(8080));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_tasks_run_with_module_env() {
    let project = Project::new();
    project.module(
        "gen",
        r#"type: buildtask
tasks:
  - {phase: build, priority: 10, name: mark, command: 'mkdir -p "$BUILDYARD_DEST_DIR" && echo "$BUILDYARD_MODULE" > "$BUILDYARD_DEST_DIR/marker"'}
"#,
    );
    let mut runtime = runtime(&project);
    runtime.load_modules(ModuleKind::Buildtask).unwrap();

    runtime.run_phase(Phase::Build).await.unwrap();

    let marker = std::fs::read_to_string(project.path().join("output/marker")).unwrap();
    assert_eq!(marker.trim(), "gen");
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_task_stops_phase() {
    let project = Project::new();
    project.module(
        "gen",
        r#"type: buildtask
tasks:
  - {phase: build, priority: 10, name: fail, command: "exit 3"}
  - {phase: build, priority: 20, name: after, command: 'touch "$BUILDYARD_PROJECT_DIR/after"'}
"#,
    );
    let mut runtime = runtime(&project);
    runtime.load_modules(ModuleKind::Buildtask).unwrap();

    let err = runtime.run_phase(Phase::Build).await.unwrap_err();
    assert_eq!(err.task, "gen:fail");
    assert!(!project.path().join("after").exists());
}

/// Keeps the configuration it was handed at registration
#[derive(BuiltinModule)]
#[module(id = "config-reader", kind = "buildtask")]
struct ConfigReader {
    seen: Arc<Mutex<Option<RuntimeConfig>>>,
}

impl Builtin for ConfigReader {
    fn register(&self, reg: &mut Registration<'_>) -> anyhow::Result<()> {
        *self.seen.lock().unwrap() = Some(reg.config.clone());
        Ok(())
    }
}

#[test]
fn test_injected_config_reaches_modules() {
    let project = Project::new();
    let seen = Arc::new(Mutex::new(None));
    let catalog = Catalog::empty().with(ConfigReader { seen: seen.clone() });
    let registry = project.scan_with(catalog, BTreeMap::new());

    let config = RuntimeConfig {
        debug: true,
        watch: true,
        ..project.runtime_config(&[])
    };
    let mut runtime =
        Runtime::assemble(registry, config.clone(), Arc::new(RecordingLink::default())).unwrap();
    assert!(seen.lock().unwrap().is_none());

    runtime.load_modules(ModuleKind::Buildtask).unwrap();

    assert_eq!(seen.lock().unwrap().as_ref(), Some(&config));
    assert_eq!(runtime.context().config, config);
}
