//! Plan resolution, dependency order and config overrides

use super::common::*;
use buildyard::error::RegistryError;
use buildyard::modules::Catalog;
use buildyard::pipeline::TaskPipeline;
use buildyard::registry::Registry;
use buildyard_sdk::ModuleKind;
use serde_yaml::Value;
use std::collections::BTreeMap;

fn shop_project() -> Project {
    let project = Project::new();
    project.module("admin", "type: plan\nmodules: [other]\n");
    project.module("lib", "type: backend\n");
    project.module("other", "type: frontend\n");
    project.module("shop", "type: frontend\ndependencies: [lib]\n");
    project.module("web", "type: plan\nmodules: [shop]\n");
    project
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_plan_activates_its_closure() {
    let project = shop_project();
    let mut registry = project.scan();

    registry.resolve_plan(&plans(&["web"])).unwrap();
    registry.prepare_dependencies().unwrap();

    assert_eq!(active_ids(&registry), vec!["lib", "shop", "web"]);
    assert_eq!(registry.plans(), &["web".to_string()]);
    assert!(registry.active_of(ModuleKind::Frontend).iter().all(|d| d.id != "other"));
}

#[test]
fn test_several_plans_union() {
    let project = shop_project();
    let mut registry = project.scan();

    registry.resolve_plan(&plans(&["web", "admin"])).unwrap();
    registry.prepare_dependencies().unwrap();

    let mut ids = active_ids(&registry);
    ids.sort();
    assert_eq!(ids, vec!["admin", "lib", "other", "shop", "web"]);
}

#[test]
fn test_builtins_survive_plan_resolution() {
    let project = shop_project();
    let mut registry = project.scan_with(Catalog::standard(), BTreeMap::new());

    registry.resolve_plan(&plans(&["admin"])).unwrap();

    assert_eq!(registry.active_of(ModuleKind::Buildtask).len(), 5);
    assert!(registry.active_of(ModuleKind::Backend).is_empty());
}

#[test]
fn test_unknown_plan_suggests_closest() {
    let project = Project::new();
    project.module("web-app", "type: plan\n");
    let mut registry = project.scan();

    let err = registry.resolve_plan(&plans(&["webapp"])).unwrap_err();
    assert_eq!(err.to_string(), "unknown plan 'webapp', did you mean 'web-app'?");
}

#[test]
fn test_non_plan_module_is_not_a_plan() {
    let project = shop_project();
    let mut registry = project.scan();

    let err = registry.resolve_plan(&plans(&["shop"])).unwrap_err();
    assert!(matches!(err, RegistryError::UnknownPlan { ref name, .. } if name == "shop"));
}

// ============================================================================
// Dependencies
// ============================================================================

#[test]
fn test_dependencies_load_first() {
    let project = Project::new();
    project.module("a-app", "type: backend\ndependencies: [z-db, m-cache]\n");
    project.module("m-cache", "type: backend\ndependencies: [z-db]\n");
    project.module("z-db", "type: backend\n");
    let mut registry = project.scan();

    registry.prepare_dependencies().unwrap();
    assert_eq!(active_ids(&registry), vec!["z-db", "m-cache", "a-app"]);

    // Second call keeps the computed order
    registry.prepare_dependencies().unwrap();
    assert_eq!(active_ids(&registry), vec!["z-db", "m-cache", "a-app"]);
}

#[test]
fn test_missing_dependency() {
    let project = Project::new();
    project.module("shop", "type: frontend\ndependencies: [ghost]\n");
    let mut registry = project.scan();

    let err = registry.prepare_dependencies().unwrap_err();
    assert!(matches!(
        err,
        RegistryError::MissingDependency { ref module, ref dependency }
            if module == "shop" && dependency == "ghost"
    ));
}

#[test]
fn test_dependency_cycle() {
    let project = Project::new();
    project.module("a", "type: backend\ndependencies: [b]\n");
    project.module("b", "type: backend\ndependencies: [a]\n");
    let mut registry = project.scan();

    let err = registry.prepare_dependencies().unwrap_err();
    assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
}

// ============================================================================
// Overrides
// ============================================================================

#[test]
fn test_overrides_apply_in_order() {
    let project = Project::new();
    project.module(
        "shop",
        "type: frontend\nconfig:\n  theme: light\n  size: 1\n  nested: {x: 1, y: 1}\n",
    );
    project.module(
        "web",
        "type: plan\nmodules: [shop]\noverrides:\n  shop:\n    theme: dark\n    nested: {y: 2}\n",
    );
    let mut settings = BTreeMap::new();
    settings.insert(
        "shop".to_string(),
        serde_yaml::from_str::<Value>("size: 3").unwrap(),
    );

    let mut registry = project.scan_with(Catalog::empty(), settings);
    registry.resolve_plan(&plans(&["web"])).unwrap();
    registry.prepare_dependencies().unwrap();
    registry.apply_dependency_overrides().unwrap();

    let shop = registry
        .active_modules()
        .into_iter()
        .find(|m| m.id() == "shop")
        .unwrap();
    let expected: Value =
        serde_yaml::from_str("theme: dark\nsize: 3\nnested: {x: 1, y: 2}\n").unwrap();
    assert_eq!(shop.config, expected);
}

#[test]
fn test_steps_out_of_order() {
    let project = shop_project();
    let mut registry = project.scan();

    assert!(matches!(
        registry.apply_dependency_overrides(),
        Err(RegistryError::OutOfOrder {
            step: "apply_dependency_overrides",
            requires: "prepare_dependencies"
        })
    ));

    registry.prepare_dependencies().unwrap();
    let runtime_config = project.runtime_config(&[]);
    let context = buildyard::signal::HandlerContext {
        task: std::sync::Arc::new(buildyard::context::TaskContext {
            config: runtime_config,
            modules: Vec::new(),
        }),
        services: buildyard::services::ServiceRegistry::new(),
        parent: std::sync::Arc::new(buildyard::process::NoParent),
    };
    let err = registry
        .load_modules(
            ModuleKind::Frontend,
            &mut TaskPipeline::new(),
            &buildyard::signal::SignalBus::new(),
            &context,
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::OutOfOrder { step: "load_modules", .. }));
}

#[test]
fn test_empty_registry_requires_scan() {
    let mut registry = Registry::new(Catalog::empty(), BTreeMap::new());
    assert!(matches!(
        registry.resolve_plan(&plans(&["web"])),
        Err(RegistryError::OutOfOrder { requires: "scan", .. })
    ));
}
