//! Build phase with the standard built-ins

use super::common::*;
use buildyard::modules::bundler::BUNDLE_FILE;
use buildyard::pipeline::Phase;
use buildyard::process::RecordingLink;
use buildyard::runtime::ModuleRuntimeLoader;
use buildyard::RuntimeLoader;
use std::sync::Arc;

fn storefront() -> Project {
    let project = Project::new();
    project.module("web", "type: plan\nmodules: [shop]\n");
    project.module("shop", "type: frontend\n");
    project.file("shop/index.js", "export default 1;\n");
    project.file("shop/styles/app.css", "body {}\n");
    project.file("shop/cart.template.html", "<div></div>\n");
    project.file("shop/notes.txt", "not shipped\n");
    project.file("shop/node_modules/dep/index.js", "");
    project.file("shop/server/api.js", "");
    project
}

fn loader(project: &Project, debug: bool) -> ModuleRuntimeLoader {
    let mut config = project.runtime_config(&["web"]);
    config.debug = debug;
    ModuleRuntimeLoader::new(
        project.settings(),
        config,
        Arc::new(RecordingLink::default()),
    )
}

fn bundle_json(project: &Project) -> serde_json::Value {
    let path = project.path().join("output/www").join(BUNDLE_FILE);
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_debug_build_keeps_staged_assets() {
    let project = storefront();
    let runtime = loader(&project, true).load_build().await.unwrap();

    assert_eq!(
        runtime.pipeline().sequence(Phase::Build),
        vec!["build-webpage", "bundle", "clean_temp"]
    );
    runtime.run_phase(Phase::Build).await.unwrap();

    let staged = project.path().join("output/.temp/modules/shop");
    assert!(staged.join("index.js").is_file());
    assert!(staged.join("styles/app.css").is_file());
    assert!(staged.join("cart.template.html").is_file());
    assert!(!staged.join("notes.txt").exists());
    assert!(!staged.join("node_modules").exists());
    assert!(!staged.join("server").exists());

    let bundle = bundle_json(&project);
    assert_eq!(bundle["mode"], "development");
    assert!(bundle["aliases"]["shop"]
        .as_str()
        .unwrap()
        .ends_with("modules/shop/"));
    let rules = bundle["rules"].as_array().unwrap();
    assert!(rules.iter().any(|r| r["test"] == r"\.template\.html$"
        && r["use"][0] == "ng-cache-loader?prefix=*"));
}

#[tokio::test]
async fn test_release_build_removes_temp() {
    let project = storefront();
    let runtime = loader(&project, false).load_build().await.unwrap();

    runtime.run_phase(Phase::Build).await.unwrap();

    assert!(!project.path().join("output/.temp").exists());
    assert_eq!(bundle_json(&project)["mode"], "production");
}

#[tokio::test]
async fn test_build_without_frontends_skips_bundle() {
    let project = Project::new();
    project.module("api", "type: backend\n");
    let mut config = project.runtime_config(&[]);
    config.debug = true;
    let loader = ModuleRuntimeLoader::new(
        project.settings(),
        config,
        Arc::new(RecordingLink::default()),
    );

    let runtime = loader.load_build().await.unwrap();
    runtime.run_phase(Phase::Build).await.unwrap();

    assert!(!project.path().join("output/www").exists());
}
