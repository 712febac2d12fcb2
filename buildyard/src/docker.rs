//! Dockerfile export for `build-docker`

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::context::ActiveModule;

pub const DOCKERFILE: &str = "Dockerfile";

/// Base image expected to carry the `buildyard` binary
const DEFAULT_BASE_IMAGE: &str = "buildyard:latest";

#[derive(Debug, Clone, Default)]
pub struct DockerOptions {
    pub plans: Vec<String>,
    /// Settings file, relative to the project directory
    pub config_path: Option<PathBuf>,
    pub expose: Option<u16>,
}

/// Render a Dockerfile that builds the plans at image build time and runs them
pub fn render_dockerfile(modules: &[ActiveModule], options: &DockerOptions) -> String {
    let mut global_args = String::new();
    for plan in &options.plans {
        global_args.push_str(&format!(" --plan {}", plan));
    }
    if let Some(config) = &options.config_path {
        global_args.push_str(&format!(" --config {}", config.display()));
    }

    let mut out = String::new();
    out.push_str("# Generated by buildyard build-docker\n");
    out.push_str(&format!("ARG BASE_IMAGE={}\n", DEFAULT_BASE_IMAGE));
    out.push_str("FROM ${BASE_IMAGE}\n\n");
    out.push_str("WORKDIR /app\n");

    let listed: Vec<&str> = modules.iter().map(|m| m.id()).collect();
    if !listed.is_empty() {
        out.push_str(&format!("LABEL buildyard.modules=\"{}\"\n", listed.join(",")));
    }
    out.push_str("COPY . /app\n");
    out.push_str(&format!("RUN buildyard{} build\n", global_args));
    if let Some(port) = options.expose {
        out.push_str(&format!("EXPOSE {}\n", port));
    }

    let mut cmd = vec!["\"buildyard\"".to_string()];
    cmd.extend(global_args.split_whitespace().map(|arg| format!("\"{}\"", arg)));
    cmd.push("\"run\"".to_string());
    out.push_str(&format!("CMD [{}]\n", cmd.join(", ")));
    out
}

pub async fn write_dockerfile(dir: &Path, content: &str) -> Result<PathBuf> {
    let path = dir.join(DOCKERFILE);
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Wrote Dockerfile");
    Ok(path)
}

/// `docker build -t <tag> -f <dockerfile> <dir>`
pub async fn run_docker_build(dir: &Path, dockerfile: &Path, tag: &str) -> Result<()> {
    info!(tag, "Building docker image");
    let status = Command::new("docker")
        .arg("build")
        .arg("-t")
        .arg(tag)
        .arg("-f")
        .arg(dockerfile)
        .arg(dir)
        .status()
        .await
        .context("Failed to run docker")?;

    if !status.success() {
        bail!("docker build exited with {}", status);
    }
    Ok(())
}
