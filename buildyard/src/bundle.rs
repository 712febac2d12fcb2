//! Bundle configuration composed by modules through `BuildBundleConfig`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::TaskContext;
use buildyard_sdk::ModuleKind;

/// A file-matching rule and the loaders applied to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderRule {
    /// Regex matched against file paths
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(rename = "use")]
    pub loaders: Vec<String>,
}

impl LoaderRule {
    pub fn new<I, S>(test: impl Into<String>, loaders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            test: test.into(),
            exclude: None,
            loaders: loaders.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluding(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleOutput {
    pub path: String,
    pub filename: String,
}

impl Default for BundleOutput {
    fn default() -> Self {
        Self {
            path: String::new(),
            filename: "[name].js".to_string(),
        }
    }
}

/// The configuration handed to the external bundler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub mode: String,
    pub entry: Vec<String>,
    pub output: BundleOutput,
    /// Import alias -> staged module directory
    pub aliases: BTreeMap<String, String>,
    pub rules: Vec<LoaderRule>,
    pub plugins: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            mode: "production".to_string(),
            entry: Vec::new(),
            output: BundleOutput::default(),
            aliases: BTreeMap::new(),
            rules: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

impl BundleConfig {
    /// Base configuration for a build, before modules contribute
    pub fn for_build(ctx: &TaskContext) -> Self {
        let config = &ctx.config;
        let staged = config.temp_modules_dir();

        let aliases = ctx
            .modules_of(ModuleKind::Frontend)
            .map(|m| {
                (
                    m.id().to_string(),
                    format!("{}/", staged.join(m.id()).display()),
                )
            })
            .collect();

        Self {
            mode: if config.debug { "development" } else { "production" }.to_string(),
            entry: vec![staged.join("main.js").display().to_string()],
            output: BundleOutput {
                path: config.www_dir().display().to_string(),
                filename: "[name].js".to_string(),
            },
            aliases,
            rules: default_rules(),
            plugins: vec!["provide".to_string(), "html".to_string()],
        }
    }
}

fn default_rules() -> Vec<LoaderRule> {
    vec![
        LoaderRule::new(r"\.(woff|woff2|eot|ttf|otf)$", ["file-loader"]),
        LoaderRule::new(r"\.svg$", ["svg-inline-loader"]),
        LoaderRule::new(r"\.(html)$", ["html-loader"]),
        LoaderRule::new(r"\.css$", ["style-loader", "css-loader"]),
        LoaderRule::new(r"\.scss$", ["style-loader", "css-loader", "sass-loader"]),
        LoaderRule::new(r"\.(png|jpg|jpeg|gif)$", ["url-loader"]),
        LoaderRule::new(r"\.js$", ["babel-loader"]).excluding("node_modules"),
    ]
}
