//! Command-line arguments

use buildyard_sdk::Role;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Modular build and run orchestrator
///
/// Discovers modules, resolves the plans that activate them, runs the build
/// pipeline in a worker process and launches the resulting application,
/// optionally across several processes or in a watch loop.
#[derive(Parser, Debug, Clone)]
#[command(name = "buildyard")]
#[command(about = "Modular build and run orchestrator")]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Project directory
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    pub dir: PathBuf,

    /// Settings file (defaults to buildyard.yaml in the project directory)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Plan to activate; repeat for several
    #[arg(long = "plan", value_name = "PLAN", global = true)]
    pub plans: Vec<String>,

    /// Extra module directory to scan; repeat for several
    #[arg(long = "modules", value_name = "DIR", global = true)]
    pub module_dirs: Vec<PathBuf>,

    /// Keep intermediate files and build in development mode
    #[arg(long, global = true)]
    pub debug: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Process role, set by the master when it forks a worker
    #[arg(long, value_name = "ROLE", default_value = "master", hide = true, global = true)]
    pub role: Role,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List discovered modules
    Ls,

    /// Build the active plans
    Build {
        /// Rebuild when sources change
        #[arg(long)]
        watch: bool,

        /// Start the application after the build
        #[arg(long)]
        run: bool,

        /// Instance count; validated here, fan-out is done by `run`
        #[arg(long, value_name = "N", allow_hyphen_values = true)]
        instances: Option<String>,
    },

    /// Build, then run the test phase
    Test {
        /// Rebuild when sources change
        #[arg(long)]
        watch: bool,
    },

    /// Start the application
    Run {
        /// Number of application processes
        #[arg(long, value_name = "N", default_value = "1", allow_hyphen_values = true)]
        instances: String,
    },

    /// Scaffold a module inside --dir
    CreateModule {
        /// plan, buildtask, frontend or backend
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,

        #[arg(long)]
        name: String,
    },

    /// Write a Dockerfile for the active plans and build the image
    BuildDocker {
        /// Only write the Dockerfile
        #[arg(long)]
        only_dockerfile: bool,

        /// Port exposed by the image
        #[arg(long, value_name = "PORT")]
        expose: Option<u16>,

        /// Image tag
        #[arg(long, default_value = "buildyard-app")]
        tag: String,
    },
}

impl Cli {
    /// Tracing filter when `BUILDYARD_LOG` is not set
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
