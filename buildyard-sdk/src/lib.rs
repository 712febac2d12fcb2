// Re-export the derive macro
pub use buildyard_macros::BuiltinModule;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Module type as declared in `module.yaml`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Plan,
    Buildtask,
    Frontend,
    Backend,
    /// Anything the scanner could not classify. Kept so callers can warn.
    #[serde(other)]
    Unknown,
}

impl ModuleKind {
    /// Kinds in the order `ls` prints them
    pub const LISTED: [ModuleKind; 4] = [
        ModuleKind::Plan,
        ModuleKind::Buildtask,
        ModuleKind::Frontend,
        ModuleKind::Backend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Plan => "plan",
            ModuleKind::Buildtask => "buildtask",
            ModuleKind::Frontend => "frontend",
            ModuleKind::Backend => "backend",
            ModuleKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(ModuleKind::Plan),
            "buildtask" => Ok(ModuleKind::Buildtask),
            "frontend" => Ok(ModuleKind::Frontend),
            "backend" => Ok(ModuleKind::Backend),
            other => Err(format!(
                "unknown module type '{}' (expected plan, buildtask, frontend or backend)",
                other
            )),
        }
    }
}

/// A discovered module (id, type, name, location)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Metadata for a module compiled into the binary (auto-implemented by derive macro)
pub trait ModuleDefinition {
    fn descriptor() -> ModuleDescriptor;
}

/// Path reported for compiled-in modules
pub const BUILTIN_PATH: &str = "<builtin>";

// ============================================================================
// Process roles and the worker -> master wire protocol
// ============================================================================

/// Which side of the fork protocol a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// The process the user started
    #[default]
    Master,
    /// A child started by the master
    Worker,
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    /// Value passed to `--role` when spawning a child
    pub fn as_arg(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Role::Master),
            "worker" => Ok(Role::Worker),
            other => Err(format!("invalid role '{}'", other)),
        }
    }
}

/// Prefix marking a protocol line on a worker's stderr
pub const IPC_PREFIX: &str = "__BUILDYARD_IPC__:";

/// Message a worker sends to its master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Build phase completed
    BuildFinished,
    /// This run instance has started
    RunFinished,
    /// A watched rebuild occurred; the master should fork again
    RunAgain,
    /// Token outside the vocabulary
    Unexpected(String),
}

impl WorkerMessage {
    pub const BUILD_FINISHED: &'static str = "BUILD_FINISHED";
    pub const RUN_FINISHED: &'static str = "RUN_FINISHED";
    pub const RUN_AGAIN: &'static str = "RUN_AGAIN";

    pub fn token(&self) -> &str {
        match self {
            WorkerMessage::BuildFinished => Self::BUILD_FINISHED,
            WorkerMessage::RunFinished => Self::RUN_FINISHED,
            WorkerMessage::RunAgain => Self::RUN_AGAIN,
            WorkerMessage::Unexpected(token) => token,
        }
    }

    pub fn from_token(token: &str) -> Self {
        match token {
            Self::BUILD_FINISHED => WorkerMessage::BuildFinished,
            Self::RUN_FINISHED => WorkerMessage::RunFinished,
            Self::RUN_AGAIN => WorkerMessage::RunAgain,
            other => WorkerMessage::Unexpected(other.to_string()),
        }
    }

    /// Encode as a single protocol line (without newline)
    pub fn to_line(&self) -> String {
        format!("{}{}", IPC_PREFIX, self.token())
    }

    /// Decode a stderr line. Returns `None` for ordinary output.
    pub fn parse_line(line: &str) -> Option<Self> {
        line.strip_prefix(IPC_PREFIX)
            .map(|token| Self::from_token(token.trim_end()))
    }

    /// Write this message as one protocol line
    pub fn write_to<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "{}", self.to_line())?;
        // Flush so the master sees it even while the worker keeps running
        out.flush()
    }
}

impl fmt::Display for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ============================================================================
// Console Logging Macros
// ============================================================================
// Human-readable output for CLI commands, complementing the tracing logs
// written by the library.
// ============================================================================

/// Logs a warning message to stderr.
///
/// # Example
/// ```
/// use buildyard_sdk::log_warning;
/// log_warning!("Unknown type modules found");
/// ```
///
/// Outputs:
/// ```text
/// ⚠ Warning: Unknown type modules found
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        eprintln!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        eprintln!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a success line.
///
/// # Example
/// ```
/// use buildyard_sdk::log_success;
/// log_success!("build finished");
/// ```
///
/// Outputs:
/// ```text
/// ✓ build finished
/// ```
#[macro_export]
macro_rules! log_success {
    ($message:expr) => {
        println!("\x1b[32m✓ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[32m✓ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs that a file has been saved.
///
/// # Example
/// ```
/// use buildyard_sdk::log_file_saved;
/// log_file_saved!("./Dockerfile");
/// ```
///
/// Outputs:
/// ```text
/// ✓ Saved: ./Dockerfile
/// ```
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}
