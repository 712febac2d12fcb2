// Bundler configuration composed through signals
pub mod bundle;

// Command-line interface
pub mod cli;
pub mod commands;

// Layered settings
pub mod config;

// Task context shared with modules
pub mod context;

// Master/worker protocol
pub mod coordinator;

// Dockerfile export
pub mod docker;

// Error taxonomy
pub mod error;

// Compiled-in modules
pub mod modules;

// Priority-ordered phases
pub mod pipeline;

// Worker processes and IPC
pub mod process;

// Module discovery, plans and loading
pub mod registry;

// Prepared runtime and its loader
pub mod runtime;

// Background services
pub mod services;

// Signal bus
pub mod signal;

pub use coordinator::{BuildOptions, Coordinator};
pub use error::{CoordinatorError, Result};
pub use runtime::{Runtime, RuntimeLoader};
