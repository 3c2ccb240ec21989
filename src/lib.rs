//! Autotag - automatic tag assignment driven by constraint expressions
//!
//! Each tag may carry a constraint: a boolean expression over a subject's
//! attributes and its other tags. The engine compiles constraints once,
//! evaluates them whenever a subject could have changed, and adds or removes
//! the subject from the tag accordingly.
//!
//! - [`constraint`]: expression compiler and evaluator
//! - [`registry`]: constraint set, dependency resolution and add cooldown
//! - [`scheduler`]: the [`Engine`], which serializes every pass on one worker
//! - [`subject`]: contracts of the subject and tag stores the engine drives

use thiserror::Error;

pub mod batch;
pub mod cli;
pub mod config;
pub mod constraint;
pub mod output;
pub mod registry;
pub mod scheduler;
pub mod subject;

#[cfg(test)]
pub mod testing;

pub use constraint::{CompileError, Compiled, compile};
pub use registry::{Constraint, Registry};
pub use scheduler::{Engine, EngineBuilder};

/// Error enum, contains all failure states of the program
#[derive(Debug, Error)]
pub enum AutotagError {
    /// Represents a configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    /// Represents an I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Subject file could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Constraint text was rejected
    #[error("Invalid constraint: {0}")]
    Compile(#[from] CompileError),
    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
