//! Command-line interface definitions and parsing
//!
//! # Commands
//!
//! - **check**: compile an expression and show its canonical form
//! - **apply**: run a rules file over a JSON snapshot of subjects
//! - **functions**: list the builtin functions and keywords
//! - **config**: show (or write) the effective engine settings
//!
//! Global `-v` raises log verbosity (repeatable), `-q` restricts output to
//! results.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI structure for parsing command-line arguments
#[derive(Parser, Debug)]
#[command(name = "autotag")]
#[command(about = "Constraint-driven automatic tagging", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress informational output (only print results)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile a constraint expression
    #[command(visible_alias = "c")]
    Check {
        /// Expression to compile
        #[arg(value_name = "EXPR")]
        expr: String,

        /// Tag names `hasTag` may refer to (validated when given)
        #[arg(short = 't', long = "tag", value_name = "TAG", num_args = 0..)]
        tags: Vec<String>,
    },

    /// Run rules over a subject snapshot and print resulting tags
    #[command(visible_alias = "a")]
    Apply {
        /// Rules file (TOML)
        #[arg(short = 'r', long = "rules", value_name = "FILE")]
        rules: PathBuf,

        /// Subjects file (JSON array)
        #[arg(short = 's', long = "subjects", value_name = "FILE")]
        subjects: PathBuf,

        /// Engine settings file (TOML)
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// List builtin functions and keywords
    #[command(visible_alias = "fn")]
    Functions,

    /// Show the effective engine settings
    Config {
        /// Engine settings file to read (defaults apply otherwise)
        #[arg(short = 'c', long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        /// Write the settings to this file instead of printing them
        #[arg(short = 'w', long = "write", value_name = "FILE")]
        write: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log filter matching the requested verbosity
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
